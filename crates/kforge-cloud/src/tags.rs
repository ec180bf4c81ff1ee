//! Tag reconciliation for kinds with separate tag mutation

use crate::adapter::{CloudResource, ResourceApi, Scope, Tags};
use crate::error::Result;
use tracing::debug;

/// Tags to add and keys to remove to move `actual` to `desired`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    pub add: Tags,
    pub remove: Vec<String>,
}

impl TagDelta {
    /// The cluster-name tag is never removed
    pub fn between(desired: &Tags, actual: &Tags, cluster_key: &str) -> Self {
        let add = desired
            .iter()
            .filter(|(k, v)| actual.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let remove = actual
            .keys()
            .filter(|k| !desired.contains_key(*k) && k.as_str() != cluster_key)
            .cloned()
            .collect();

        Self { add, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Applies the delta through the tag capability of `api`; a no-op when
    /// the kind has none
    pub async fn apply<R: CloudResource>(
        &self,
        api: &dyn ResourceApi<R>,
        scope: &Scope,
        id: &str,
    ) -> Result<()> {
        if self.is_empty() || !api.supports_tags() {
            return Ok(());
        }
        debug!(
            kind = R::KIND,
            id = %id,
            add = self.add.len(),
            remove = self.remove.len(),
            "Updating tags"
        );
        if !self.add.is_empty() {
            api.add_tags(scope, id, &self.add).await?;
        }
        if !self.remove.is_empty() {
            api.remove_tags(scope, id, &self.remove).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_delta() {
        let desired = tags(&[("KubernetesCluster", "c"), ("team", "infra"), ("env", "prod")]);
        let actual = tags(&[("KubernetesCluster", "c"), ("team", "web"), ("stale", "1")]);

        let delta = TagDelta::between(&desired, &actual, "KubernetesCluster");
        assert_eq!(delta.add, tags(&[("team", "infra"), ("env", "prod")]));
        assert_eq!(delta.remove, vec!["stale".to_string()]);
    }

    #[test]
    fn test_cluster_tag_is_preserved() {
        let desired = tags(&[("team", "infra")]);
        let actual = tags(&[("KubernetesCluster", "c"), ("team", "infra")]);

        let delta = TagDelta::between(&desired, &actual, "KubernetesCluster");
        assert!(delta.is_empty());
    }
}
