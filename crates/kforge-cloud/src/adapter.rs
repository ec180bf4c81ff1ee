//! Cloud adapter contract
//!
//! A cloud is a set of per-kind capabilities. Each kind is a record type
//! implementing [`CloudResource`], served by a [`ResourceApi`]. Kinds a cloud
//! does not have are simply absent from its [`Capabilities`].

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use kforge_core::InstanceGroupRole;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type Tags = BTreeMap<String, String>;

/// Value of role markers
pub const ROLE_TAG_VALUE: &str = "1";

/// Container bounding list and create calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// Flat region; ownership by cluster tag
    Region { region: String },
    /// Named resource group
    ResourceGroup { name: String, location: String },
}

impl Scope {
    pub fn region(region: impl Into<String>) -> Self {
        Scope::Region {
            region: region.into(),
        }
    }

    pub fn resource_group(name: impl Into<String>, location: impl Into<String>) -> Self {
        Scope::ResourceGroup {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Region or resource group name
    pub fn name(&self) -> &str {
        match self {
            Scope::Region { region } => region,
            Scope::ResourceGroup { name, .. } => name,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            Scope::Region { region } => region,
            Scope::ResourceGroup { location, .. } => location,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Region { region } => write!(f, "region/{region}"),
            Scope::ResourceGroup { name, location } => write!(f, "resourceGroup/{name}@{location}"),
        }
    }
}

/// A cloud-side record of one kind
pub trait CloudResource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind name, e.g. `Vpc`
    const KIND: &'static str;

    /// Whether the kind carries tags
    const TAGGABLE: bool = false;

    /// Cloud-assigned id; `None` before creation
    fn id(&self) -> Option<&str>;

    fn name(&self) -> &str;

    /// Id of the parent resource, part of the upsert key
    fn parent(&self) -> Option<&str> {
        None
    }

    fn tags(&self) -> Option<&Tags> {
        None
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        None
    }

    fn with_id(self, id: String) -> Self;
}

/// List filter; every set criterion must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub tags: Tags,
    pub name: Option<String>,
    pub parent: Option<String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_tags(tags: Tags) -> Self {
        Self {
            tags,
            ..Default::default()
        }
    }

    pub fn by_parent(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn matches<R: CloudResource>(&self, resource: &R) -> bool {
        if let Some(name) = &self.name {
            if resource.name() != name {
                return false;
            }
        }
        if let Some(parent) = &self.parent {
            if resource.parent() != Some(parent.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let Some(tags) = resource.tags() else {
                return false;
            };
            return self.tags.iter().all(|(k, v)| tags.get(k) == Some(v));
        }
        true
    }
}

/// Per-kind cloud operations
#[async_trait]
pub trait ResourceApi<R: CloudResource>: Send + Sync {
    /// Idempotent read
    async fn list(&self, scope: &Scope, filter: &ListFilter) -> Result<Vec<R>>;

    /// Idempotent upsert keyed by (scope, parent, name)
    async fn create_or_update(&self, scope: &Scope, desired: R) -> Result<R>;

    /// Deleting a missing resource succeeds
    async fn delete(&self, scope: &Scope, id: &str) -> Result<()>;

    fn supports_tags(&self) -> bool {
        false
    }

    async fn get_tags(&self, _scope: &Scope, _id: &str) -> Result<Tags> {
        Err(CloudError::unsupported(R::KIND, "get_tags"))
    }

    async fn add_tags(&self, _scope: &Scope, _id: &str, _tags: &Tags) -> Result<()> {
        Err(CloudError::unsupported(R::KIND, "add_tags"))
    }

    async fn remove_tags(&self, _scope: &Scope, _id: &str, _keys: &[String]) -> Result<()> {
        Err(CloudError::unsupported(R::KIND, "remove_tags"))
    }
}

/// Lists with `filter` and fails with `AmbiguousFind` on more than one match
pub async fn find_unique<R: CloudResource>(
    api: &dyn ResourceApi<R>,
    scope: &Scope,
    filter: &ListFilter,
) -> Result<Option<R>> {
    let mut found = api.list(scope, filter).await?;
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(CloudError::AmbiguousFind {
            kind: R::KIND.to_string(),
            name: filter
                .name
                .clone()
                .unwrap_or_else(|| format!("{:?}", filter.tags)),
            count,
        }),
    }
}

/// Per-cloud tag keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConvention {
    pub cluster_key: &'static str,
    pub role_prefix: &'static str,
    pub etcd_prefix: &'static str,
}

impl TagConvention {
    pub fn cluster_tags(&self, cluster: &str) -> Tags {
        let mut tags = Tags::new();
        self.add_cluster_tags(cluster, &mut tags);
        tags
    }

    /// Merges the cluster-name tag into `tags`
    pub fn add_cluster_tags(&self, cluster: &str, tags: &mut Tags) {
        tags.insert(self.cluster_key.to_string(), cluster.to_string());
    }

    pub fn role_key(&self, role: InstanceGroupRole) -> String {
        format!("{}{}", self.role_prefix, role.tag_name())
    }

    /// Cluster tag plus the role marker
    pub fn role_tags(&self, cluster: &str, role: InstanceGroupRole) -> Tags {
        let mut tags = self.cluster_tags(cluster);
        tags.insert(self.role_key(role), ROLE_TAG_VALUE.to_string());
        tags
    }

    pub fn etcd_key(&self, etcd_cluster: &str) -> String {
        format!("{}{}", self.etcd_prefix, etcd_cluster)
    }

    pub fn owner<'a>(&self, tags: &'a Tags) -> Option<&'a str> {
        tags.get(self.cluster_key).map(String::as_str)
    }

    pub fn is_owned_by(&self, tags: &Tags, cluster: &str) -> bool {
        self.owner(tags) == Some(cluster)
    }

    pub fn has_role(&self, tags: &Tags, role: InstanceGroupRole) -> bool {
        tags.contains_key(&self.role_key(role))
    }

    /// `(etcd cluster name, member spec value)` pairs found in `tags`
    pub fn etcd_entries<'a>(&self, tags: &'a Tags) -> Vec<(&'a str, &'a str)> {
        tags.iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(self.etcd_prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name, v.as_str()))
            })
            .collect()
    }

    /// Refuses to touch a resource tagged for another cluster
    pub fn ensure_owned(&self, kind: &str, name: &str, tags: &Tags, cluster: &str) -> Result<()> {
        match self.owner(tags) {
            Some(owner) if owner != cluster => Err(CloudError::OwnershipConflict {
                kind: kind.to_string(),
                name: name.to_string(),
                owner: owner.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Kinds a cloud supports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    kinds: BTreeSet<&'static str>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: &'static str) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn without(mut self, kind: &'static str) -> Self {
        self.kinds.remove(kind);
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Thing {
        id: Option<String>,
        name: String,
        parent: Option<String>,
        tags: Tags,
    }

    impl CloudResource for Thing {
        const KIND: &'static str = "Thing";
        const TAGGABLE: bool = true;

        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn parent(&self) -> Option<&str> {
            self.parent.as_deref()
        }
        fn tags(&self) -> Option<&Tags> {
            Some(&self.tags)
        }
        fn with_id(mut self, id: String) -> Self {
            self.id = Some(id);
            self
        }
    }

    const CONVENTION: TagConvention = TagConvention {
        cluster_key: "KubernetesCluster",
        role_prefix: "k8s.io/role/",
        etcd_prefix: "k8s.io/etcd/",
    };

    #[test]
    fn test_filter_matches() {
        let thing = Thing {
            id: None,
            name: "a".into(),
            parent: Some("p".into()),
            tags: CONVENTION.cluster_tags("c"),
        };
        assert!(ListFilter::all().matches(&thing));
        assert!(ListFilter::by_name("a").with_parent("p").matches(&thing));
        assert!(!ListFilter::by_parent("q").matches(&thing));
        assert!(ListFilter::by_tags(CONVENTION.cluster_tags("c")).matches(&thing));
        assert!(!ListFilter::by_tags(CONVENTION.cluster_tags("other")).matches(&thing));
    }

    #[test]
    fn test_tag_convention() {
        let tags = CONVENTION.role_tags("c", InstanceGroupRole::ControlPlane);
        assert_eq!(tags.get("KubernetesCluster").map(String::as_str), Some("c"));
        assert_eq!(tags.get("k8s.io/role/master").map(String::as_str), Some("1"));
        assert!(CONVENTION.has_role(&tags, InstanceGroupRole::ControlPlane));
        assert!(CONVENTION.is_owned_by(&tags, "c"));
        assert!(CONVENTION.ensure_owned("Disk", "d", &tags, "other").is_err());

        let mut etcd = tags.clone();
        etcd.insert(CONVENTION.etcd_key("main"), "a/a,b".into());
        assert_eq!(CONVENTION.etcd_entries(&etcd), vec![("main", "a/a,b")]);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::new().with("Vpc").with("SnatEntry");
        assert!(caps.supports("SnatEntry"));
        assert!(!caps.without("SnatEntry").supports("SnatEntry"));
    }
}
