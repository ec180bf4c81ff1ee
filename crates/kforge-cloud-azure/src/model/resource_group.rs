use super::{ModelBuilder, ModelContext};
use crate::cloud::AzureCloud;
use crate::error::Result;
use crate::tasks::ResourceGroup;
use kforge_cloud::{CloudTask, TaskGraph};

/// The cluster's resource group; a group named in the cluster spec is shared
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGroupBuilder;

impl ModelBuilder for ResourceGroupBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()> {
        if !ctx.supports(ResourceGroup::KIND) {
            return Ok(());
        }
        graph.add_task(ResourceGroup {
            name: ctx.resource_group_name(),
            location: ctx.location.to_string(),
            tags: ctx.cluster_tags(),
            id: None,
            shared: ctx.cluster.is_shared_resource_group(),
            lifecycle: ctx.lifecycle,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{self, CLUSTER};
    use kforge_config::EngineConfig;
    use kforge_core::AzureSpec;

    #[test]
    fn test_named_group_is_shared() {
        let (cloud, _memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let mut cluster = fixtures::cluster(None);
        let groups = fixtures::groups();

        let mut graph = TaskGraph::new();
        ResourceGroupBuilder
            .build(&ModelContext::new(&cloud, &cluster, &groups), &mut graph)
            .unwrap();
        let own = graph.get::<ResourceGroup>(CLUSTER).unwrap();
        assert!(!own.shared);
        assert_eq!(own.location, "westeurope");

        cluster.spec.azure = Some(AzureSpec {
            resource_group_name: Some("platform-rg".into()),
            ..Default::default()
        });
        let mut graph = TaskGraph::new();
        ResourceGroupBuilder
            .build(&ModelContext::new(&cloud, &cluster, &groups), &mut graph)
            .unwrap();
        assert!(graph.get::<ResourceGroup>("platform-rg").unwrap().shared);
    }
}
