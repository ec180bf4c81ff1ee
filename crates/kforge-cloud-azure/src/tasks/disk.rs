use super::{check_owner, scope_of};
use crate::cloud::AzureCloud;
use crate::records::DiskRecord;
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

pub const DEFAULT_DISK_SKU: &str = "StandardSSD_LRS";

/// Managed disk holding one etcd member's data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub resource_group: Link,
    pub zones: Vec<String>,
    pub size_gb: u32,
    pub sku: String,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for Disk {
    type Cloud = AzureCloud;
    const KIND: &'static str = "Disk";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.resource_group]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.resource_group]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().disks.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(Disk {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            zones: record.zones,
            size_gb: record.size_gb,
            sku: record.sku,
            tags: record.tags,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        let key = expected.key();
        if expected.size_gb == 0 {
            return Err(CloudError::required(&key, "sizeGb"));
        }
        if let Some(actual) = actual {
            changes.reject_immutable(key.clone(), &["zones", "sku"])?;
            if expected.size_gb < actual.size_gb {
                return Err(CloudError::cannot_change(
                    key,
                    "sizeGb",
                    actual.size_gb,
                    expected.size_gb,
                ));
            }
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let record = DiskRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            zones: self.zones.clone(),
            size_gb: self.size_gb,
            sku: self.sku.clone(),
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .disks
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TAGS;
    use crate::memory::AzureMemory;
    use crate::tasks::ResourceGroup;
    use kforge_cloud::{Task, TaskOutcome};
    use kforge_config::EngineConfig;
    use std::sync::Arc;

    const CLUSTER: &str = "demo.example.com";

    fn context() -> (Context<AzureCloud>, AzureMemory) {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        (Context::new(Arc::new(cloud), CLUSTER), memory)
    }

    fn disk(size_gb: u32) -> Disk {
        Disk {
            name: "a.etcd-main.demo.example.com".into(),
            resource_group: Link::existing::<ResourceGroup>(CLUSTER, "rg-1"),
            zones: vec!["1".into()],
            size_gb,
            sku: DEFAULT_DISK_SKU.into(),
            tags: TAGS.cluster_tags(CLUSTER),
            id: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_disk_grows_but_never_shrinks() {
        let (ctx, memory) = context();
        assert_eq!(disk(20).run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert_eq!(
            disk(40).run(&ctx).await.unwrap(),
            TaskOutcome::Updated {
                fields: vec!["sizeGb".into()]
            }
        );
        assert_eq!(memory.disks.records()[0].size_gb, 40);

        let err = disk(20).run(&ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::CannotChangeField { ref field, .. } if field == "sizeGb"));
    }
}
