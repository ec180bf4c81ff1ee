use super::{apply, check_owner};
use crate::cloud::AliCloud;
use crate::records::DiskRecord;
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

/// Default category of etcd volumes
pub const DEFAULT_DISK_CATEGORY: &str = "cloud_ssd";

/// Etcd data volume
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub zone: String,
    pub size_gb: u32,
    pub category: String,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for Disk {
    type Cloud = AliCloud;
    const KIND: &'static str = "Disk";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let Some(record) = find_unique(
            cloud.apis().disks.as_ref(),
            cloud.scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(Disk {
            name: self.name.clone(),
            zone: record.zone_id,
            size_gb: record.size_gb,
            category: record.category,
            tags: record.tags,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        let Some(actual) = actual else {
            return Ok(());
        };
        changes.reject_immutable(expected.key(), &["zone", "category"])?;
        if expected.size_gb < actual.size_gb {
            return Err(CloudError::cannot_change(
                expected.key(),
                "sizeGb",
                actual.size_gb,
                expected.size_gb,
            ));
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = DiskRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            zone_id: self.zone.clone(),
            size_gb: self.size_gb,
            category: self.category.clone(),
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().disks.as_ref(),
            cloud.scope(),
            record,
            actual.map(|a| &a.tags),
            changes,
        )
        .await?;
        self.id = stored.id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TAGS;
    use kforge_cloud::{Task, TaskOutcome};
    use kforge_config::EngineConfig;
    use std::sync::Arc;

    fn disk(size_gb: u32) -> Disk {
        Disk {
            name: "a.etcd-main.demo.example.com".into(),
            zone: "cn-hangzhou-b".into(),
            size_gb,
            category: DEFAULT_DISK_CATEGORY.into(),
            tags: TAGS.cluster_tags("demo.example.com"),
            id: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_disk_grows_but_never_shrinks() {
        let (cloud, memory) = AliCloud::in_memory("cn-hangzhou", &EngineConfig::default());
        let ctx = Context::new(Arc::new(cloud), "demo.example.com");

        assert_eq!(disk(20).run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert_eq!(
            disk(40).run(&ctx).await.unwrap(),
            TaskOutcome::Updated {
                fields: vec!["sizeGb".into()]
            }
        );
        let err = disk(10).run(&ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::CannotChangeField { .. }));
        assert_eq!(memory.disks.records()[0].size_gb, 40);
    }
}
