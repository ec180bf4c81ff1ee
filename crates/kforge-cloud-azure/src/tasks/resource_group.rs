use super::check_owner;
use crate::cloud::AzureCloud;
use crate::records::ResourceGroupRecord;
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudTask, Context, Lifecycle, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

/// Container of every other azure resource of the cluster
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub name: String,
    pub location: String,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for ResourceGroup {
    type Cloud = AzureCloud;
    const KIND: &'static str = "ResourceGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let Some(record) = find_unique(
            cloud.apis().resource_groups.as_ref(),
            &cloud.subscription_scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        if !self.shared {
            check_owner(ctx, &record)?;
        }
        Ok(Some(ResourceGroup {
            name: self.name.clone(),
            location: record.location,
            tags: record.tags,
            id: record.id,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["location"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = ResourceGroupRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            tags: self.tags.clone(),
        };
        let stored = cloud
            .apis()
            .resource_groups
            .create_or_update(&cloud.subscription_scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}
