use super::find_by_id;
use crate::cloud::AliCloud;
use crate::records::{RamPolicyRecord, RamRoleRecord};
use async_trait::async_trait;
use kforge_cloud::{Changes, CloudTask, Context, Lifecycle, Link, ListFilter, Result, find_unique};
use serde::Serialize;

/// RAM role assumed by the instances of one group
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RamRole {
    pub name: String,
    pub assume_role_policy: String,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for RamRole {
    type Cloud = AliCloud;
    const KIND: &'static str = "RamRole";

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
        let api = cloud.apis().ram_roles.as_ref();
        let record = match &self.id {
            Some(id) => find_by_id(api, cloud.scope(), id).await?,
            None => find_unique(api, cloud.scope(), &ListFilter::by_name(&self.name)).await?,
        };
        Ok(record.map(|r| RamRole {
            name: self.name.clone(),
            assume_role_policy: r.assume_role_policy,
            id: r.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, _expected: &Self, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = RamRoleRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            assume_role_policy: self.assume_role_policy.clone(),
        };
        let stored = cloud
            .apis()
            .ram_roles
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

/// Policy document attached to a role
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RamPolicy {
    pub name: String,
    pub role: Link,
    pub document: String,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for RamPolicy {
    type Cloud = AliCloud;
    const KIND: &'static str = "RamPolicy";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.role]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.role]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(role_id) = self.role.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(role_id);
        let record = find_unique(cloud.apis().ram_policies.as_ref(), cloud.scope(), &filter).await?;
        Ok(record.map(|r| RamPolicy {
            name: self.name.clone(),
            role: Link::observed::<RamRole>(r.role_id),
            document: r.document,
            id: r.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["role"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = RamPolicyRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            role_id: self.role.require_id(&self.key())?.to_string(),
            document: self.document.clone(),
        };
        let stored = cloud
            .apis()
            .ram_policies
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}
