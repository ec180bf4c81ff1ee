use super::{find_by_id, scope_of};
use crate::cloud::AzureCloud;
use crate::records::RoleAssignmentRecord;
use async_trait::async_trait;
use kforge_cloud::{Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result};
use serde::Serialize;

/// Built-in Contributor role
pub const CONTRIBUTOR_ROLE_DEFINITION_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

/// Grants the identity of a scale set a role over the resource group.
///
/// Assignments carry no name of their own on the cloud side; the one of a
/// scale set is found through its principal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub name: String,
    pub resource_group: Link,
    pub scale_set: Link,
    pub role_definition_id: String,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub principal_id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl RoleAssignment {
    async fn scale_set_principal(&self, ctx: &Context<AzureCloud>) -> Result<Option<String>> {
        let Some(scale_set_id) = self.scale_set.id() else {
            return Ok(None);
        };
        let record = find_by_id(
            ctx.cloud().apis().scale_sets.as_ref(),
            &scope_of(ctx, &self.resource_group),
            scale_set_id,
        )
        .await?;
        Ok(record.and_then(|r| r.principal_id))
    }
}

#[async_trait]
impl CloudTask for RoleAssignment {
    type Cloud = AzureCloud;
    const KIND: &'static str = "RoleAssignment";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.resource_group, &self.scale_set]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.resource_group, &mut self.scale_set]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.principal_id = actual.principal_id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(principal_id) = self.scale_set_principal(ctx).await? else {
            return Ok(None);
        };
        let record = ctx
            .cloud()
            .apis()
            .role_assignments
            .list(&scope_of(ctx, &self.resource_group), &ListFilter::all())
            .await?
            .into_iter()
            .find(|r| r.principal_id == principal_id);
        Ok(record.map(|r| RoleAssignment {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            scale_set: self.scale_set.clone(),
            role_definition_id: r.role_definition_id,
            id: r.id,
            principal_id: Some(r.principal_id),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["roleDefinitionId"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let key = self.key();
        let principal_id = self
            .scale_set_principal(ctx)
            .await?
            .ok_or_else(|| CloudError::required(&key, "principal of the scale set identity"))?;
        let record = RoleAssignmentRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            principal_id: principal_id.clone(),
            role_definition_id: self.role_definition_id.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .role_assignments
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        self.principal_id = Some(principal_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TAGS;
    use crate::memory::AzureMemory;
    use crate::tasks::{ResourceGroup, Subnet, VmScaleSet};
    use kforge_cloud::{Task, TaskOutcome};
    use kforge_config::EngineConfig;
    use std::sync::Arc;

    const CLUSTER: &str = "demo.example.com";

    fn context() -> (Context<AzureCloud>, AzureMemory) {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        (Context::new(Arc::new(cloud), CLUSTER), memory)
    }

    fn rg() -> Link {
        Link::existing::<ResourceGroup>(CLUSTER, "rg-1")
    }

    async fn scale_set(ctx: &Context<AzureCloud>) -> VmScaleSet {
        let mut vmss = VmScaleSet {
            name: "nodes-demo-example-com".into(),
            resource_group: rg(),
            sku: "Standard_D2s_v3".into(),
            capacity: 1,
            subnet: Link::existing::<Subnet>("westeurope-1", "snet-1"),
            load_balancer: None,
            computer_name_prefix: "nodes".into(),
            admin_user: "admin-user".into(),
            ssh_public_key: "ssh-rsa AAAA".into(),
            user_data: None,
            require_public_ip: false,
            zones: vec![],
            tags: TAGS.cluster_tags(CLUSTER),
            id: None,
            principal_id: None,
            lifecycle: Lifecycle::Sync,
        };
        vmss.run(ctx).await.unwrap();
        vmss
    }

    fn assignment(scale_set: Link) -> RoleAssignment {
        RoleAssignment {
            name: "nodes-demo-example-com-role".into(),
            resource_group: rg(),
            scale_set,
            role_definition_id: CONTRIBUTOR_ROLE_DEFINITION_ID.into(),
            id: None,
            principal_id: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_assignment_found_through_principal() {
        let (ctx, memory) = context();
        let vmss = scale_set(&ctx).await;
        let link = Link::existing::<VmScaleSet>(&vmss.name, vmss.id.clone().unwrap());

        let mut ra = assignment(link.clone());
        assert_eq!(ra.run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert_eq!(ra.principal_id, vmss.principal_id);
        assert_eq!(memory.role_assignments.records()[0].principal_id, "principal-1");

        memory.log.clear();
        assert_eq!(assignment(link).run(&ctx).await.unwrap(), TaskOutcome::UpToDate);
        assert!(memory.log.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_scale_set_finds_nothing() {
        let (ctx, _memory) = context();
        let ra = assignment(Link::to::<VmScaleSet>("nodes-demo-example-com"));
        assert!(ra.find(&ctx).await.unwrap().is_none());
    }
}
