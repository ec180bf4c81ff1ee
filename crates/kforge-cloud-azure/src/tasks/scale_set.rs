use super::{check_owner, find_by_id, scope_of};
use crate::cloud::AzureCloud;
use crate::records::{ProvisioningState, VmScaleSetRecord};
use crate::tasks::{LoadBalancer, Subnet};
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags,
    find_unique, poll_until,
};
use serde::Serialize;
use tracing::info;

/// Scale set of one instance group.
///
/// Writes return before the cloud has finished provisioning; render waits
/// until the set reports `Succeeded`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmScaleSet {
    pub name: String,
    pub resource_group: Link,
    pub sku: String,
    pub capacity: u32,
    pub subnet: Link,
    /// Backend pool membership, control plane only
    pub load_balancer: Option<Link>,
    pub computer_name_prefix: String,
    pub admin_user: String,
    pub ssh_public_key: String,
    /// Base64
    pub user_data: Option<String>,
    pub require_public_ip: bool,
    pub zones: Vec<String>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    /// System-assigned identity
    #[serde(skip)]
    pub principal_id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl VmScaleSet {
    async fn wait_provisioned(&self, ctx: &Context<AzureCloud>, id: &str) -> Result<VmScaleSetRecord> {
        let cloud = ctx.cloud();
        let api = cloud.apis().scale_sets.as_ref();
        let scope = &scope_of(ctx, &self.resource_group);
        let what = format!("scale set {} to finish provisioning", self.name);
        poll_until(&what, cloud.poll(), &ctx.cancel, || async move {
            let record = find_by_id(api, scope, id).await?.ok_or_else(|| CloudError::NotFound {
                kind: Self::KIND.to_string(),
                name: self.name.clone(),
            })?;
            match record.provisioning_state {
                ProvisioningState::Succeeded => Ok(Some(record)),
                ProvisioningState::Failed => Err(CloudError::OperationFailed {
                    operation: format!("provisioning of scale set {}", self.name),
                    attempts: 1,
                    message: "provisioning state is Failed".into(),
                }),
                ProvisioningState::Creating | ProvisioningState::Updating => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl CloudTask for VmScaleSet {
    type Cloud = AzureCloud;
    const KIND: &'static str = "VMScaleSet";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        let mut links = vec![&self.resource_group, &self.subnet];
        links.extend(self.load_balancer.iter());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        let mut links = vec![&mut self.resource_group, &mut self.subnet];
        links.extend(self.load_balancer.iter_mut());
        links
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.principal_id = actual.principal_id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().scale_sets.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(VmScaleSet {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            sku: record.sku,
            capacity: record.capacity,
            subnet: Link::observed::<Subnet>(record.subnet_id),
            load_balancer: record.load_balancer_id.map(Link::observed::<LoadBalancer>),
            computer_name_prefix: record.computer_name_prefix,
            admin_user: record.admin_user,
            ssh_public_key: record.ssh_public_key,
            user_data: record.user_data,
            require_public_ip: record.require_public_ip,
            zones: record.zones,
            tags: record.tags,
            id: record.id,
            principal_id: record.principal_id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        let key = expected.key();
        if expected.sku.is_empty() {
            return Err(CloudError::required(&key, "sku"));
        }
        if expected.ssh_public_key.is_empty() {
            return Err(CloudError::required(&key, "sshPublicKey"));
        }
        if actual.is_some() {
            changes.reject_immutable(
                key,
                &["zones", "subnet", "adminUser", "computerNamePrefix"],
            )?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let key = self.key();
        let record = VmScaleSetRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            sku: self.sku.clone(),
            capacity: self.capacity,
            subnet_id: self.subnet.require_id(&key)?.to_string(),
            load_balancer_id: self
                .load_balancer
                .as_ref()
                .map(|l| l.require_id(&key).map(str::to_string))
                .transpose()?,
            computer_name_prefix: self.computer_name_prefix.clone(),
            admin_user: self.admin_user.clone(),
            ssh_public_key: self.ssh_public_key.clone(),
            user_data: self.user_data.clone(),
            require_public_ip: self.require_public_ip,
            zones: self.zones.clone(),
            principal_id: self.principal_id.clone(),
            provisioning_state: if actual.is_some() {
                ProvisioningState::Updating
            } else {
                ProvisioningState::Creating
            },
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .scale_sets
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        let id = stored
            .id
            .clone()
            .ok_or_else(|| CloudError::required(&key, "id of the stored scale set"))?;

        let provisioned = self.wait_provisioned(ctx, &id).await?;
        info!(scale_set = %self.name, capacity = self.capacity, changed = changes.len(), "Scale set provisioned");
        self.id = Some(id);
        self.principal_id = provisioned.principal_id;
        Ok(())
    }
}
