//! Node bootstrap authentication by instance metadata
//!
//! A node presents `x-azure-id <resource-id> <vm-id>`, both read from its
//! instance metadata. The verifier looks the machine up through the cloud,
//! recomputes its resource id and compares the VM id.

use crate::cloud::{AzureCloud, TAGS};
use crate::error::{AzureError, Result};
use async_trait::async_trait;
use kforge_cloud::{ListFilter, find_unique};
use kforge_core::Cluster;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const AZURE_AUTHENTICATION_TOKEN_PREFIX: &str = "x-azure-id ";

/// Resource id of a scale-set machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub scale_set: String,
    pub instance_id: String,
}

impl VmResourceId {
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || AzureError::InvalidToken(format!("unexpected resource id {id:?}"));
        let parts: Vec<&str> = id.split('/').collect();
        match parts.as_slice() {
            [
                "",
                subscriptions,
                subscription_id,
                resource_groups,
                resource_group,
                providers,
                namespace,
                scale_sets,
                scale_set,
                machines,
                instance_id,
            ] if subscriptions.eq_ignore_ascii_case("subscriptions")
                && resource_groups.eq_ignore_ascii_case("resourceGroups")
                && providers.eq_ignore_ascii_case("providers")
                && namespace.eq_ignore_ascii_case("Microsoft.Compute")
                && scale_sets.eq_ignore_ascii_case("virtualMachineScaleSets")
                && machines.eq_ignore_ascii_case("virtualMachines")
                && [subscription_id, resource_group, scale_set, instance_id]
                    .iter()
                    .all(|p| !p.is_empty()) =>
            {
                Ok(Self {
                    subscription_id: subscription_id.to_string(),
                    resource_group: resource_group.to_string(),
                    scale_set: scale_set.to_string(),
                    instance_id: instance_id.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for VmResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines/{}",
            self.subscription_id, self.resource_group, self.scale_set, self.instance_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub resource_id: String,
    pub vm_id: String,
}

/// Instance metadata of the machine the caller runs on
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn instance_metadata(&self) -> Result<InstanceMetadata>;
}

/// Metadata read ahead of time
#[derive(Debug, Clone)]
pub struct FixedMetadata(pub InstanceMetadata);

#[async_trait]
impl MetadataSource for FixedMetadata {
    async fn instance_metadata(&self) -> Result<InstanceMetadata> {
        Ok(self.0.clone())
    }
}

/// Node side: builds the token
pub struct AzureAuthenticator<M> {
    metadata: M,
}

impl<M: MetadataSource> AzureAuthenticator<M> {
    pub fn new(metadata: M) -> Self {
        Self { metadata }
    }

    pub async fn create_token(&self) -> Result<String> {
        let metadata = self.metadata.instance_metadata().await?;
        Ok(format!(
            "{AZURE_AUTHENTICATION_TOKEN_PREFIX}{} {}",
            metadata.resource_id, metadata.vm_id
        ))
    }
}

/// Identity of a verified node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedNode {
    pub node_name: String,
    pub instance_id: String,
    pub addresses: Vec<String>,
}

/// Control-plane side: checks tokens against the cloud
pub struct AzureVerifier {
    cloud: Arc<AzureCloud>,
    cluster_name: String,
    resource_group: String,
}

impl AzureVerifier {
    pub fn new(cloud: Arc<AzureCloud>, cluster: &Cluster) -> Self {
        Self {
            cloud,
            cluster_name: cluster.name.clone(),
            resource_group: cluster.resource_group_name(),
        }
    }

    pub async fn verify_token(&self, token: &str) -> Result<VerifiedNode> {
        let body = token
            .strip_prefix(AZURE_AUTHENTICATION_TOKEN_PREFIX)
            .ok_or_else(|| AzureError::InvalidToken("incorrect authorization type".into()))?;
        let (resource_id, vm_id) = match body.split(' ').collect::<Vec<_>>().as_slice() {
            [resource_id, vm_id] if !vm_id.is_empty() => (*resource_id, *vm_id),
            _ => {
                return Err(AzureError::InvalidToken(
                    "expected a resource id and a VM id".into(),
                ));
            }
        };
        let claimed = VmResourceId::parse(resource_id)?;

        if claimed.subscription_id != self.cloud.subscription_id() {
            return Err(AzureError::TokenRejected(format!(
                "subscription {} is not the cluster's",
                claimed.subscription_id
            )));
        }
        if !claimed
            .resource_group
            .eq_ignore_ascii_case(&self.resource_group)
        {
            return Err(AzureError::TokenRejected(format!(
                "resource group {} is not the cluster's",
                claimed.resource_group
            )));
        }

        let apis = self.cloud.apis();
        let scope = self.cloud.group_scope(&self.resource_group);
        let scale_set = find_unique(
            apis.scale_sets.as_ref(),
            &scope,
            &ListFilter::by_name(&claimed.scale_set),
        )
        .await?
        .filter(|s| TAGS.is_owned_by(&s.tags, &self.cluster_name))
        .ok_or_else(|| {
            AzureError::TokenRejected(format!("scale set {} not found", claimed.scale_set))
        })?;
        let scale_set_id = scale_set.id.clone().unwrap_or_default();

        let filter = ListFilter::by_name(&claimed.instance_id).with_parent(&scale_set_id);
        let vm = find_unique(apis.vms.as_ref(), &scope, &filter)
            .await?
            .ok_or_else(|| {
                AzureError::TokenRejected(format!(
                    "machine {} of {} not found",
                    claimed.instance_id, claimed.scale_set
                ))
            })?;

        if vm.vm_id != vm_id {
            debug!(expected = %vm.vm_id, presented = %vm_id, "VM id mismatch");
            return Err(AzureError::TokenRejected(format!(
                "VM id of {resource_id} does not match"
            )));
        }

        let expected = VmResourceId {
            subscription_id: self.cloud.subscription_id().to_string(),
            resource_group: self.resource_group.clone(),
            scale_set: scale_set.name.clone(),
            instance_id: vm.name.clone(),
        };
        if !expected.to_string().eq_ignore_ascii_case(resource_id) {
            return Err(AzureError::TokenRejected(format!(
                "resource id {resource_id} does not match {expected}"
            )));
        }

        info!(node = %vm.computer_name, scale_set = %scale_set.name, "Verified node");
        Ok(VerifiedNode {
            node_name: vm.computer_name,
            instance_id: expected.to_string(),
            addresses: vm.private_ip.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "/subscriptions/sub-1/resourceGroups/demo.example.com/providers/Microsoft.Compute/virtualMachineScaleSets/nodes-demo-example-com/virtualMachines/3";

    #[test]
    fn test_resource_id_parse_and_format() {
        let id = VmResourceId::parse(ID).unwrap();
        assert_eq!(id.scale_set, "nodes-demo-example-com");
        assert_eq!(id.instance_id, "3");
        assert_eq!(id.to_string(), ID);
    }

    #[test]
    fn test_resource_id_rejects_other_kinds() {
        let disk = "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/disks/d1";
        assert!(matches!(
            VmResourceId::parse(disk),
            Err(AzureError::InvalidToken(_))
        ));
        assert!(VmResourceId::parse("").is_err());
    }

    #[tokio::test]
    async fn test_token_format() {
        let authenticator = AzureAuthenticator::new(FixedMetadata(InstanceMetadata {
            resource_id: ID.into(),
            vm_id: "1f2e".into(),
        }));
        let token = authenticator.create_token().await.unwrap();
        assert_eq!(token, format!("x-azure-id {ID} 1f2e"));
    }
}
