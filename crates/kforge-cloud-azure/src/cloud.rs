//! Azure cloud facade
//!
//! Resource groups live in the subscription, listed under the location
//! scope; every other kind lives in the scope of its resource group.

use crate::records::*;
use kforge_cloud::{
    Capabilities, CloudResource, PollConfig, ResourceApi, RetryConfig, RetryingApi, Scope,
    TagConvention,
};
use kforge_config::{AzureAuth, AzureCredentials, EngineConfig};
use std::sync::Arc;
use tracing::info;

/// Tag keys used on azure; keys may not contain `/`
pub const TAGS: TagConvention = TagConvention {
    cluster_key: "KubernetesCluster",
    role_prefix: "k8s.io_role_",
    etcd_prefix: "k8s.io_etcd_",
};

/// Per-kind adapters of one azure subscription
#[derive(Clone)]
pub struct AzureApis {
    pub resource_groups: Arc<dyn ResourceApi<ResourceGroupRecord>>,
    pub virtual_networks: Arc<dyn ResourceApi<VirtualNetworkRecord>>,
    pub subnets: Arc<dyn ResourceApi<SubnetRecord>>,
    pub route_tables: Arc<dyn ResourceApi<RouteTableRecord>>,
    pub network_security_groups: Arc<dyn ResourceApi<NetworkSecurityGroupRecord>>,
    pub public_ips: Arc<dyn ResourceApi<PublicIpRecord>>,
    pub load_balancers: Arc<dyn ResourceApi<LoadBalancerRecord>>,
    pub scale_sets: Arc<dyn ResourceApi<VmScaleSetRecord>>,
    pub vms: Arc<dyn ResourceApi<VmRecord>>,
    pub disks: Arc<dyn ResourceApi<DiskRecord>>,
    pub role_assignments: Arc<dyn ResourceApi<RoleAssignmentRecord>>,
}

fn retrying<R: CloudResource>(
    api: Arc<dyn ResourceApi<R>>,
    config: &RetryConfig,
) -> Arc<dyn ResourceApi<R>> {
    RetryingApi::wrap(api, config.clone())
}

impl AzureApis {
    /// Wraps every adapter in the retry layer
    pub fn with_retry(self, config: &RetryConfig) -> Self {
        Self {
            resource_groups: retrying(self.resource_groups, config),
            virtual_networks: retrying(self.virtual_networks, config),
            subnets: retrying(self.subnets, config),
            route_tables: retrying(self.route_tables, config),
            network_security_groups: retrying(self.network_security_groups, config),
            public_ips: retrying(self.public_ips, config),
            load_balancers: retrying(self.load_balancers, config),
            scale_sets: retrying(self.scale_sets, config),
            vms: retrying(self.vms, config),
            disks: retrying(self.disks, config),
            role_assignments: retrying(self.role_assignments, config),
        }
    }
}

/// Every kind the azure adapters serve
pub fn default_capabilities() -> Capabilities {
    [
        "ResourceGroup",
        "VirtualNetwork",
        "Subnet",
        "RouteTable",
        "NetworkSecurityGroup",
        "PublicIPAddress",
        "LoadBalancer",
        "VMScaleSet",
        "RoleAssignment",
        "Disk",
    ]
    .into_iter()
    .fold(Capabilities::new(), Capabilities::with)
}

pub struct AzureCloud {
    subscription_id: String,
    location: String,
    apis: AzureApis,
    capabilities: Capabilities,
    poll: PollConfig,
}

impl AzureCloud {
    pub fn new(
        subscription_id: impl Into<String>,
        location: impl Into<String>,
        apis: AzureApis,
        config: &EngineConfig,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            location: location.into(),
            apis: apis.with_retry(&RetryConfig::from(&config.retry)),
            capabilities: default_capabilities(),
            poll: PollConfig::from(&config.poll),
        }
    }

    /// Like [`AzureCloud::new`], with the subscription taken from the
    /// environment; fails early when no credentials are configured
    pub fn connect(
        location: impl Into<String>,
        apis: AzureApis,
        config: &EngineConfig,
    ) -> kforge_cloud::Result<Self> {
        let credentials = AzureCredentials::from_env()?;
        let cloud = Self::new(&credentials.subscription_id, location, apis, config);
        let auth = match &credentials.auth {
            AzureAuth::ClientSecret { .. } => "client-secret",
            AzureAuth::ManagedIdentity { .. } => "managed-identity",
        };
        info!(
            location = %cloud.location,
            subscription = %cloud.subscription_id,
            auth = auth,
            "Connected to azure"
        );
        Ok(cloud)
    }

    /// Narrows the kinds builders may emit
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Scope resource groups are listed in
    pub fn subscription_scope(&self) -> Scope {
        Scope::region(&self.location)
    }

    /// Scope of everything inside `resource_group`
    pub fn group_scope(&self, resource_group: &str) -> Scope {
        Scope::resource_group(resource_group, &self.location)
    }

    pub fn apis(&self) -> &AzureApis {
        &self.apis
    }

    pub fn tags(&self) -> &TagConvention {
        &TAGS
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn poll(&self) -> PollConfig {
        self.poll
    }
}

impl std::fmt::Debug for AzureCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCloud")
            .field("subscription_id", &self.subscription_id)
            .field("location", &self.location)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AzureMemory;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "AZURE_SUBSCRIPTION_ID",
        "AZURE_TENANT_ID",
        "AZURE_CLIENT_ID",
        "AZURE_CLIENT_SECRET",
        "AZURE_USE_MANAGED_IDENTITY",
    ];

    #[test]
    fn test_tag_keys_have_no_slash() {
        let tags = TAGS.role_tags("c", kforge_core::InstanceGroupRole::ControlPlane);
        assert!(tags.keys().all(|k| !k.contains('/')));
        assert!(tags.contains_key("k8s.io_role_master"));
    }

    #[test]
    #[serial]
    fn test_connect_requires_subscription() {
        temp_env::with_vars_unset(VARS, || {
            let memory = AzureMemory::new();
            let err = AzureCloud::connect("westeurope", memory.apis(), &EngineConfig::default())
                .unwrap_err();
            assert_eq!(err.kind(), kforge_cloud::ErrorKind::Credentials);
        });
    }

    #[test]
    #[serial]
    fn test_connect_with_managed_identity() {
        temp_env::with_vars_unset(VARS, || {
            temp_env::with_vars(
                [
                    ("AZURE_SUBSCRIPTION_ID", Some("sub-1")),
                    ("AZURE_USE_MANAGED_IDENTITY", Some("true")),
                ],
                || {
                    let memory = AzureMemory::new();
                    let cloud =
                        AzureCloud::connect("westeurope", memory.apis(), &EngineConfig::default())
                            .unwrap();
                    assert_eq!(cloud.subscription_id(), "sub-1");
                    assert_eq!(
                        cloud.group_scope("rg"),
                        Scope::resource_group("rg", "westeurope")
                    );
                },
            );
        });
    }
}
