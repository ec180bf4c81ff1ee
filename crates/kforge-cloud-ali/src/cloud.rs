//! Ali cloud facade
//!
//! One [`ResourceApi`] per kind, each wrapped in [`RetryingApi`], plus the
//! region scope and the ali tag convention.

use crate::records::*;
use kforge_cloud::{
    Capabilities, CloudResource, PollConfig, ResourceApi, RetryConfig, RetryingApi, Scope,
    TagConvention,
};
use kforge_config::{AliCredentials, EngineConfig};
use std::sync::Arc;
use tracing::info;

/// Tag keys used on ali; `/` is allowed in keys
pub const TAGS: TagConvention = TagConvention {
    cluster_key: "KubernetesCluster",
    role_prefix: "k8s.io/role/",
    etcd_prefix: "k8s.io/etcd/",
};

/// Per-kind adapters of one ali account
#[derive(Clone)]
pub struct AliApis {
    pub vpcs: Arc<dyn ResourceApi<VpcRecord>>,
    pub vswitches: Arc<dyn ResourceApi<VSwitchRecord>>,
    pub nat_gateways: Arc<dyn ResourceApi<NatGatewayRecord>>,
    pub eips: Arc<dyn ResourceApi<EipRecord>>,
    pub snat_entries: Arc<dyn ResourceApi<SnatEntryRecord>>,
    pub security_groups: Arc<dyn ResourceApi<SecurityGroupRecord>>,
    pub security_group_rules: Arc<dyn ResourceApi<SecurityGroupRuleRecord>>,
    pub load_balancers: Arc<dyn ResourceApi<LoadBalancerRecord>>,
    pub listeners: Arc<dyn ResourceApi<ListenerRecord>>,
    pub white_lists: Arc<dyn ResourceApi<WhiteListRecord>>,
    pub scaling_groups: Arc<dyn ResourceApi<ScalingGroupRecord>>,
    pub scaling_configurations: Arc<dyn ResourceApi<ScalingConfigurationRecord>>,
    pub key_pairs: Arc<dyn ResourceApi<KeyPairRecord>>,
    pub ram_roles: Arc<dyn ResourceApi<RamRoleRecord>>,
    pub ram_policies: Arc<dyn ResourceApi<RamPolicyRecord>>,
    pub disks: Arc<dyn ResourceApi<DiskRecord>>,
    pub instances: Arc<dyn ResourceApi<InstanceRecord>>,
}

fn retrying<R: CloudResource>(
    api: Arc<dyn ResourceApi<R>>,
    config: &RetryConfig,
) -> Arc<dyn ResourceApi<R>> {
    RetryingApi::wrap(api, config.clone())
}

impl AliApis {
    /// Wraps every adapter in the retry layer
    pub fn with_retry(self, config: &RetryConfig) -> Self {
        Self {
            vpcs: retrying(self.vpcs, config),
            vswitches: retrying(self.vswitches, config),
            nat_gateways: retrying(self.nat_gateways, config),
            eips: retrying(self.eips, config),
            snat_entries: retrying(self.snat_entries, config),
            security_groups: retrying(self.security_groups, config),
            security_group_rules: retrying(self.security_group_rules, config),
            load_balancers: retrying(self.load_balancers, config),
            listeners: retrying(self.listeners, config),
            white_lists: retrying(self.white_lists, config),
            scaling_groups: retrying(self.scaling_groups, config),
            scaling_configurations: retrying(self.scaling_configurations, config),
            key_pairs: retrying(self.key_pairs, config),
            ram_roles: retrying(self.ram_roles, config),
            ram_policies: retrying(self.ram_policies, config),
            disks: retrying(self.disks, config),
            instances: retrying(self.instances, config),
        }
    }
}

/// Every kind the ali adapters serve
pub fn default_capabilities() -> Capabilities {
    [
        "Vpc",
        "VSwitch",
        "NatGateway",
        "Eip",
        "SnatEntry",
        "SecurityGroup",
        "SecurityGroupRule",
        "LoadBalancer",
        "Listener",
        "WhiteList",
        "ScalingGroup",
        "LaunchConfiguration",
        "SshKey",
        "RamRole",
        "RamPolicy",
        "Disk",
    ]
    .into_iter()
    .fold(Capabilities::new(), Capabilities::with)
}

pub struct AliCloud {
    region: String,
    scope: Scope,
    apis: AliApis,
    capabilities: Capabilities,
    poll: PollConfig,
}

impl AliCloud {
    pub fn new(region: impl Into<String>, apis: AliApis, config: &EngineConfig) -> Self {
        let region = region.into();
        Self {
            scope: Scope::region(&region),
            region,
            apis: apis.with_retry(&RetryConfig::from(&config.retry)),
            capabilities: default_capabilities(),
            poll: PollConfig::from(&config.poll),
        }
    }

    /// Like [`AliCloud::new`], failing early when the account's access
    /// keys are not in the environment
    pub fn connect(
        region: impl Into<String>,
        apis: AliApis,
        config: &EngineConfig,
    ) -> kforge_cloud::Result<Self> {
        let credentials = AliCredentials::from_env()?;
        let cloud = Self::new(region, apis, config);
        info!(
            region = %cloud.region,
            access_key_id = %credentials.access_key_id,
            "Connected to ali"
        );
        Ok(cloud)
    }

    /// Narrows the kinds builders may emit
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn apis(&self) -> &AliApis {
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

impl std::fmt::Debug for AliCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliCloud")
            .field("region", &self.region)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
