//! Cluster definition

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Target cloud of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderId {
    /// Region-scoped cloud, ownership by cluster tag
    Ali,
    /// Resource-group-scoped cloud
    Azure,
}

impl fmt::Display for CloudProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProviderId::Ali => write!(f, "ali"),
            CloudProviderId::Azure => write!(f, "azure"),
        }
    }
}

/// The declarative cluster value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// DNS-like cluster name, e.g. `demo.example.com`
    pub name: String,
    pub spec: ClusterSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub cloud_provider: CloudProviderId,

    #[serde(default)]
    pub networking: NetworkingSpec,

    #[serde(default)]
    pub api: ApiSpec,

    /// CIDRs allowed to reach SSH
    #[serde(default)]
    pub ssh_access: Vec<String>,

    /// CIDRs allowed to reach the node-port range
    #[serde(default)]
    pub node_port_access: Vec<String>,

    #[serde(default)]
    pub node_port_range: PortRange,

    #[serde(default)]
    pub etcd_clusters: Vec<EtcdClusterSpec>,

    #[serde(default)]
    pub topology: TopologySpec,

    #[serde(default)]
    pub dns: DnsMode,

    #[serde(default)]
    pub azure: Option<AzureSpec>,

    /// Public half of the admin SSH key pair
    #[serde(default)]
    pub ssh_public_key: Option<String>,
}

impl ClusterSpec {
    pub fn new(cloud_provider: CloudProviderId) -> Self {
        Self {
            cloud_provider,
            networking: NetworkingSpec::default(),
            api: ApiSpec::default(),
            ssh_access: Vec::new(),
            node_port_access: Vec::new(),
            node_port_range: PortRange::default(),
            etcd_clusters: Vec::new(),
            topology: TopologySpec::default(),
            dns: DnsMode::default(),
            azure: None,
            ssh_public_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    pub network_cidr: String,

    /// Id of an existing network; set means the network is shared
    #[serde(default)]
    pub network_id: Option<String>,

    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub name: String,
    pub zone: String,
    pub cidr: String,
    #[serde(rename = "type")]
    pub kind: SubnetType,
    /// Id of an existing subnet
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    Public,
    Private,
    Utility,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerSpec>,

    /// CIDRs allowed to reach the Kubernetes API
    #[serde(default)]
    pub access: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    #[serde(rename = "type")]
    pub kind: LoadBalancerType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerType {
    Internal,
    Public,
}

impl fmt::Display for LoadBalancerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancerType::Internal => write!(f, "Internal"),
            LoadBalancerType::Public => write!(f, "Public"),
        }
    }
}

/// Node-port range as `base` and `size`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub base: u16,
    pub size: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            base: 30000,
            size: 2768,
        }
    }
}

impl PortRange {
    /// Last port of the range (inclusive); `base` for an empty range
    pub fn last(&self) -> u32 {
        (self.base as u32 + self.size as u32).saturating_sub(1).max(self.base as u32)
    }

    /// `base<sep>last`, e.g. `30000/32767`
    pub fn format_with(&self, separator: char) -> String {
        format!("{}{}{}", self.base, separator, self.last())
    }

    pub fn contains(&self, port: u16) -> bool {
        let port = port as u32;
        self.size > 0 && port >= self.base as u32 && port <= self.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// e.g. `main`, `events`
    pub name: String,
    pub members: Vec<EtcdMemberSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdMemberSpec {
    pub name: String,
    pub instance_group: String,
    #[serde(default)]
    pub volume_size: Option<u32>,
    #[serde(default)]
    pub volume_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologySpec {
    #[serde(default)]
    pub bastion: Option<BastionSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    #[serde(default)]
    pub public_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsMode {
    #[default]
    Public,
    Private,
    Gossip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Existing resource group; set means the group is shared
    #[serde(default)]
    pub resource_group_name: Option<String>,
    /// Existing route table; set means the table is shared
    #[serde(default)]
    pub route_table_name: Option<String>,
    #[serde(default)]
    pub admin_user: Option<String>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, spec: ClusterSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ReadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// The network is pre-existing and must not be mutated
    pub fn shared_vpc(&self) -> bool {
        self.spec
            .networking
            .network_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }

    pub fn load_balancer_type(&self) -> Option<LoadBalancerType> {
        self.spec.api.load_balancer.as_ref().map(|lb| lb.kind)
    }

    pub fn uses_bastion(&self) -> bool {
        self.spec.topology.bastion.is_some()
    }

    /// Gossip clusters are recognised by mode or by the `.k8s.local` suffix
    pub fn is_gossip(&self) -> bool {
        self.spec.dns == DnsMode::Gossip || self.name.ends_with(".k8s.local")
    }

    pub fn uses_private_dns(&self) -> bool {
        self.spec.dns == DnsMode::Private
    }

    /// Resource group holding every Azure resource of the cluster
    pub fn resource_group_name(&self) -> String {
        self.spec
            .azure
            .as_ref()
            .and_then(|a| a.resource_group_name.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn is_shared_resource_group(&self) -> bool {
        self.spec
            .azure
            .as_ref()
            .is_some_and(|a| a.resource_group_name.is_some())
    }

    pub fn route_table_name(&self) -> String {
        self.spec
            .azure
            .as_ref()
            .and_then(|a| a.route_table_name.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn is_shared_route_table(&self) -> bool {
        self.spec
            .azure
            .as_ref()
            .is_some_and(|a| a.route_table_name.is_some())
    }

    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.spec.networking.subnets.iter().find(|s| s.name == name)
    }
}
