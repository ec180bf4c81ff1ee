//! Cloud-side records of every azure kind
//!
//! Resource groups live in the subscription scope; everything else lives in
//! the scope of its resource group. Records reference each other by id.

use kforge_cloud::{CloudResource, Tags};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! cloud_resource {
    (@taggable $tags:ident) => {
        true
    };
    (@taggable) => {
        false
    };
    ($record:ty, $kind:literal $(, parent = $parent:ident)? $(, tags = $tags:ident)?) => {
        impl CloudResource for $record {
            const KIND: &'static str = $kind;
            const TAGGABLE: bool = cloud_resource!(@taggable $($tags)?);

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn name(&self) -> &str {
                &self.name
            }

            $(
            fn parent(&self) -> Option<&str> {
                Some(self.$parent.as_str())
            }
            )?

            $(
            fn tags(&self) -> Option<&Tags> {
                Some(&self.$tags)
            }

            fn tags_mut(&mut self) -> Option<&mut Tags> {
                Some(&mut self.$tags)
            }
            )?

            fn with_id(mut self, id: String) -> Self {
                self.id = Some(id);
                self
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupRecord {
    pub id: Option<String>,
    pub name: String,
    pub location: String,
    pub tags: Tags,
}
cloud_resource!(ResourceGroupRecord, "ResourceGroup", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetworkRecord {
    pub id: Option<String>,
    pub name: String,
    pub cidr: String,
    pub tags: Tags,
}
cloud_resource!(VirtualNetworkRecord, "VirtualNetwork", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub id: Option<String>,
    pub name: String,
    pub virtual_network_id: String,
    pub cidr: String,
    pub network_security_group_id: Option<String>,
    pub route_table_id: Option<String>,
}
cloud_resource!(SubnetRecord, "Subnet", parent = virtual_network_id);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableRecord {
    pub id: Option<String>,
    pub name: String,
    pub tags: Tags,
}
cloud_resource!(RouteTableRecord, "RouteTable", tags = tags);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleProtocol {
    Tcp,
    Udp,
    #[serde(rename = "*")]
    Any,
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleProtocol::Tcp => write!(f, "Tcp"),
            RuleProtocol::Udp => write!(f, "Udp"),
            RuleProtocol::Any => write!(f, "*"),
        }
    }
}

/// Inbound allow rule of a network security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    pub name: String,
    pub priority: u32,
    pub protocol: RuleProtocol,
    pub source_address_prefixes: Vec<String>,
    /// `22`, `30000-32767` or `*`
    pub destination_port_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurityGroupRecord {
    pub id: Option<String>,
    pub name: String,
    pub rules: Vec<SecurityRule>,
    pub tags: Tags,
}
cloud_resource!(NetworkSecurityGroupRecord, "NetworkSecurityGroup", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpRecord {
    pub id: Option<String>,
    pub name: String,
    /// Assigned by the cloud
    pub address: Option<String>,
    pub tags: Tags,
}
cloud_resource!(PublicIpRecord, "PublicIPAddress", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRecord {
    pub id: Option<String>,
    pub name: String,
    /// Front end on a public IP rather than a subnet
    pub external: bool,
    pub public_ip_id: Option<String>,
    pub subnet_id: Option<String>,
    /// Assigned by the cloud
    pub frontend_ip: Option<String>,
    pub tags: Tags,
}
cloud_resource!(LoadBalancerRecord, "LoadBalancer", tags = tags);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    #[default]
    Creating,
    Updating,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmScaleSetRecord {
    pub id: Option<String>,
    pub name: String,
    pub sku: String,
    pub capacity: u32,
    pub subnet_id: String,
    pub load_balancer_id: Option<String>,
    pub computer_name_prefix: String,
    pub admin_user: String,
    pub ssh_public_key: String,
    /// Base64
    pub user_data: Option<String>,
    pub require_public_ip: bool,
    /// Zone numbers, e.g. `["1", "2"]`
    pub zones: Vec<String>,
    /// System-assigned identity, set by the cloud
    pub principal_id: Option<String>,
    pub provisioning_state: ProvisioningState,
    pub tags: Tags,
}
cloud_resource!(VmScaleSetRecord, "VMScaleSet", tags = tags);

/// Machine of a scale set; the name is its instance index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: Option<String>,
    pub name: String,
    pub scale_set_id: String,
    /// Stable UUID reported by instance metadata
    pub vm_id: String,
    pub computer_name: String,
    pub private_ip: Option<String>,
    pub data_disk_ids: Vec<String>,
}
cloud_resource!(VmRecord, "VMScaleSetVM", parent = scale_set_id);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub id: Option<String>,
    pub name: String,
    pub zones: Vec<String>,
    pub size_gb: u32,
    pub sku: String,
    pub tags: Tags,
}
cloud_resource!(DiskRecord, "Disk", tags = tags);

/// Grant of a role to a principal over a resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignmentRecord {
    pub id: Option<String>,
    pub name: String,
    pub principal_id: String,
    pub role_definition_id: String,
}
cloud_resource!(RoleAssignmentRecord, "RoleAssignment");
