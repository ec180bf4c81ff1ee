//! Cloud-side records of every ali kind
//!
//! Records reference each other by cloud id. The parent field of a record
//! is part of its upsert key.

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
pub struct VpcRecord {
    pub id: Option<String>,
    pub name: String,
    pub cidr_block: String,
    pub tags: Tags,
}
cloud_resource!(VpcRecord, "Vpc", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VSwitchRecord {
    pub id: Option<String>,
    pub name: String,
    pub vpc_id: String,
    pub zone_id: String,
    pub cidr_block: String,
    pub tags: Tags,
}
cloud_resource!(VSwitchRecord, "VSwitch", parent = vpc_id, tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGatewayRecord {
    pub id: Option<String>,
    pub name: String,
    pub vpc_id: String,
    pub tags: Tags,
}
cloud_resource!(NatGatewayRecord, "NatGateway", parent = vpc_id, tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EipRecord {
    pub id: Option<String>,
    pub name: String,
    /// Assigned by the cloud on allocation
    pub ip_address: Option<String>,
    pub bandwidth: u32,
    /// NAT gateway the address is bound to
    pub instance_id: Option<String>,
    pub tags: Tags,
}
cloud_resource!(EipRecord, "Eip", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnatEntryRecord {
    pub id: Option<String>,
    pub name: String,
    pub nat_gateway_id: String,
    pub vswitch_id: String,
    pub snat_ip: String,
}
cloud_resource!(SnatEntryRecord, "SnatEntry", parent = nat_gateway_id);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: Option<String>,
    pub name: String,
    pub vpc_id: String,
    pub tags: Tags,
}
cloud_resource!(SecurityGroupRecord, "SecurityGroup", parent = vpc_id, tags = tags);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    Tcp,
    Udp,
    All,
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Tcp => write!(f, "tcp"),
            IpProtocol::Udp => write!(f, "udp"),
            IpProtocol::All => write!(f, "all"),
        }
    }
}

/// Ingress permission of a security group; named by its description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRuleRecord {
    pub id: Option<String>,
    pub name: String,
    pub security_group_id: String,
    pub protocol: IpProtocol,
    /// `from/to`, `-1/-1` for every port
    pub port_range: String,
    pub source_cidr: Option<String>,
    pub source_group_id: Option<String>,
}
cloud_resource!(SecurityGroupRuleRecord, "SecurityGroupRule", parent = security_group_id);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Internet,
    Intranet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRecord {
    pub id: Option<String>,
    pub name: String,
    pub address_type: AddressType,
    pub address: Option<String>,
    pub tags: Tags,
}
cloud_resource!(LoadBalancerRecord, "LoadBalancer", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRecord {
    pub id: Option<String>,
    pub name: String,
    pub load_balancer_id: String,
    pub frontend_port: u16,
    pub backend_port: u16,
    pub protocol: IpProtocol,
}
cloud_resource!(ListenerRecord, "Listener", parent = load_balancer_id);

/// Access-control list of one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteListRecord {
    pub id: Option<String>,
    pub name: String,
    pub load_balancer_id: String,
    pub listener_port: u16,
    pub source_items: Vec<String>,
}
cloud_resource!(WhiteListRecord, "WhiteList", parent = load_balancer_id);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    #[default]
    Inactive,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroupRecord {
    pub id: Option<String>,
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub vswitch_ids: Vec<String>,
    pub load_balancer_ids: Vec<String>,
    pub active_configuration_id: Option<String>,
    pub state: GroupState,
    pub tags: Tags,
}
cloud_resource!(ScalingGroupRecord, "ScalingGroup", tags = tags);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfigurationRecord {
    pub id: Option<String>,
    /// `<prefix>-<yyyymmddThhmmss>`
    pub name: String,
    pub scaling_group_id: String,
    pub image_id: String,
    pub instance_type: String,
    pub system_disk_size: Option<u32>,
    pub system_disk_category: Option<String>,
    pub key_pair_id: Option<String>,
    pub ram_role_id: Option<String>,
    pub security_group_id: Option<String>,
    /// Base64
    pub user_data: Option<String>,
    pub tags: Tags,
    /// RFC 3339, UTC
    pub creation_time: String,
}
cloud_resource!(
    ScalingConfigurationRecord,
    "ScalingConfiguration",
    parent = scaling_group_id,
    tags = tags
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairRecord {
    pub id: Option<String>,
    pub name: String,
    pub public_key: String,
}
cloud_resource!(KeyPairRecord, "KeyPair");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamRoleRecord {
    pub id: Option<String>,
    pub name: String,
    pub assume_role_policy: String,
}
cloud_resource!(RamRoleRecord, "RamRole");

/// Policy attached to one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamPolicyRecord {
    pub id: Option<String>,
    pub name: String,
    pub role_id: String,
    pub document: String,
}
cloud_resource!(RamPolicyRecord, "RamPolicy", parent = role_id);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub id: Option<String>,
    pub name: String,
    pub zone_id: String,
    pub size_gb: u32,
    pub category: String,
    pub tags: Tags,
}
cloud_resource!(DiskRecord, "Disk", tags = tags);

/// Instance launched by a scaling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: Option<String>,
    pub name: String,
    pub scaling_group_id: String,
    pub zone_id: String,
    pub private_ip: Option<String>,
}
cloud_resource!(InstanceRecord, "Instance", parent = scaling_group_id);
