//! Instance group definition

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Role of the machines in an instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstanceGroupRole {
    ControlPlane,
    Node,
    Bastion,
}

impl InstanceGroupRole {
    pub const ALL: [InstanceGroupRole; 3] = [
        InstanceGroupRole::ControlPlane,
        InstanceGroupRole::Node,
        InstanceGroupRole::Bastion,
    ];

    /// Plural used in resource names (`masters`, `nodes`, `bastions`)
    pub fn plural(&self) -> &'static str {
        match self {
            InstanceGroupRole::ControlPlane => "masters",
            InstanceGroupRole::Node => "nodes",
            InstanceGroupRole::Bastion => "bastions",
        }
    }

    /// Lower-cased role as written into role tags
    pub fn tag_name(&self) -> &'static str {
        match self {
            InstanceGroupRole::ControlPlane => "master",
            InstanceGroupRole::Node => "node",
            InstanceGroupRole::Bastion => "bastion",
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceGroupRole::ControlPlane => write!(f, "ControlPlane"),
            InstanceGroupRole::Node => write!(f, "Node"),
            InstanceGroupRole::Bastion => write!(f, "Bastion"),
        }
    }
}

/// A homogeneous pool of machines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroup {
    pub name: String,
    pub role: InstanceGroupRole,
    pub machine_type: String,
    pub image: String,

    #[serde(default)]
    pub root_volume_size: Option<u32>,
    #[serde(default)]
    pub root_volume_type: Option<String>,

    pub min_size: u32,
    pub max_size: u32,

    /// Names of cluster subnets the group spans
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,

    #[serde(default)]
    pub associate_public_ip: Option<bool>,

    /// Extra tags applied to cloud resources of the group
    #[serde(default)]
    pub cloud_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<String>,
}

impl InstanceGroup {
    pub fn new(name: impl Into<String>, role: InstanceGroupRole) -> Self {
        Self {
            name: name.into(),
            role,
            machine_type: String::new(),
            image: String::new(),
            root_volume_size: None,
            root_volume_type: None,
            min_size: 1,
            max_size: 1,
            subnets: Vec::new(),
            zones: Vec::new(),
            associate_public_ip: None,
            cloud_labels: BTreeMap::new(),
            node_labels: BTreeMap::new(),
            taints: Vec::new(),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reads a multi-document YAML file of instance groups
    pub fn list_from_file(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ReadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut groups = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&content) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            groups.push(serde_yaml::from_value(value)?);
        }
        Ok(groups)
    }

    pub fn is_control_plane(&self) -> bool {
        self.role == InstanceGroupRole::ControlPlane
    }

    pub fn is_bastion(&self) -> bool {
        self.role == InstanceGroupRole::Bastion
    }
}
