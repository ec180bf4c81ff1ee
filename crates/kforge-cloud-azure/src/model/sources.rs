//! Instance user data

use crate::error::Result;
use kforge_core::{Cluster, InstanceGroup};

/// Boot script of an instance group, before encoding
pub trait UserDataSource: Send + Sync {
    fn user_data(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<String>;
}

/// Minimal bootstrap script naming the cluster, group and resource group
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeupUserData;

impl UserDataSource for NodeupUserData {
    fn user_data(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<String> {
        Ok(format!(
            r#"#!/bin/bash
set -o errexit
set -o nounset

export CLUSTER_NAME="{cluster}"
export AZURE_RESOURCE_GROUP="{resource_group}"
export INSTANCE_GROUP="{group}"
export INSTANCE_GROUP_ROLE="{role}"

echo "== kforge: bootstrapping ${{INSTANCE_GROUP}} of ${{CLUSTER_NAME}} =="
"#,
            cluster = cluster.name,
            resource_group = cluster.resource_group_name(),
            group = group.name,
            role = group.role,
        ))
    }
}
