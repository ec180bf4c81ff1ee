//! Collaborators supplying policy documents and instance user data

use crate::error::Result;
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole};
use serde_json::json;

/// RAM policy documents per role
pub trait PolicySource: Send + Sync {
    /// `None` when the role has no policy
    fn policy_document(&self, cluster: &Cluster, role: InstanceGroupRole) -> Result<Option<String>>;
}

/// Boot script of an instance group, before encoding
pub trait UserDataSource: Send + Sync {
    fn user_data(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<String>;
}

/// Trust document letting ECS instances assume a role
pub const ECS_ASSUME_ROLE_POLICY: &str = r#"{"Statement":[{"Action":"sts:AssumeRole","Effect":"Allow","Principal":{"Service":["ecs.aliyuncs.com"]}}],"Version":"1"}"#;

/// Built-in documents: control plane manages ECS, SLB and VPC; nodes read
/// ECS; bastions get nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicies;

impl PolicySource for DefaultPolicies {
    fn policy_document(&self, _cluster: &Cluster, role: InstanceGroupRole) -> Result<Option<String>> {
        let actions: &[&str] = match role {
            InstanceGroupRole::ControlPlane => &["ecs:*", "slb:*", "vpc:*", "ess:Describe*"],
            InstanceGroupRole::Node => &["ecs:Describe*", "ecs:AttachDisk", "ecs:DetachDisk"],
            InstanceGroupRole::Bastion => return Ok(None),
        };
        let document = json!({
            "Version": "1",
            "Statement": [{
                "Effect": "Allow",
                "Action": actions,
                "Resource": ["*"],
            }],
        });
        Ok(Some(document.to_string()))
    }
}

/// Minimal bootstrap script naming the cluster and group
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeupUserData;

impl UserDataSource for NodeupUserData {
    fn user_data(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<String> {
        Ok(format!(
            r#"#!/bin/bash
set -o errexit
set -o nounset

export CLUSTER_NAME="{cluster}"
export INSTANCE_GROUP="{group}"
export INSTANCE_GROUP_ROLE="{role}"

echo "== kforge: bootstrapping ${{INSTANCE_GROUP}} of ${{CLUSTER_NAME}} =="
"#,
            cluster = cluster.name,
            group = group.name,
            role = group.role,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_bastion_has_no_policy() {
        let cluster = fixtures::cluster(None);
        assert!(
            DefaultPolicies
                .policy_document(&cluster, InstanceGroupRole::Bastion)
                .unwrap()
                .is_none()
        );
        let master = DefaultPolicies
            .policy_document(&cluster, InstanceGroupRole::ControlPlane)
            .unwrap()
            .unwrap();
        assert!(master.contains("slb:*"));
    }

    #[test]
    fn test_user_data_names_group() {
        let cluster = fixtures::cluster(None);
        let group = fixtures::group("nodes", InstanceGroupRole::Node, "cn-qingdao-b");
        let script = NodeupUserData.user_data(&cluster, &group).unwrap();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains(r#"INSTANCE_GROUP="nodes""#));
        assert!(script.contains("${INSTANCE_GROUP}"));
    }
}
