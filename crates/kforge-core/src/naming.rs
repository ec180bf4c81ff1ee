//! Resource names derived from the cluster name
//!
//! Discovery finds untaggable resources by these names, so every builder and
//! every discovery path must go through the functions here.

use crate::model::{InstanceGroup, InstanceGroupRole};

/// `demo.example.com` → `demo-example-com`
pub fn dashify(cluster: &str) -> String {
    cluster.replace('.', "-")
}

pub fn network(cluster: &str) -> String {
    cluster.to_string()
}

pub fn subnet(subnet: &str, cluster: &str) -> String {
    format!("{subnet}.{cluster}")
}

pub fn nat_gateway(cluster: &str) -> String {
    cluster.to_string()
}

pub fn eip(cluster: &str) -> String {
    cluster.to_string()
}

pub fn snat_entry(subnet: &str, cluster: &str) -> String {
    format!("{subnet}.{cluster}")
}

pub fn security_group(role: InstanceGroupRole, cluster: &str) -> String {
    format!("{}.{cluster}", role.plural())
}

/// Name of an intra-cluster or external-access rule
pub fn security_group_rule(prefix: &str, role: InstanceGroupRole, detail: &str) -> String {
    if detail.is_empty() {
        format!("{prefix}-{}", role.plural())
    } else {
        format!("{prefix}-{}-{detail}", role.plural())
    }
}

pub fn identity_role(role: InstanceGroupRole, cluster: &str) -> String {
    format!("{}-{}", role.plural(), dashify(cluster))
}

pub fn identity_policy(role: InstanceGroupRole, cluster: &str) -> String {
    format!("{}-policy", identity_role(role, cluster))
}

pub fn ali_load_balancer(cluster: &str) -> String {
    format!("api.{cluster}")
}

pub fn azure_load_balancer(cluster: &str) -> String {
    format!("api-{}", dashify(cluster))
}

pub fn azure_public_ip(cluster: &str) -> String {
    azure_load_balancer(cluster)
}

pub fn ssh_key(cluster: &str) -> String {
    format!("k8s.sshkey.{cluster}")
}

/// Last three characters of the group name, used to tell control-plane
/// groups apart
fn name_suffix(name: &str) -> &str {
    let start = name
        .char_indices()
        .rev()
        .nth(2)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &name[start..]
}

pub fn scale_group(group: &InstanceGroup, cluster: &str) -> String {
    match group.role {
        InstanceGroupRole::ControlPlane => {
            format!("{}.masters.{cluster}", name_suffix(&group.name))
        }
        role => format!("{}.{cluster}", role.plural()),
    }
}

/// Azure scale-set names may not contain dots
pub fn azure_scale_set(group: &InstanceGroup, cluster: &str) -> String {
    format!("{}.{cluster}", group.name).replace('.', "-")
}

pub fn launch_configuration_prefix(group: &InstanceGroup, cluster: &str) -> String {
    scale_group(group, cluster)
}

pub fn etcd_volume(member: &str, etcd_cluster: &str, cluster: &str) -> String {
    format!("{member}.etcd-{etcd_cluster}.{cluster}")
}

pub fn azure_etcd_volume(member: &str, etcd_cluster: &str, cluster: &str) -> String {
    etcd_volume(member, etcd_cluster, cluster).replace('.', "-")
}

pub fn role_assignment(group: &InstanceGroup, cluster: &str) -> String {
    format!("{}-role", azure_scale_set(group, cluster))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_names() {
        let c = "demo.example.com";
        assert_eq!(subnet("cn-qingdao-b", c), "cn-qingdao-b.demo.example.com");
        assert_eq!(security_group(InstanceGroupRole::Node, c), "nodes.demo.example.com");
        assert_eq!(identity_role(InstanceGroupRole::ControlPlane, c), "masters-demo-example-com");
        assert_eq!(ali_load_balancer(c), "api.demo.example.com");
        assert_eq!(azure_load_balancer(c), "api-demo-example-com");
        assert_eq!(ssh_key(c), "k8s.sshkey.demo.example.com");
        assert_eq!(etcd_volume("a", "main", c), "a.etcd-main.demo.example.com");
    }

    #[test]
    fn test_scale_group_names() {
        let c = "demo.example.com";
        let master = InstanceGroup::new("master-cn-qingdao-b", InstanceGroupRole::ControlPlane);
        assert_eq!(scale_group(&master, c), "o-b.masters.demo.example.com");

        let short = InstanceGroup::new("m", InstanceGroupRole::ControlPlane);
        assert_eq!(scale_group(&short, c), "m.masters.demo.example.com");

        let nodes = InstanceGroup::new("nodes-small", InstanceGroupRole::Node);
        assert_eq!(scale_group(&nodes, c), "nodes.demo.example.com");

        assert_eq!(azure_scale_set(&nodes, c), "nodes-small-demo-example-com");
    }
}
