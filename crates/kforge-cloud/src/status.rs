//! Cluster status reconstructed from tagged cloud state

use crate::adapter::{TagConvention, Tags};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole, MemberSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub etcd_clusters: Vec<EtcdClusterStatus>,
}

impl ClusterStatus {
    pub fn etcd_cluster(&self, name: &str) -> Option<&EtcdClusterStatus> {
        self.etcd_clusters.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdClusterStatus {
    /// e.g. `main`, `events`
    pub name: String,
    pub members: Vec<EtcdMemberStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdMemberStatus {
    pub name: String,
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInstance {
    pub id: String,
    /// Kubernetes node backed by this instance, when known
    pub node_name: Option<String>,
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInstanceGroup {
    /// Cloud-side scale group name
    pub human_name: String,
    pub instance_group: String,
    pub min_size: u32,
    pub max_size: u32,
    pub members: Vec<CloudInstance>,
}

/// A Kubernetes node as seen by the API server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    /// Cloud provider id, e.g. `cn-hangzhou.i-123`
    pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiIngressStatus {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

impl ApiIngressStatus {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            hostname: None,
        }
    }
}

/// Read-only queries of a cloud; implementations make no mutating calls
#[async_trait]
pub trait StatusReader: Send + Sync {
    async fn find_cluster_status(&self, cluster: &Cluster) -> Result<ClusterStatus>;

    /// Scale groups of the cluster matched to `groups`
    async fn get_cloud_groups(
        &self,
        cluster: &Cluster,
        groups: &[InstanceGroup],
        nodes: &[NodeInfo],
    ) -> Result<Vec<CloudInstanceGroup>>;

    async fn api_ingress_status(&self, cluster: &Cluster) -> Result<Vec<ApiIngressStatus>>;
}

/// A disk as far as etcd status is concerned
#[derive(Debug, Clone)]
pub struct TaggedVolume<'a> {
    pub id: &'a str,
    pub tags: &'a Tags,
}

/// Groups etcd members by etcd cluster name from disk tags.
///
/// Only disks carrying both the cluster tag and the control-plane role tag
/// count. Unparseable member specs are logged and skipped.
pub fn etcd_status_from_volumes<'a>(
    convention: &TagConvention,
    cluster: &str,
    volumes: impl IntoIterator<Item = TaggedVolume<'a>>,
) -> ClusterStatus {
    let mut grouped: BTreeMap<String, Vec<EtcdMemberStatus>> = BTreeMap::new();

    for volume in volumes {
        if !convention.is_owned_by(volume.tags, cluster)
            || !convention.has_role(volume.tags, InstanceGroupRole::ControlPlane)
        {
            debug!(volume = %volume.id, "Not a control-plane volume of this cluster");
            continue;
        }

        for (etcd_cluster, value) in convention.etcd_entries(volume.tags) {
            match MemberSpec::parse(value) {
                Ok(spec) => grouped
                    .entry(etcd_cluster.to_string())
                    .or_default()
                    .push(EtcdMemberStatus {
                        name: spec.member,
                        volume_id: volume.id.to_string(),
                    }),
                Err(e) => warn!(volume = %volume.id, error = %e, "Ignoring etcd tag"),
            }
        }
    }

    ClusterStatus {
        etcd_clusters: grouped
            .into_iter()
            .map(|(name, mut members)| {
                members.sort_by(|a, b| a.name.cmp(&b.name));
                EtcdClusterStatus { name, members }
            })
            .collect(),
    }
}

/// Node whose provider id ends with the instance id
pub fn match_node<'a>(nodes: &'a [NodeInfo], instance_id: &str) -> Option<&'a NodeInfo> {
    nodes.iter().find(|n| {
        n.provider_id == instance_id
            || n.provider_id.ends_with(&format!(".{instance_id}"))
            || n.provider_id.ends_with(&format!("/{instance_id}"))
    })
}

/// Fails when nothing could be found to reach the API
pub fn require_ingress(cluster: &str, found: Vec<ApiIngressStatus>) -> Result<Vec<ApiIngressStatus>> {
    if found.is_empty() {
        return Err(CloudError::NotFound {
            kind: "ApiIngress".to_string(),
            name: cluster.to_string(),
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALI: TagConvention = TagConvention {
        cluster_key: "KubernetesCluster",
        role_prefix: "k8s.io/role/",
        etcd_prefix: "k8s.io/etcd/",
    };

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_etcd_status_from_master_disk() {
        let master = tags(&[
            ("KubernetesCluster", "c"),
            ("k8s.io/role/master", "1"),
            ("k8s.io/etcd/main", "a/a,b,c"),
        ]);
        let plain = tags(&[("KubernetesCluster", "c"), ("k8s.io/etcd/main", "b/a,b,c")]);

        let status = etcd_status_from_volumes(
            &ALI,
            "c",
            [
                TaggedVolume {
                    id: "d-1",
                    tags: &master,
                },
                TaggedVolume {
                    id: "d-2",
                    tags: &plain,
                },
            ],
        );

        assert_eq!(status.etcd_clusters.len(), 1);
        let main = status.etcd_cluster("main").unwrap();
        assert_eq!(
            main.members,
            vec![EtcdMemberStatus {
                name: "a".into(),
                volume_id: "d-1".into()
            }]
        );
    }

    #[test]
    fn test_etcd_status_ignores_other_clusters_and_bad_specs() {
        let other = tags(&[
            ("KubernetesCluster", "other"),
            ("k8s.io/role/master", "1"),
            ("k8s.io/etcd/main", "a/a"),
        ]);
        let broken = tags(&[
            ("KubernetesCluster", "c"),
            ("k8s.io/role/master", "1"),
            ("k8s.io/etcd/events", "no-slash"),
        ]);
        let status = etcd_status_from_volumes(
            &ALI,
            "c",
            [
                TaggedVolume {
                    id: "d-1",
                    tags: &other,
                },
                TaggedVolume {
                    id: "d-2",
                    tags: &broken,
                },
            ],
        );
        assert!(status.etcd_clusters.is_empty());
    }

    #[test]
    fn test_match_node() {
        let nodes = vec![
            NodeInfo {
                name: "node-a".into(),
                provider_id: "cn-hangzhou.i-1".into(),
            },
            NodeInfo {
                name: "node-b".into(),
                provider_id: "azure:///subscriptions/s/virtualMachines/7".into(),
            },
        ];
        assert_eq!(match_node(&nodes, "i-1").unwrap().name, "node-a");
        assert_eq!(match_node(&nodes, "7").unwrap().name, "node-b");
        assert!(match_node(&nodes, "i-2").is_none());
    }

    #[test]
    fn test_require_ingress() {
        assert!(require_ingress("c", vec![]).unwrap_err().is_not_found());
        assert_eq!(
            require_ingress("c", vec![ApiIngressStatus::ip("1.2.3.4")])
                .unwrap()
                .len(),
            1
        );
    }
}
