//! Read-only cluster status on ali

use crate::cloud::{AliCloud, TAGS};
use async_trait::async_trait;
use kforge_cloud::status::{TaggedVolume, etcd_status_from_volumes, match_node, require_ingress};
use kforge_cloud::{
    ApiIngressStatus, CloudInstance, CloudInstanceGroup, ClusterStatus, ListFilter, NodeInfo,
    Result, StatusReader, find_unique,
};
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole, naming};
use tracing::{debug, warn};

impl AliCloud {
    async fn group_instances(&self, group_id: &str) -> Result<Vec<crate::records::InstanceRecord>> {
        self.apis()
            .instances
            .list(self.scope(), &ListFilter::by_parent(group_id))
            .await
    }
}

#[async_trait]
impl StatusReader for AliCloud {
    async fn find_cluster_status(&self, cluster: &Cluster) -> Result<ClusterStatus> {
        let filter = ListFilter::by_tags(TAGS.role_tags(&cluster.name, InstanceGroupRole::ControlPlane));
        let disks = self.apis().disks.list(self.scope(), &filter).await?;
        debug!(cluster = %cluster.name, disks = disks.len(), "Reading etcd status");

        let volumes = disks.iter().filter_map(|d| {
            d.id.as_deref().map(|id| TaggedVolume { id, tags: &d.tags })
        });
        Ok(etcd_status_from_volumes(&TAGS, &cluster.name, volumes))
    }

    async fn get_cloud_groups(
        &self,
        cluster: &Cluster,
        groups: &[InstanceGroup],
        nodes: &[NodeInfo],
    ) -> Result<Vec<CloudInstanceGroup>> {
        let mut found = Vec::new();
        for group in groups {
            let name = naming::scale_group(group, &cluster.name);
            let filter = ListFilter::by_tags(TAGS.cluster_tags(&cluster.name)).with_name(&name);
            let Some(record) =
                find_unique(self.apis().scaling_groups.as_ref(), self.scope(), &filter).await?
            else {
                warn!(group = %group.name, scaling_group = %name, "Scaling group not found");
                continue;
            };
            let Some(group_id) = record.id.as_deref() else {
                continue;
            };

            let members = self
                .group_instances(group_id)
                .await?
                .into_iter()
                .filter_map(|instance| {
                    let id = instance.id?;
                    Some(CloudInstance {
                        node_name: match_node(nodes, &id).map(|n| n.name.clone()),
                        id,
                        private_ip: instance.private_ip,
                    })
                })
                .collect();

            found.push(CloudInstanceGroup {
                human_name: record.name,
                instance_group: group.name.clone(),
                min_size: record.min_size,
                max_size: record.max_size,
                members,
            });
        }
        Ok(found)
    }

    async fn api_ingress_status(&self, cluster: &Cluster) -> Result<Vec<ApiIngressStatus>> {
        let mut found = Vec::new();

        if cluster.load_balancer_type().is_some() {
            let lb = find_unique(
                self.apis().load_balancers.as_ref(),
                self.scope(),
                &ListFilter::by_name(naming::ali_load_balancer(&cluster.name)),
            )
            .await?;
            found.extend(lb.and_then(|lb| lb.address).map(ApiIngressStatus::ip));
        } else {
            let owned = ListFilter::by_tags(TAGS.role_tags(&cluster.name, InstanceGroupRole::ControlPlane));
            for group in self.apis().scaling_groups.list(self.scope(), &owned).await? {
                let Some(group_id) = group.id.as_deref() else {
                    continue;
                };
                for instance in self.group_instances(group_id).await? {
                    found.extend(instance.private_ip.map(ApiIngressStatus::ip));
                }
            }
        }

        require_ingress(&cluster.name, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AliMemory;
    use crate::records::{AddressType, DiskRecord, GroupState, LoadBalancerRecord, ScalingGroupRecord};
    use kforge_cloud::{CloudError, Scope};
    use kforge_config::EngineConfig;
    use kforge_core::{ApiSpec, CloudProviderId, ClusterSpec, LoadBalancerSpec, LoadBalancerType};

    const CLUSTER: &str = "demo.example.com";

    fn scope() -> Scope {
        Scope::region("cn-qingdao")
    }

    fn cluster(load_balancer: bool) -> Cluster {
        let mut spec = ClusterSpec::new(CloudProviderId::Ali);
        if load_balancer {
            spec.api = ApiSpec {
                load_balancer: Some(LoadBalancerSpec {
                    kind: LoadBalancerType::Public,
                }),
                access: vec![],
            };
        }
        Cluster::new(CLUSTER, spec)
    }

    fn master_group(memory: &AliMemory) -> String {
        memory
            .scaling_groups
            .insert(
                &scope(),
                ScalingGroupRecord {
                    id: None,
                    name: format!("o-b.masters.{CLUSTER}"),
                    min_size: 1,
                    max_size: 1,
                    vswitch_ids: vec![],
                    load_balancer_ids: vec![],
                    active_configuration_id: None,
                    state: GroupState::Active,
                    tags: TAGS.role_tags(CLUSTER, InstanceGroupRole::ControlPlane),
                },
            )
            .id
            .unwrap()
    }

    #[tokio::test]
    async fn test_etcd_members_from_disk_tags() {
        let (cloud, memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let mut tags = TAGS.role_tags("c", InstanceGroupRole::ControlPlane);
        tags.insert("k8s.io/etcd/main".into(), "a/a,b,c".into());
        let disk = memory.disks.insert(
            &scope(),
            DiskRecord {
                id: None,
                name: "a.etcd-main.c".into(),
                zone_id: "cn-qingdao-b".into(),
                size_gb: 20,
                category: "cloud_ssd".into(),
                tags,
            },
        );
        let mut untagged = TAGS.cluster_tags("c");
        untagged.insert("k8s.io/etcd/main".into(), "b/a,b,c".into());
        memory.disks.insert(
            &scope(),
            DiskRecord {
                id: None,
                name: "b.etcd-main.c".into(),
                zone_id: "cn-qingdao-b".into(),
                size_gb: 20,
                category: "cloud_ssd".into(),
                tags: untagged,
            },
        );

        let mut c = cluster(false);
        c.name = "c".into();
        let status = cloud.find_cluster_status(&c).await.unwrap();

        let main = status.etcd_cluster("main").unwrap();
        assert_eq!(main.members.len(), 1);
        assert_eq!(main.members[0].name, "a");
        assert_eq!(Some(&main.members[0].volume_id), disk.id.as_ref());
    }

    #[tokio::test]
    async fn test_cloud_groups_match_nodes() {
        let (cloud, memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let group_id = master_group(&memory);
        let instance = memory.launch_instance(&scope(), &group_id, "cn-qingdao-b", "172.16.1.10");
        let instance_id = instance.id.unwrap();
        let nodes = vec![NodeInfo {
            name: "master-1".into(),
            provider_id: format!("cn-qingdao.{instance_id}"),
        }];
        let groups = vec![InstanceGroup::new(
            "master-cn-qingdao-b",
            InstanceGroupRole::ControlPlane,
        )];

        let found = cloud
            .get_cloud_groups(&cluster(false), &groups, &nodes)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].human_name, format!("o-b.masters.{CLUSTER}"));
        assert_eq!(found[0].members[0].node_name.as_deref(), Some("master-1"));
    }

    #[tokio::test]
    async fn test_ingress_from_load_balancer_or_masters() {
        let (cloud, memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let group_id = master_group(&memory);
        memory.launch_instance(&scope(), &group_id, "cn-qingdao-b", "172.16.1.10");

        let ingress = cloud.api_ingress_status(&cluster(false)).await.unwrap();
        assert_eq!(ingress, vec![ApiIngressStatus::ip("172.16.1.10")]);

        let err = cloud.api_ingress_status(&cluster(true)).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound { .. }));

        memory.load_balancers.insert(
            &scope(),
            LoadBalancerRecord {
                id: None,
                name: format!("api.{CLUSTER}"),
                address_type: AddressType::Internet,
                address: Some("47.97.0.1".into()),
                tags: TAGS.cluster_tags(CLUSTER),
            },
        );
        let ingress = cloud.api_ingress_status(&cluster(true)).await.unwrap();
        assert_eq!(ingress, vec![ApiIngressStatus::ip("47.97.0.1")]);
    }
}
