//! Read-only cluster status on azure

use crate::cloud::{AzureCloud, TAGS};
use crate::records::VmRecord;
use async_trait::async_trait;
use kforge_cloud::status::{TaggedVolume, etcd_status_from_volumes, match_node, require_ingress};
use kforge_cloud::{
    ApiIngressStatus, CloudInstance, CloudInstanceGroup, ClusterStatus, ListFilter, NodeInfo,
    Result, Scope, StatusReader, find_unique,
};
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole, naming};
use tracing::{debug, warn};

impl AzureCloud {
    fn cluster_scope(&self, cluster: &Cluster) -> Scope {
        self.group_scope(&cluster.resource_group_name())
    }

    async fn scale_set_vms(&self, scope: &Scope, scale_set_id: &str) -> Result<Vec<VmRecord>> {
        self.apis()
            .vms
            .list(scope, &ListFilter::by_parent(scale_set_id))
            .await
    }
}

#[async_trait]
impl StatusReader for AzureCloud {
    async fn find_cluster_status(&self, cluster: &Cluster) -> Result<ClusterStatus> {
        let filter = ListFilter::by_tags(TAGS.role_tags(&cluster.name, InstanceGroupRole::ControlPlane));
        let disks = self
            .apis()
            .disks
            .list(&self.cluster_scope(cluster), &filter)
            .await?;
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
        let scope = self.cluster_scope(cluster);
        let mut found = Vec::new();
        for group in groups {
            let name = naming::azure_scale_set(group, &cluster.name);
            let filter = ListFilter::by_tags(TAGS.cluster_tags(&cluster.name)).with_name(&name);
            let Some(record) = find_unique(self.apis().scale_sets.as_ref(), &scope, &filter).await?
            else {
                warn!(group = %group.name, scale_set = %name, "Scale set not found");
                continue;
            };
            let Some(scale_set_id) = record.id.as_deref() else {
                continue;
            };

            // Nodes carry the machine's resource id as provider id
            let members = self
                .scale_set_vms(&scope, scale_set_id)
                .await?
                .into_iter()
                .filter_map(|vm| {
                    let id = vm.id?;
                    Some(CloudInstance {
                        node_name: match_node(nodes, &id).map(|n| n.name.clone()),
                        id,
                        private_ip: vm.private_ip,
                    })
                })
                .collect();

            found.push(CloudInstanceGroup {
                human_name: record.name,
                instance_group: group.name.clone(),
                min_size: group.min_size,
                max_size: group.max_size,
                members,
            });
        }
        Ok(found)
    }

    async fn api_ingress_status(&self, cluster: &Cluster) -> Result<Vec<ApiIngressStatus>> {
        let scope = self.cluster_scope(cluster);
        let mut found = Vec::new();

        if cluster.load_balancer_type().is_some() {
            let lb = find_unique(
                self.apis().load_balancers.as_ref(),
                &scope,
                &ListFilter::by_name(naming::azure_load_balancer(&cluster.name)),
            )
            .await?;
            found.extend(lb.and_then(|lb| lb.frontend_ip).map(ApiIngressStatus::ip));
        } else {
            let owned = ListFilter::by_tags(TAGS.role_tags(&cluster.name, InstanceGroupRole::ControlPlane));
            for scale_set in self.apis().scale_sets.list(&scope, &owned).await? {
                let Some(scale_set_id) = scale_set.id.as_deref() else {
                    continue;
                };
                for vm in self.scale_set_vms(&scope, scale_set_id).await? {
                    found.extend(vm.private_ip.map(ApiIngressStatus::ip));
                }
            }
        }

        require_ingress(&cluster.name, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DiskRecord, LoadBalancerRecord, ProvisioningState, VmScaleSetRecord};
    use kforge_cloud::{CloudError, Tags};
    use kforge_config::EngineConfig;
    use kforge_core::{ApiSpec, CloudProviderId, ClusterSpec, LoadBalancerSpec, LoadBalancerType};

    const CLUSTER: &str = "demo.example.com";

    fn scope() -> Scope {
        Scope::resource_group(CLUSTER, "westeurope")
    }

    fn cluster(load_balancer: bool) -> Cluster {
        let mut spec = ClusterSpec::new(CloudProviderId::Azure);
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

    fn master_scale_set(memory: &crate::memory::AzureMemory) -> VmScaleSetRecord {
        memory.scale_sets.insert(
            &scope(),
            VmScaleSetRecord {
                id: None,
                name: "master-westeurope-1-demo-example-com".into(),
                sku: "Standard_D2s_v3".into(),
                capacity: 1,
                subnet_id: "snet-1".into(),
                load_balancer_id: None,
                computer_name_prefix: "master-westeurope-1".into(),
                admin_user: "admin-user".into(),
                ssh_public_key: "ssh-rsa AAAA".into(),
                user_data: None,
                require_public_ip: false,
                zones: vec!["1".into()],
                principal_id: Some("principal-1".into()),
                provisioning_state: ProvisioningState::Succeeded,
                tags: TAGS.role_tags(CLUSTER, InstanceGroupRole::ControlPlane),
            },
        )
    }

    fn disk(memory: &crate::memory::AzureMemory, name: &str, tags: Tags) -> DiskRecord {
        memory.disks.insert(
            &scope(),
            DiskRecord {
                id: None,
                name: name.into(),
                zones: vec!["1".into()],
                size_gb: 20,
                sku: "StandardSSD_LRS".into(),
                tags,
            },
        )
    }

    #[tokio::test]
    async fn test_etcd_members_from_disk_tags() {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let mut tags = TAGS.role_tags(CLUSTER, InstanceGroupRole::ControlPlane);
        tags.insert("k8s.io_etcd_main".into(), "a/a,b".into());
        tags.insert("k8s.io_etcd_events".into(), "a/a,b".into());
        let a = disk(&memory, "a-etcd-main-demo-example-com", tags);
        let mut node_tags = TAGS.role_tags(CLUSTER, InstanceGroupRole::Node);
        node_tags.insert("k8s.io_etcd_main".into(), "b/a,b".into());
        disk(&memory, "b-etcd-main-demo-example-com", node_tags);

        let status = cloud.find_cluster_status(&cluster(false)).await.unwrap();

        assert_eq!(status.etcd_clusters.len(), 2);
        let main = status.etcd_cluster("main").unwrap();
        assert_eq!(main.members.len(), 1);
        assert_eq!(Some(&main.members[0].volume_id), a.id.as_ref());
    }

    #[tokio::test]
    async fn test_cloud_groups_match_nodes_by_resource_id() {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let vmss = master_scale_set(&memory);
        let vm = memory.launch_vm(&scope(), &vmss, "10.0.1.4");
        memory.launch_vm(&scope(), &vmss, "10.0.1.5");
        let nodes = vec![NodeInfo {
            name: "master-westeurope-1000000".into(),
            provider_id: format!("azure://{}", vm.id.as_deref().unwrap()),
        }];
        let mut group = InstanceGroup::new("master-westeurope-1", InstanceGroupRole::ControlPlane);
        group.min_size = 1;
        group.max_size = 3;

        let found = cloud
            .get_cloud_groups(&cluster(false), &[group], &nodes)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].human_name, "master-westeurope-1-demo-example-com");
        assert_eq!((found[0].min_size, found[0].max_size), (1, 3));
        assert_eq!(found[0].members.len(), 2);
        let matched: Vec<_> = found[0]
            .members
            .iter()
            .filter_map(|m| m.node_name.as_deref())
            .collect();
        assert_eq!(matched, vec!["master-westeurope-1000000"]);
    }

    #[tokio::test]
    async fn test_missing_scale_set_is_skipped() {
        let (cloud, _memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let group = InstanceGroup::new("nodes", InstanceGroupRole::Node);
        let found = cloud
            .get_cloud_groups(&cluster(false), &[group], &[])
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_ingress_from_load_balancer_or_masters() {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let vmss = master_scale_set(&memory);
        memory.launch_vm(&scope(), &vmss, "10.0.1.4");

        let ingress = cloud.api_ingress_status(&cluster(false)).await.unwrap();
        assert_eq!(ingress, vec![ApiIngressStatus::ip("10.0.1.4")]);

        let err = cloud.api_ingress_status(&cluster(true)).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound { .. }));

        memory.load_balancers.insert(
            &scope(),
            LoadBalancerRecord {
                id: None,
                name: "api-demo-example-com".into(),
                external: true,
                public_ip_id: Some("pip-1".into()),
                subnet_id: None,
                frontend_ip: Some("20.51.0.1".into()),
                tags: TAGS.cluster_tags(CLUSTER),
            },
        );
        let ingress = cloud.api_ingress_status(&cluster(true)).await.unwrap();
        assert_eq!(ingress, vec![ApiIngressStatus::ip("20.51.0.1")]);
    }
}
