use kforge_cloud::{
    DeleteOptions, DeletionReport, ReconcileOptions, ReconcileReport, Reconciler, delete_resources,
};
use kforge_cloud_ali::model::{self, DefaultPolicies, ModelContext, NodeupUserData};
use kforge_cloud_ali::{AliCloud, AliMemory, list_resources};
use kforge_config::EngineConfig;
use kforge_core::{Cluster, InstanceGroup};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const REGION: &str = "cn-qingdao";

/// A cluster definition on disk plus the in-memory account it runs against
pub struct TestProject {
    pub root: TempDir,
    pub cloud: Arc<AliCloud>,
    pub memory: AliMemory,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        let (cloud, memory) = AliCloud::in_memory(REGION, &config);
        Self {
            root,
            cloud: Arc::new(cloud),
            memory,
        }
    }

    pub fn write_cluster(&self, content: &str) {
        fs::write(self.path().join("cluster.yaml"), content).unwrap();
    }

    pub fn write_groups(&self, content: &str) {
        fs::write(self.path().join("instancegroups.yaml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn load(&self) -> (Cluster, Vec<InstanceGroup>) {
        let cluster = Cluster::from_file(self.path().join("cluster.yaml")).unwrap();
        let groups = InstanceGroup::list_from_file(self.path().join("instancegroups.yaml")).unwrap();
        (cluster, groups)
    }

    pub async fn reconcile(&self, cluster: &Cluster, groups: &[InstanceGroup]) -> ReconcileReport {
        let ctx = ModelContext::new(&self.cloud, cluster, groups);
        let mut graph = model::build_cluster(&ctx, &DefaultPolicies, &NodeupUserData).unwrap();
        Reconciler::new(self.cloud.clone(), &cluster.name, ReconcileOptions::default())
            .run(&mut graph)
            .await
            .unwrap()
    }

    pub async fn delete(&self, cluster: &Cluster) -> DeletionReport {
        let resources = list_resources(&self.cloud, cluster).await.unwrap();
        let options = DeleteOptions {
            round_delay: Duration::ZERO,
            ..Default::default()
        };
        delete_resources(self.cloud.clone(), resources, &options)
            .await
            .unwrap()
    }
}

/// Two public-subnet masters and a private node group
pub const GROUPS: &str = r#"
name: master-cn-qingdao-b
role: ControlPlane
machineType: ecs.n2.medium
image: centos_7_04_64_20G_alibase_201701015.vhd
minSize: 1
maxSize: 1
subnets: [cn-qingdao-b]
---
name: master-cn-qingdao-c
role: ControlPlane
machineType: ecs.n2.medium
image: centos_7_04_64_20G_alibase_201701015.vhd
minSize: 1
maxSize: 1
subnets: [cn-qingdao-b]
---
name: nodes
role: Node
machineType: ecs.n2.medium
image: centos_7_04_64_20G_alibase_201701015.vhd
minSize: 2
maxSize: 2
subnets: [private-cn-qingdao-b]
"#;

/// A cluster with one public and one private subnet
///
/// `api` is inserted under `spec.api`, `extra` under `spec`.
pub fn cluster_yaml(name: &str, api: &str, extra: &str) -> String {
    format!(
        r#"
name: {name}
spec:
  cloudProvider: ali
  networking:
    networkCidr: 172.16.0.0/16
    subnets:
      - name: cn-qingdao-b
        zone: cn-qingdao-b
        cidr: 172.16.1.0/24
        type: public
      - name: private-cn-qingdao-b
        zone: cn-qingdao-b
        cidr: 172.16.2.0/24
        type: private
  api:
    access: [0.0.0.0/0]
{api}
  sshAccess: [0.0.0.0/0]
  etcdClusters:
    - name: main
      members:
        - name: a
          instanceGroup: master-cn-qingdao-b
{extra}
"#
    )
}

pub const PUBLIC_LB: &str = "    loadBalancer:\n      type: public";
