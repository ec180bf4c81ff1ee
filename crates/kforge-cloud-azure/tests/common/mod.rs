#![allow(dead_code)]

use kforge_cloud::{
    DeleteOptions, DeletionReport, ReconcileOptions, ReconcileReport, Reconciler, delete_resources,
};
use kforge_cloud_azure::model::{self, ModelContext, NodeupUserData};
use kforge_cloud_azure::{AzureCloud, AzureMemory, list_resources};
use kforge_config::EngineConfig;
use kforge_core::{Cluster, InstanceGroup};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const LOCATION: &str = "westeurope";

/// A cluster definition on disk plus the in-memory subscription it runs against
pub struct TestProject {
    pub root: TempDir,
    pub cloud: Arc<AzureCloud>,
    pub memory: AzureMemory,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        let (cloud, memory) = AzureCloud::in_memory(LOCATION, &config);
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
        let mut graph = model::build_cluster(&ctx, &NodeupUserData).unwrap();
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

/// A control-plane group and a node group in zone 1
pub const GROUPS: &str = r#"
name: master-westeurope-1
role: ControlPlane
machineType: Standard_D2s_v3
image: Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest
minSize: 1
maxSize: 1
subnets: [westeurope-1]
zones: [westeurope-1]
---
name: nodes
role: Node
machineType: Standard_D2s_v3
image: Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest
minSize: 2
maxSize: 2
subnets: [westeurope-1]
zones: [westeurope-1]
"#;

/// A cluster with one public subnet
///
/// `api` is inserted under `spec.api`, `extra` under `spec`.
pub fn cluster_yaml(name: &str, api: &str, extra: &str) -> String {
    format!(
        r#"
name: {name}
spec:
  cloudProvider: azure
  networking:
    networkCidr: 10.0.0.0/16
    subnets:
      - name: westeurope-1
        zone: westeurope-1
        cidr: 10.0.1.0/24
        type: public
  api:
    access: [0.0.0.0/0]
{api}
  sshAccess: [0.0.0.0/0, "::/0"]
  sshPublicKey: ssh-rsa AAAAB3NzaC1yc2E admin@example.com
  etcdClusters:
    - name: main
      members:
        - name: a
          instanceGroup: master-westeurope-1
{extra}
"#
    )
}

pub const PUBLIC_LB: &str = "    loadBalancer:\n      type: public";
pub const INTERNAL_LB: &str = "    loadBalancer:\n      type: internal";
