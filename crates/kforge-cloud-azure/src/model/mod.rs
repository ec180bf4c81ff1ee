//! Model builders: cluster and instance groups in, azure tasks out
//!
//! Every task lands in the cluster's resource group. A builder whose
//! resource kind is missing from the cloud's [`Capabilities`] emits nothing.

mod load_balancer;
mod network;
mod resource_group;
mod scale_set;
mod sources;
mod volumes;

pub use load_balancer::LoadBalancerBuilder;
pub use network::{NetworkBuilder, security_rules};
pub use resource_group::ResourceGroupBuilder;
pub use scale_set::{DEFAULT_ADMIN_USER, ScaleSetBuilder};
pub use sources::{NodeupUserData, UserDataSource};
pub use volumes::{DEFAULT_ETCD_VOLUME_SIZE, VolumeBuilder};

use crate::cloud::{AzureCloud, TAGS};
use crate::error::Result;
use crate::tasks::ResourceGroup;
use kforge_cloud::{Capabilities, Lifecycle, Link, TagConvention, TaskGraph, Tags};
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole};

/// Everything a builder reads
#[derive(Debug, Clone)]
pub struct ModelContext<'a> {
    pub cluster: &'a Cluster,
    pub groups: &'a [InstanceGroup],
    pub location: &'a str,
    pub lifecycle: Lifecycle,
    pub capabilities: &'a Capabilities,
    pub tags: &'a TagConvention,
}

impl<'a> ModelContext<'a> {
    pub fn new(cloud: &'a AzureCloud, cluster: &'a Cluster, groups: &'a [InstanceGroup]) -> Self {
        Self {
            cluster,
            groups,
            location: cloud.location(),
            lifecycle: Lifecycle::Sync,
            capabilities: cloud.capabilities(),
            tags: &TAGS,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster.name
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.capabilities.supports(kind)
    }

    pub fn cluster_tags(&self) -> Tags {
        self.tags.cluster_tags(&self.cluster.name)
    }

    pub fn role_tags(&self, role: InstanceGroupRole) -> Tags {
        self.tags.role_tags(&self.cluster.name, role)
    }

    pub fn resource_group_name(&self) -> String {
        self.cluster.resource_group_name()
    }

    /// Link every task but the group itself carries
    pub fn resource_group_link(&self) -> Link {
        Link::to::<ResourceGroup>(self.resource_group_name())
    }
}

/// One slice of the model
pub trait ModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()>;
}

/// Validates the cluster and runs every builder into one graph
pub fn build_cluster(
    ctx: &ModelContext<'_>,
    user_data: &dyn UserDataSource,
) -> Result<TaskGraph<AzureCloud>> {
    kforge_core::validate(ctx.cluster, ctx.groups)?;

    let builders: Vec<Box<dyn ModelBuilder + '_>> = vec![
        Box::new(ResourceGroupBuilder),
        Box::new(NetworkBuilder),
        Box::new(LoadBalancerBuilder),
        Box::new(ScaleSetBuilder { user_data }),
        Box::new(VolumeBuilder),
    ];

    let mut graph = TaskGraph::new();
    for builder in &builders {
        builder.build(ctx, &mut graph)?;
    }
    tracing::debug!(cluster = %ctx.cluster.name, tasks = graph.len(), "Built azure model");
    Ok(graph)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use kforge_core::{
        ApiSpec, CloudProviderId, Cluster, ClusterSpec, EtcdClusterSpec, EtcdMemberSpec,
        InstanceGroup, InstanceGroupRole, LoadBalancerSpec, LoadBalancerType, NetworkingSpec,
        SubnetSpec, SubnetType,
    };

    pub const CLUSTER: &str = "demo.example.com";

    pub fn cluster(load_balancer: Option<LoadBalancerType>) -> Cluster {
        let mut spec = ClusterSpec::new(CloudProviderId::Azure);
        spec.networking = NetworkingSpec {
            network_cidr: "10.0.0.0/16".into(),
            network_id: None,
            subnets: vec![SubnetSpec {
                name: "westeurope-1".into(),
                zone: "westeurope-1".into(),
                cidr: "10.0.1.0/24".into(),
                kind: SubnetType::Public,
                id: None,
            }],
        };
        spec.api = ApiSpec {
            load_balancer: load_balancer.map(|kind| LoadBalancerSpec { kind }),
            access: vec!["0.0.0.0/0".into()],
        };
        spec.ssh_access = vec!["0.0.0.0/0".into(), "::/0".into()];
        spec.node_port_access = vec!["10.0.0.0/8".into()];
        spec.ssh_public_key = Some("ssh-rsa AAAAB3NzaC1yc2E demo@example.com".into());
        spec.etcd_clusters = vec![EtcdClusterSpec {
            name: "main".into(),
            members: vec![EtcdMemberSpec {
                name: "a".into(),
                instance_group: "master-westeurope-1".into(),
                volume_size: None,
                volume_type: None,
            }],
        }];
        Cluster::new(CLUSTER, spec)
    }

    pub fn group(name: &str, role: InstanceGroupRole) -> InstanceGroup {
        let mut group = InstanceGroup::new(name, role);
        group.machine_type = "Standard_D2s_v3".into();
        group.image = "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest".into();
        group.subnets = vec!["westeurope-1".into()];
        group.zones = vec!["westeurope-1".into()];
        group
    }

    /// One control-plane group and one node group
    pub fn groups() -> Vec<InstanceGroup> {
        vec![
            group("master-westeurope-1", InstanceGroupRole::ControlPlane),
            group("nodes", InstanceGroupRole::Node),
        ]
    }
}
