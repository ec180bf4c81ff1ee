//! Model builders: cluster and instance groups in, ali tasks out
//!
//! Builders only emit tasks; nothing here talks to the cloud. A builder whose
//! resource kind is missing from the cloud's [`Capabilities`] emits nothing.

mod firewall;
mod identity;
mod load_balancer;
mod network;
mod scaling;
mod sources;
mod volumes;

pub use firewall::{ExternalAccessBuilder, FirewallBuilder};
pub use identity::{IdentityBuilder, SshKeyBuilder};
pub use load_balancer::LoadBalancerBuilder;
pub use network::NetworkBuilder;
pub use scaling::ScalingGroupBuilder;
pub use sources::{DefaultPolicies, NodeupUserData, PolicySource, UserDataSource};
pub use volumes::{DEFAULT_ETCD_VOLUME_SIZE, VolumeBuilder};

use crate::cloud::{AliCloud, TAGS};
use crate::error::Result;
use kforge_cloud::{Capabilities, Lifecycle, TagConvention, TaskGraph, Tags};
use kforge_core::{Cluster, InstanceGroup, InstanceGroupRole};

/// Everything a builder reads
#[derive(Debug, Clone)]
pub struct ModelContext<'a> {
    pub cluster: &'a Cluster,
    pub groups: &'a [InstanceGroup],
    pub lifecycle: Lifecycle,
    pub capabilities: &'a Capabilities,
    pub tags: &'a TagConvention,
}

impl<'a> ModelContext<'a> {
    pub fn new(cloud: &'a AliCloud, cluster: &'a Cluster, groups: &'a [InstanceGroup]) -> Self {
        Self {
            cluster,
            groups,
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

    /// Roles that get a security group and an identity
    pub fn roles(&self) -> Vec<InstanceGroupRole> {
        let mut roles = vec![InstanceGroupRole::ControlPlane, InstanceGroupRole::Node];
        if self.uses_bastion() {
            roles.push(InstanceGroupRole::Bastion);
        }
        roles
    }

    pub fn uses_bastion(&self) -> bool {
        self.cluster.uses_bastion()
            || self
                .groups
                .iter()
                .any(|g| g.role == InstanceGroupRole::Bastion)
    }

    /// Whether the cluster's public key is imported, so groups may use it
    pub fn has_ssh_key(&self) -> bool {
        self.supports("SshKey")
            && self
                .cluster
                .spec
                .ssh_public_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }
}

/// One slice of the model
pub trait ModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()>;
}

/// Validates the cluster and runs every builder into one graph
pub fn build_cluster(
    ctx: &ModelContext<'_>,
    policies: &dyn PolicySource,
    user_data: &dyn UserDataSource,
) -> Result<TaskGraph<AliCloud>> {
    kforge_core::validate(ctx.cluster, ctx.groups)?;

    let builders: Vec<Box<dyn ModelBuilder + '_>> = vec![
        Box::new(NetworkBuilder),
        Box::new(FirewallBuilder),
        Box::new(ExternalAccessBuilder),
        Box::new(LoadBalancerBuilder),
        Box::new(IdentityBuilder { policies }),
        Box::new(SshKeyBuilder),
        Box::new(ScalingGroupBuilder { user_data }),
        Box::new(VolumeBuilder),
    ];

    let mut graph = TaskGraph::new();
    for builder in &builders {
        builder.build(ctx, &mut graph)?;
    }
    tracing::debug!(cluster = %ctx.cluster.name, tasks = graph.len(), "Built ali model");
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
        let mut spec = ClusterSpec::new(CloudProviderId::Ali);
        spec.networking = NetworkingSpec {
            network_cidr: "172.16.0.0/16".into(),
            network_id: None,
            subnets: vec![
                SubnetSpec {
                    name: "cn-qingdao-b".into(),
                    zone: "cn-qingdao-b".into(),
                    cidr: "172.16.1.0/24".into(),
                    kind: SubnetType::Public,
                    id: None,
                },
                SubnetSpec {
                    name: "private-cn-qingdao-b".into(),
                    zone: "cn-qingdao-b".into(),
                    cidr: "172.16.2.0/24".into(),
                    kind: SubnetType::Private,
                    id: None,
                },
            ],
        };
        spec.api = ApiSpec {
            load_balancer: load_balancer.map(|kind| LoadBalancerSpec { kind }),
            access: vec!["0.0.0.0/0".into()],
        };
        spec.ssh_access = vec!["0.0.0.0/0".into()];
        spec.etcd_clusters = vec![EtcdClusterSpec {
            name: "main".into(),
            members: vec![EtcdMemberSpec {
                name: "a".into(),
                instance_group: "master-cn-qingdao-b".into(),
                volume_size: None,
                volume_type: None,
            }],
        }];
        Cluster::new(CLUSTER, spec)
    }

    pub fn group(name: &str, role: InstanceGroupRole, subnet: &str) -> InstanceGroup {
        let mut group = InstanceGroup::new(name, role);
        group.machine_type = "ecs.n2.medium".into();
        group.image = "centos_7_04_64_20G_alibase_201701015.vhd".into();
        group.subnets = vec![subnet.into()];
        group
    }

    /// Two control-plane groups and one node group
    pub fn groups() -> Vec<InstanceGroup> {
        vec![
            group("master-cn-qingdao-b", InstanceGroupRole::ControlPlane, "cn-qingdao-b"),
            group("master-cn-qingdao-c", InstanceGroupRole::ControlPlane, "cn-qingdao-b"),
            group("nodes", InstanceGroupRole::Node, "private-cn-qingdao-b"),
        ]
    }
}
