//! kforge core model
//!
//! Read-only inputs of the provisioning engine: the [`Cluster`] value, its
//! [`InstanceGroup`]s, and the conventions every cloud shares.
//!
//! - [`validation`]: configuration checks that run before any cloud call
//! - [`naming`]: resource names derived from the cluster name
//! - [`etcd`]: the etcd member spec carried in disk tags
//! - [`zones`]: zone to region / location mapping
//! - [`ports`]: reserved control-plane ports

pub mod error;
pub mod etcd;
pub mod model;
pub mod naming;
pub mod ports;
pub mod validation;
pub mod zones;

// Re-exports
pub use error::{CoreError, Result};
pub use etcd::MemberSpec;
pub use model::{
    ApiSpec, AzureSpec, BastionSpec, CloudProviderId, Cluster, ClusterSpec, DnsMode,
    EtcdClusterSpec, EtcdMemberSpec, InstanceGroup, InstanceGroupRole, LoadBalancerSpec,
    LoadBalancerType, NetworkingSpec, PortRange, SubnetSpec, SubnetType, TopologySpec,
};
pub use validation::validate;
