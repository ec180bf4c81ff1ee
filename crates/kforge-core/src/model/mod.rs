//! Declarative cluster model
//!
//! The model is read-only input for the engine: a [`Cluster`] describes the
//! networking, access and etcd layout, and each [`InstanceGroup`] describes
//! one homogeneous pool of machines.

mod cluster;
mod instance_group;

pub use cluster::*;
pub use instance_group::*;
