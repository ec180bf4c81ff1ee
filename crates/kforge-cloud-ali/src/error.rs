//! Ali cloud error types

use kforge_cloud::{CloudError, ErrorKind};
use kforge_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AliError {
    #[error("internal LoadBalancers are not yet supported by kops on ALI")]
    InternalLoadBalancerUnsupported,

    #[error("instance group {group}: unknown subnet {subnet}")]
    UnknownSubnet { group: String, subnet: String },

    #[error("etcd member {member} of {etcd_cluster}: unknown instance group {group}")]
    UnknownEtcdGroup {
        etcd_cluster: String,
        member: String,
        group: String,
    },

    #[error("no policy document for {0}")]
    MissingPolicy(String),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Model error: {0}")]
    Model(#[from] CoreError),
}

impl AliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AliError::Cloud(e) => e.kind(),
            _ => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, AliError>;
