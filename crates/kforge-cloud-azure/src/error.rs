//! Azure error types

use kforge_cloud::{CloudError, ErrorKind};
use kforge_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("unknown IP family for CIDR: {0:?}")]
    InvalidCidr(String),

    #[error("instance group {group}: unknown subnet {subnet}")]
    UnknownSubnet { group: String, subnet: String },

    #[error("instance group {0} has no subnet")]
    NoSubnet(String),

    #[error("no subnet for the internal API load balancer")]
    NoLoadBalancerSubnet,

    #[error("etcd member {member} of {etcd_cluster}: unknown instance group {group}")]
    UnknownEtcdGroup {
        etcd_cluster: String,
        member: String,
        group: String,
    },

    #[error("an SSH public key is required on azure")]
    MissingSshKey,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token rejected: {0}")]
    TokenRejected(String),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Model error: {0}")]
    Model(#[from] CoreError),
}

impl AzureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AzureError::Cloud(e) => e.kind(),
            AzureError::InvalidToken(_) | AzureError::TokenRejected(_) => ErrorKind::Credentials,
            _ => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_are_credential_errors() {
        assert_eq!(
            AzureError::TokenRejected("vm id mismatch".into()).kind(),
            ErrorKind::Credentials
        );
        assert_eq!(AzureError::MissingSshKey.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_cloud_kind_passes_through() {
        let err: AzureError = CloudError::transient("VirtualNetwork.list", "throttled").into();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
