//! Cloud credentials from the environment
//!
//! A missing credential is fatal: callers surface the error before building
//! a cloud.

use crate::error::{ConfigError, Result};
use std::fmt;

pub const ALI_ACCESS_KEY_ID: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
pub const ALI_ACCESS_KEY_SECRET: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";

pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// Set to a truthy value to authenticate with the VM's managed identity
pub const AZURE_USE_MANAGED_IDENTITY: &str = "AZURE_USE_MANAGED_IDENTITY";

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Clone)]
pub struct AliCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl AliCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: required(ALI_ACCESS_KEY_ID)?,
            access_key_secret: required(ALI_ACCESS_KEY_SECRET)?,
        })
    }
}

impl fmt::Debug for AliCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum AzureAuth {
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity {
        client_id: Option<String>,
    },
}

impl fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AzureAuth::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            AzureAuth::ManagedIdentity { client_id } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub auth: AzureAuth,
}

impl AzureCredentials {
    /// Reads the subscription plus either a service principal or the
    /// managed-identity marker
    pub fn from_env() -> Result<Self> {
        let subscription_id = required(AZURE_SUBSCRIPTION_ID)?;

        let managed = optional(AZURE_USE_MANAGED_IDENTITY)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let auth = if managed {
            AzureAuth::ManagedIdentity {
                client_id: optional(AZURE_CLIENT_ID),
            }
        } else {
            AzureAuth::ClientSecret {
                tenant_id: required(AZURE_TENANT_ID)?,
                client_id: required(AZURE_CLIENT_ID)?,
                client_secret: required(AZURE_CLIENT_SECRET)?,
            }
        };

        Ok(Self {
            subscription_id,
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_ali_from_env() {
        let creds = temp_env::with_vars(
            [
                (ALI_ACCESS_KEY_ID, Some("LTAI-test")),
                (ALI_ACCESS_KEY_SECRET, Some("secret")),
            ],
            AliCredentials::from_env,
        )
        .unwrap();
        assert_eq!(creds.access_key_id, "LTAI-test");
        assert!(!format!("{creds:?}").contains("\"secret\""));
    }

    #[test]
    #[serial]
    fn test_ali_missing_secret() {
        let result = temp_env::with_vars(
            [
                (ALI_ACCESS_KEY_ID, Some("LTAI-test")),
                (ALI_ACCESS_KEY_SECRET, None),
            ],
            AliCredentials::from_env,
        );
        match result {
            Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, ALI_ACCESS_KEY_SECRET),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_azure_client_secret() {
        let creds = temp_env::with_vars(
            [
                (AZURE_SUBSCRIPTION_ID, Some("sub")),
                (AZURE_TENANT_ID, Some("tenant")),
                (AZURE_CLIENT_ID, Some("client")),
                (AZURE_CLIENT_SECRET, Some("pw")),
                (AZURE_USE_MANAGED_IDENTITY, None),
            ],
            AzureCredentials::from_env,
        )
        .unwrap();
        assert_eq!(creds.subscription_id, "sub");
        assert!(matches!(creds.auth, AzureAuth::ClientSecret { .. }));
    }

    #[test]
    #[serial]
    fn test_azure_managed_identity() {
        let creds = temp_env::with_vars(
            [
                (AZURE_SUBSCRIPTION_ID, Some("sub")),
                (AZURE_USE_MANAGED_IDENTITY, Some("true")),
                (AZURE_CLIENT_ID, None),
                (AZURE_CLIENT_SECRET, None),
            ],
            AzureCredentials::from_env,
        )
        .unwrap();
        assert_eq!(creds.auth, AzureAuth::ManagedIdentity { client_id: None });
    }

    #[test]
    #[serial]
    fn test_azure_missing_subscription() {
        let result = temp_env::with_var_unset(AZURE_SUBSCRIPTION_ID, AzureCredentials::from_env);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }
}
