//! Azure cloud for kforge
//!
//! Tasks, model builders, discovery and status for clusters on azure, plus
//! node bootstrap authentication by instance metadata.
//!
//! # Features
//!
//! - Resource group, virtual network, subnets and route table
//! - Network security group with per-family inbound rules
//! - Public or internal API load balancer
//! - Scale sets with a system identity and a contributor role assignment
//! - etcd managed disks
//!
//! # Requirements
//!
//! - `AZURE_SUBSCRIPTION_ID`, plus either a client secret
//!   (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`) or
//!   `AZURE_USE_MANAGED_IDENTITY`, for [`AzureCloud::connect`]
//!
//! # Example
//!
//! ```ignore
//! use kforge_cloud::{Reconciler, ReconcileOptions};
//! use kforge_cloud_azure::{AzureCloud, model};
//!
//! let (cloud, _memory) = AzureCloud::in_memory("westeurope", &config);
//! let ctx = model::ModelContext::new(&cloud, &cluster, &groups);
//! let mut graph = model::build_cluster(&ctx, &model::NodeupUserData)?;
//!
//! let reconciler = Reconciler::new(Arc::new(cloud), &cluster.name, ReconcileOptions::from(&config));
//! let report = reconciler.run(&mut graph).await?;
//! ```

pub mod authenticator;
pub mod cloud;
pub mod error;
pub mod memory;
pub mod model;
pub mod records;
pub mod resources;
pub mod status;
pub mod tasks;

pub use authenticator::{AzureAuthenticator, AzureVerifier, VerifiedNode};
pub use cloud::{AzureApis, AzureCloud, TAGS, default_capabilities};
pub use error::{AzureError, Result};
pub use memory::{AzureMemory, MEMORY_SUBSCRIPTION_ID};
pub use resources::list_resources;
