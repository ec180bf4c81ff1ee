//! Ali cloud for kforge
//!
//! Tasks, model builders, discovery and status for clusters on ali.
//!
//! # Features
//!
//! - VPC, vswitches, NAT gateway, EIP and SNAT entries
//! - Per-role security groups and access rules
//! - Public API load balancer with listener and whitelist
//! - RAM roles and policies, key pair
//! - Scaling groups with versioned scaling configurations
//! - etcd data disks
//!
//! # Requirements
//!
//! - `ALIBABA_CLOUD_ACCESS_KEY_ID` and `ALIBABA_CLOUD_ACCESS_KEY_SECRET`
//!   for [`AliCloud::connect`]
//!
//! # Example
//!
//! ```ignore
//! use kforge_cloud::{Reconciler, ReconcileOptions};
//! use kforge_cloud_ali::{AliCloud, model};
//!
//! let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &config);
//! let ctx = model::ModelContext::new(&cloud, &cluster, &groups);
//! let mut graph = model::build_cluster(&ctx, &model::DefaultPolicies, &model::NodeupUserData)?;
//!
//! let reconciler = Reconciler::new(Arc::new(cloud), &cluster.name, ReconcileOptions::from(&config));
//! let report = reconciler.run(&mut graph).await?;
//! ```

pub mod cloud;
pub mod error;
pub mod memory;
pub mod model;
pub mod records;
pub mod resources;
pub mod status;
pub mod tasks;

pub use cloud::{AliApis, AliCloud, TAGS, default_capabilities};
pub use error::{AliError, Result};
pub use memory::AliMemory;
pub use resources::list_resources;
