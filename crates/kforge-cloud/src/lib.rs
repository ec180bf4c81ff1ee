//! kforge cloud engine
//!
//! Declarative reconciliation of cluster resources, shared by every cloud.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        Model builders (kforge-cloud-*)           │
//! │        Cluster + [InstanceGroup] → tasks         │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 kforge-cloud                     │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  TaskGraph   │─▶│  Reconciler              │ │
//! │  └──────────────┘  │  find → diff → render    │ │
//! │                    └──────────────────────────┘ │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  Resources   │  │  StatusReader            │ │
//! │  │  (deletion)  │  │  (etcd, groups, ingress) │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Adapter contract: ResourceApi<R>         │   │
//! │  │  RetryingApi, poll_until, TagDelta        │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      ali      │ │     azure     │
//! │  region+tag   │ │ resource group│
//! └───────────────┘ └───────────────┘
//! ```

pub mod adapter;
pub mod changes;
pub mod error;
pub mod graph;
pub mod memory;
pub mod reconciler;
pub mod report;
pub mod resources;
pub mod retry;
pub mod status;
pub mod tags;
pub mod task;
pub mod wait;

#[cfg(test)]
mod testing;

// Re-exports
pub use adapter::{
    Capabilities, CloudResource, ListFilter, ROLE_TAG_VALUE, ResourceApi, Scope, TagConvention,
    Tags, find_unique,
};
pub use changes::{Changes, FieldChange};
pub use error::{CloudError, ErrorKind, Result};
pub use graph::TaskGraph;
pub use memory::{Call, CallLog, Fault, MemoryStore, Operation};
pub use reconciler::{ReconcileOptions, Reconciler, topological_layers};
pub use report::{Action, ActionType, Plan, PlanSummary, ReconcileReport, TaskOutcome, TaskResult};
pub use resources::{
    DeleteOptions, Deleter, DeletionReport, DeletionState, Resource, ResourceMap,
    delete_resources, insert_resource, resource_key, round_backoff,
};
pub use retry::{RetryConfig, RetryingApi, retry_with_backoff};
pub use status::{
    ApiIngressStatus, CloudInstance, CloudInstanceGroup, ClusterStatus, EtcdClusterStatus,
    EtcdMemberStatus, NodeInfo, StatusReader,
};
pub use tags::TagDelta;
pub use task::{CloudTask, Context, IdTable, Lifecycle, Link, Task, TaskKey};
pub use wait::{PollConfig, poll_until};
