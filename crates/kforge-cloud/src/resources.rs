//! Discovered resources and the dependency-safe deletion loop

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use kforge_config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Performs the adapter calls that delete one resource.
///
/// Must be idempotent: a resource that is already gone counts as deleted.
#[async_trait]
pub trait Deleter<C>: fmt::Debug + Send + Sync {
    async fn delete(&self, cloud: &C, resource: &Resource<C>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionState {
    Pending,
    InProgress,
    Done,
    /// Failed this many times so far
    Failed(u32),
}

/// A cloud-side object owned by the cluster
pub struct Resource<C> {
    pub resource_type: String,
    pub id: String,
    pub name: String,
    /// `None` for resources that go away with their parent
    pub deleter: Option<Arc<dyn Deleter<C>>>,
    /// Keys of resources that must be deleted after this one
    pub blocks: Vec<String>,
    /// Keys of resources that must be deleted before this one
    pub blocked: Vec<String>,
    pub shared: bool,
    pub done: bool,
    pub state: DeletionState,
    /// Raw record, for deleters needing more than the id
    pub obj: Option<serde_json::Value>,
}

impl<C> Resource<C> {
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        deleter: Arc<dyn Deleter<C>>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            name: name.into(),
            deleter: Some(deleter),
            blocks: Vec::new(),
            blocked: Vec::new(),
            shared: false,
            done: false,
            state: DeletionState::Pending,
            obj: None,
        }
    }

    /// `type:id`
    pub fn key(&self) -> String {
        resource_key(&self.resource_type, &self.id)
    }

    pub fn blocks(mut self, key: impl Into<String>) -> Self {
        self.blocks.push(key.into());
        self
    }

    pub fn blocked_by(mut self, key: impl Into<String>) -> Self {
        self.blocked.push(key.into());
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_obj<T: Serialize>(mut self, obj: &T) -> Result<Self> {
        self.obj = Some(serde_json::to_value(obj)?);
        Ok(self)
    }

    /// Deserializes `obj` back into a record
    pub fn obj_as<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>> {
        self.obj
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}

impl<C> fmt::Debug for Resource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("type", &self.resource_type)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("blocks", &self.blocks)
            .field("blocked", &self.blocked)
            .field("shared", &self.shared)
            .field("state", &self.state)
            .finish()
    }
}

pub fn resource_key(resource_type: &str, id: &str) -> String {
    format!("{}:{}", resource_type, id)
}

/// Discovered resources by `type:id`
pub type ResourceMap<C> = BTreeMap<String, Resource<C>>;

pub fn insert_resource<C>(map: &mut ResourceMap<C>, resource: Resource<C>) {
    map.insert(resource.key(), resource);
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub concurrency: usize,
    /// Attempts per resource before its error surfaces
    pub max_attempts: u32,
    /// Pause after the first round with failures, doubled for each
    /// further failing round
    pub round_delay: Duration,
    pub cancel: CancellationToken,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 5,
            round_delay: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }
}

impl From<&EngineConfig> for DeleteOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.deletion.max_attempts.max(1),
            round_delay: config.deletion.round_delay(),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionReport {
    /// Keys in the order their deletion completed
    pub deleted: Vec<String>,
    /// Shared resources left alone
    pub skipped_shared: Vec<String>,
    pub rounds: u32,
}

/// Folds every `blocks` edge into the blocked side and drops shared
/// resources. Edges to keys not in the map are satisfied.
pub fn normalize<C>(resources: &mut ResourceMap<C>) -> Vec<String> {
    let edges: Vec<(String, String)> = resources
        .iter()
        .flat_map(|(key, r)| r.blocks.iter().map(move |b| (b.clone(), key.clone())))
        .collect();
    for (target, blocker) in edges {
        if let Some(r) = resources.get_mut(&target) {
            if !r.blocked.contains(&blocker) {
                r.blocked.push(blocker);
            }
        }
    }

    let shared: Vec<String> = resources
        .iter()
        .filter(|(_, r)| r.shared)
        .map(|(k, _)| k.clone())
        .collect();
    for key in &shared {
        resources.remove(key);
    }
    shared
}

const MAX_ROUND_DOUBLINGS: u32 = 4;

/// Pause before the next round after `failed_rounds` rounds with failures
pub fn round_backoff(base: Duration, failed_rounds: u32) -> Duration {
    let doublings = failed_rounds.saturating_sub(1).min(MAX_ROUND_DOUBLINGS);
    base.saturating_mul(1 << doublings)
}

/// Deletes every resource once all of its blocked set is done.
pub async fn delete_resources<C: Send + Sync + 'static>(
    cloud: Arc<C>,
    mut resources: ResourceMap<C>,
    options: &DeleteOptions,
) -> Result<DeletionReport> {
    let mut report = DeletionReport {
        skipped_shared: normalize(&mut resources),
        ..Default::default()
    };

    for (key, r) in resources.iter_mut() {
        if r.deleter.is_none() {
            debug!(resource = %key, "No deleter, marking done");
            r.done = true;
            r.state = DeletionState::Done;
        }
    }

    info!(resources = resources.len(), "Deleting resources");
    let mut failed_rounds = 0u32;

    loop {
        if options.cancel.is_cancelled() {
            return Err(CloudError::Cancelled);
        }

        let pending: Vec<String> = resources
            .iter()
            .filter(|(_, r)| !r.done)
            .map(|(k, _)| k.clone())
            .collect();
        if pending.is_empty() {
            break;
        }

        let ready: Vec<String> = pending
            .iter()
            .filter(|key| {
                resources[*key]
                    .blocked
                    .iter()
                    .all(|b| resources.get(b).is_none_or(|r| r.done))
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            for key in &pending {
                let r = &resources[key];
                warn!(resource = %key, blocked = ?r.blocked, "Resource cannot be deleted yet");
            }
            return Err(CloudError::DeletionStuck(pending));
        }

        report.rounds += 1;
        for key in &ready {
            if let Some(r) = resources.get_mut(key) {
                r.state = DeletionState::InProgress;
            }
        }
        debug!(round = report.rounds, ready = ?ready, "Deletion round");

        let results: Vec<(String, Result<()>)> = {
            let cloud = cloud.as_ref();
            let resources = &resources;
            let cancel = &options.cancel;
            stream::iter(ready.iter().map(|key| async move {
                let r = &resources[key];
                let result = match &r.deleter {
                    Some(deleter) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(CloudError::Cancelled),
                            result = deleter.delete(cloud, r) => result,
                        }
                    }
                    None => Ok(()),
                };
                (key.clone(), result)
            }))
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await
        };

        let mut any_failed = false;
        for (key, result) in results {
            let Some(r) = resources.get_mut(&key) else {
                continue;
            };
            match result {
                Ok(()) => {
                    info!(resource = %key, name = %r.name, "Deleted");
                    r.done = true;
                    r.state = DeletionState::Done;
                    report.deleted.push(key);
                }
                Err(CloudError::Cancelled) => return Err(CloudError::Cancelled),
                Err(e) => {
                    let attempts = match r.state {
                        DeletionState::Failed(n) => n + 1,
                        _ => 1,
                    };
                    if attempts >= options.max_attempts {
                        warn!(resource = %key, attempts = attempts, error = %e, "Giving up on resource");
                        return Err(e);
                    }
                    warn!(resource = %key, attempts = attempts, error = %e, "Deletion failed, will retry");
                    r.state = DeletionState::Failed(attempts);
                    any_failed = true;
                }
            }
        }

        if any_failed {
            failed_rounds += 1;
            let delay = round_backoff(options.round_delay, failed_rounds);
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before next round");
                tokio::select! {
                    _ = options.cancel.cancelled() => return Err(CloudError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    info!(deleted = report.deleted.len(), rounds = report.rounds, "Deletion finished");
    Ok(report)
}
