//! Tasks: declarative descriptors of one desired cloud resource
//!
//! A cloud implements [`CloudTask`] for each of its kinds. The blanket
//! [`Task`] impl turns it into the object-safe form the graph stores and
//! drives the find / diff / check / render sequence.

use crate::changes::Changes;
use crate::error::{CloudError, Result};
use crate::report::{ActionType, TaskOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a task may do to its resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Create or update to match
    #[default]
    Sync,
    /// Must exist; differences are only logged
    ExistsAndWarnIfChanges,
    /// Must exist and match
    ExistsAndValidates,
    /// Not touched at all
    Ignore,
}

/// `<Kind>/<name>`; names are unique per kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub kind: String,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn of<T: CloudTask>(name: impl Into<String>) -> Self {
        Self::new(T::KIND, name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Reference from one task to another.
///
/// Starts symbolic (kind and name only) and is resolved to the referee's
/// cloud id before the referrer runs. Serializes as the id once known, so
/// diffs compare ids against what the cloud reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    key: TaskKey,
    id: Option<String>,
}

impl Link {
    pub fn to<T: CloudTask>(name: impl Into<String>) -> Self {
        Self {
            key: TaskKey::of::<T>(name),
            id: None,
        }
    }

    /// Link to a resource that exists outside the graph
    pub fn existing<T: CloudTask>(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: TaskKey::of::<T>(name),
            id: Some(id.into()),
        }
    }

    /// Link built from an observed cloud record
    pub fn observed<T: CloudTask>(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            key: TaskKey::of::<T>(id.clone()),
            id: Some(id),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    pub fn resolve(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// The resolved id, or `RequiredField` naming `owner`
    pub fn require_id(&self, owner: &TaskKey) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| CloudError::required(owner, format!("id of {}", self.key)))
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.id {
            Some(id) => serializer.serialize_str(id),
            None => serializer.serialize_str(&self.key.name),
        }
    }
}

/// Per-pass execution context handed to every task
pub struct Context<C> {
    pub cloud: Arc<C>,
    pub cluster_name: String,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    pub dry_run: bool,
}

impl<C> Context<C> {
    pub fn new(cloud: Arc<C>, cluster_name: impl Into<String>) -> Self {
        Self {
            cloud,
            cluster_name: cluster_name.into(),
            cancel: CancellationToken::new(),
            deadline: None,
            dry_run: false,
        }
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CloudError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CloudError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Ids recorded for finished tasks
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    ids: HashMap<TaskKey, String>,
}

impl IdTable {
    pub fn insert(&mut self, key: TaskKey, id: impl Into<String>) {
        self.ids.insert(key, id.into());
    }

    pub fn get(&self, key: &TaskKey) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A typed task of one cloud.
///
/// Implementations mark lifecycle, shared and observed-id fields
/// `#[serde(skip)]` so that they stay out of the diff.
#[async_trait]
pub trait CloudTask: Serialize + Clone + fmt::Debug + Send + Sync + 'static {
    type Cloud: Send + Sync + 'static;

    const KIND: &'static str;

    fn name(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle;

    /// Shared resources are read but never mutated
    fn is_shared(&self) -> bool {
        false
    }

    fn links(&self) -> Vec<&Link> {
        Vec::new()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        Vec::new()
    }

    /// Cloud id, known after find or render
    fn id(&self) -> Option<&str>;

    /// Copies observed ids and other cloud-assigned fields from `actual`
    fn adopt(&mut self, actual: &Self);

    async fn find(&self, ctx: &Context<Self::Cloud>) -> Result<Option<Self>>;

    /// Rejects disallowed mutations
    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()>;

    /// Issues the adapter calls moving `actual` to `self`; must be safe to
    /// re-run after a partial failure
    async fn render(
        &mut self,
        ctx: &Context<Self::Cloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()>;

    fn key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.name())
    }
}

/// Object-safe task as stored in the graph
#[async_trait]
pub trait Task<C>: fmt::Debug + Send + Sync {
    fn key(&self) -> TaskKey;

    fn lifecycle(&self) -> Lifecycle;

    fn is_shared(&self) -> bool;

    /// Outgoing links, resolved or not
    fn dependencies(&self) -> Vec<Link>;

    /// Fills unresolved links from recorded ids
    fn resolve(&mut self, ids: &IdTable);

    fn id(&self) -> Option<String>;

    async fn run(&mut self, ctx: &Context<C>) -> Result<TaskOutcome>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<T: CloudTask> Task<T::Cloud> for T {
    fn key(&self) -> TaskKey {
        CloudTask::key(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        CloudTask::lifecycle(self)
    }

    fn is_shared(&self) -> bool {
        CloudTask::is_shared(self)
    }

    fn dependencies(&self) -> Vec<Link> {
        self.links().into_iter().cloned().collect()
    }

    fn resolve(&mut self, ids: &IdTable) {
        for link in self.links_mut() {
            if link.is_resolved() {
                continue;
            }
            if let Some(id) = ids.get(link.key()) {
                link.resolve(id);
            }
        }
    }

    fn id(&self) -> Option<String> {
        CloudTask::id(self).map(str::to_string)
    }

    async fn run(&mut self, ctx: &Context<T::Cloud>) -> Result<TaskOutcome> {
        let key = CloudTask::key(self);
        let lifecycle = CloudTask::lifecycle(self);

        let actual = self.find(ctx).await?;

        if lifecycle == Lifecycle::Ignore {
            debug!(task = %key, "Lifecycle is Ignore, skipping");
            return Ok(TaskOutcome::Skipped {
                reason: "lifecycle is Ignore".into(),
            });
        }

        if CloudTask::is_shared(self) {
            let Some(actual) = actual else {
                return Err(CloudError::MissingSharedResource {
                    task: key.to_string(),
                });
            };
            self.adopt(&actual);
            debug!(task = %key, id = ?CloudTask::id(self), "Using shared resource");
            return Ok(TaskOutcome::UpToDate);
        }

        if actual.is_none()
            && matches!(
                lifecycle,
                Lifecycle::ExistsAndWarnIfChanges | Lifecycle::ExistsAndValidates
            )
        {
            return Err(CloudError::MissingRequiredResource {
                task: key.to_string(),
            });
        }

        if let Some(actual) = &actual {
            self.adopt(actual);
        }

        let changes = Changes::compute(&*self, actual.as_ref())?;
        if actual.is_some() && changes.is_empty() {
            debug!(task = %key, "Up to date");
            return Ok(TaskOutcome::UpToDate);
        }

        T::check_changes(actual.as_ref(), self, &changes)?;

        match lifecycle {
            Lifecycle::ExistsAndWarnIfChanges => {
                warn!(task = %key, fields = ?changes.names(), "Existing resource differs, not changing it");
                return Ok(TaskOutcome::Warned {
                    fields: changes.names(),
                });
            }
            Lifecycle::ExistsAndValidates => {
                return Err(CloudError::ValidationFailed {
                    task: key.to_string(),
                    fields: changes.names(),
                });
            }
            _ => {}
        }

        let action = if actual.is_some() {
            ActionType::Update
        } else {
            ActionType::Create
        };

        if ctx.dry_run {
            return Ok(TaskOutcome::Planned {
                action,
                fields: changes.names(),
            });
        }

        ctx.check_cancelled()?;
        match self.render(ctx, actual.as_ref(), &changes).await {
            Ok(()) => {}
            Err(CloudError::AlreadyExists { kind, name }) => {
                info!(task = %key, "Resource already exists, looking it up");
                match self.find(ctx).await? {
                    Some(found) => self.adopt(&found),
                    None => return Err(CloudError::AlreadyExists { kind, name }),
                }
            }
            Err(e) => return Err(e),
        }

        if CloudTask::id(self).is_none() {
            if let Some(found) = self.find(ctx).await? {
                self.adopt(&found);
            }
        }

        info!(task = %key, action = %action, id = ?CloudTask::id(self), "Rendered");
        Ok(match action {
            ActionType::Create => TaskOutcome::Created,
            _ => TaskOutcome::Updated {
                fields: changes.names(),
            },
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
