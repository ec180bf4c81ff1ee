//! In-memory [`ResourceApi`] backing the offline clouds
//!
//! Every call is appended to a [`CallLog`] shared by all stores of one
//! cloud, and faults can be queued per kind and operation.

use crate::adapter::{CloudResource, ListFilter, ResourceApi, Scope, Tags};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    CreateOrUpdate,
    Delete,
    GetTags,
    AddTags,
    RemoveTags,
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::List | Operation::GetTags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails retryably without effect
    Transient,
    /// The create lands but reports a conflict
    AlreadyExists,
    /// The call fails with a non-retryable error
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: &'static str,
    pub op: Operation,
    /// Name for upserts, id otherwise
    pub target: String,
}

#[derive(Default)]
struct LogState {
    calls: Vec<Call>,
    faults: HashMap<(&'static str, Operation), VecDeque<Fault>>,
}

#[derive(Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<LogState>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and hands back the next queued fault for it
    pub fn record(&self, kind: &'static str, op: Operation, target: &str) -> Option<Fault> {
        let mut state = self.lock();
        state.calls.push(Call {
            kind,
            op,
            target: target.to_string(),
        });
        state.faults.get_mut(&(kind, op)).and_then(VecDeque::pop_front)
    }

    /// Queues `fault` for the next `times` calls of `op` on `kind`
    pub fn inject(&self, kind: &'static str, op: Operation, fault: Fault, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry((kind, op)).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op.is_mutation())
            .cloned()
            .collect()
    }

    /// `Kind:id` of every successful-or-not delete call, in order
    pub fn deletes(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == Operation::Delete)
            .map(|c| format!("{}:{}", c.kind, c.target))
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.faults.clear();
    }
}

impl fmt::Debug for CallLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallLog")
            .field("calls", &self.lock().calls.len())
            .finish()
    }
}

/// Returns a reason when the resource with this id may not be deleted yet
pub type DeleteGuard = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct StoreState<R> {
    records: BTreeMap<String, (Scope, R)>,
    next_id: u64,
}

pub struct MemoryStore<R: CloudResource> {
    prefix: &'static str,
    tag_api: bool,
    log: CallLog,
    state: Mutex<StoreState<R>>,
    guard: Mutex<Option<DeleteGuard>>,
}

impl<R: CloudResource> MemoryStore<R> {
    /// Ids are `<prefix>-<n>`
    pub fn new(prefix: &'static str, log: CallLog) -> Self {
        Self {
            prefix,
            tag_api: false,
            log,
            state: Mutex::new(StoreState {
                records: BTreeMap::new(),
                next_id: 0,
            }),
            guard: Mutex::new(None),
        }
    }

    /// Exposes the separate tag operations
    pub fn with_tag_api(mut self) -> Self {
        self.tag_api = R::TAGGABLE;
        self
    }

    pub fn set_delete_guard(&self, guard: DeleteGuard) {
        *self.guard.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint_id(state: &mut StoreState<R>, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }

    /// Seeds a record without logging; a missing id is assigned
    pub fn insert(&self, scope: &Scope, record: R) -> R {
        let mut state = self.lock();
        let record = match record.id() {
            Some(_) => record,
            None => {
                let id = Self::mint_id(&mut state, self.prefix);
                record.with_id(id)
            }
        };
        if let Some(id) = record.id() {
            state
                .records
                .insert(id.to_string(), (scope.clone(), record.clone()));
        }
        record
    }

    pub fn get(&self, id: &str) -> Option<R> {
        self.lock().records.get(id).map(|(_, r)| r.clone())
    }

    /// Every record, in id order
    pub fn records(&self) -> Vec<R> {
        self.lock().records.values().map(|(_, r)| r.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().records.contains_key(id)
    }

    /// Records stored under a scope of this name
    pub fn count_in(&self, scope_name: &str) -> usize {
        self.lock()
            .records
            .values()
            .filter(|(s, _)| s.name() == scope_name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Applies `f` to the stored record
    pub fn update(&self, id: &str, f: impl FnOnce(&mut R)) -> bool {
        match self.lock().records.get_mut(id) {
            Some((_, record)) => {
                f(record);
                true
            }
            None => false,
        }
    }

    fn fail(&self, fault: Fault, op: &str, target: &str) -> CloudError {
        match fault {
            Fault::Transient => CloudError::transient(
                format!("{}.{}", R::KIND, op),
                format!("injected throttling on {}", target),
            ),
            Fault::AlreadyExists => CloudError::AlreadyExists {
                kind: R::KIND.to_string(),
                name: target.to_string(),
            },
            Fault::Rejected => CloudError::OperationFailed {
                operation: format!("{}.{}", R::KIND, op),
                attempts: 1,
                message: format!("injected rejection of {}", target),
            },
        }
    }

    fn tags_of<'a>(&self, state: &'a mut StoreState<R>, id: &str) -> Result<&'a mut Tags> {
        state
            .records
            .get_mut(id)
            .and_then(|(_, r)| r.tags_mut())
            .ok_or_else(|| CloudError::NotFound {
                kind: R::KIND.to_string(),
                name: id.to_string(),
            })
    }
}

#[async_trait]
impl<R: CloudResource> ResourceApi<R> for MemoryStore<R> {
    async fn list(&self, scope: &Scope, filter: &ListFilter) -> Result<Vec<R>> {
        if let Some(fault) = self.log.record(R::KIND, Operation::List, scope.name()) {
            return Err(self.fail(fault, "list", scope.name()));
        }
        Ok(self
            .lock()
            .records
            .values()
            .filter(|(s, r)| s == scope && filter.matches(r))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_or_update(&self, scope: &Scope, desired: R) -> Result<R> {
        let fault = self
            .log
            .record(R::KIND, Operation::CreateOrUpdate, desired.name());
        if let Some(fault @ (Fault::Transient | Fault::Rejected)) = fault {
            return Err(self.fail(fault, "create", desired.name()));
        }

        let mut state = self.lock();
        let existing = match desired.id() {
            Some(id) if state.records.contains_key(id) => Some(id.to_string()),
            _ => state
                .records
                .iter()
                .find(|(_, (s, r))| {
                    s == scope && r.name() == desired.name() && r.parent() == desired.parent()
                })
                .map(|(id, _)| id.clone()),
        };

        let id = match existing {
            Some(id) => id,
            None => Self::mint_id(&mut state, self.prefix),
        };
        let record = desired.with_id(id.clone());
        state.records.insert(id, (scope.clone(), record.clone()));
        drop(state);

        if fault == Some(Fault::AlreadyExists) {
            return Err(self.fail(Fault::AlreadyExists, "create", record.name()));
        }
        Ok(record)
    }

    async fn delete(&self, _scope: &Scope, id: &str) -> Result<()> {
        if let Some(fault) = self.log.record(R::KIND, Operation::Delete, id) {
            return Err(self.fail(fault, "delete", id));
        }
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = guard.and_then(|g| g(id)) {
            return Err(CloudError::transient(
                format!("{}.delete", R::KIND),
                format!("{} {} has dependents: {}", R::KIND, id, reason),
            ));
        }
        self.lock().records.remove(id);
        Ok(())
    }

    fn supports_tags(&self) -> bool {
        self.tag_api
    }

    async fn get_tags(&self, _scope: &Scope, id: &str) -> Result<Tags> {
        if !self.tag_api {
            return Err(CloudError::unsupported(R::KIND, "get_tags"));
        }
        if let Some(fault) = self.log.record(R::KIND, Operation::GetTags, id) {
            return Err(self.fail(fault, "get_tags", id));
        }
        let mut state = self.lock();
        Ok(self.tags_of(&mut state, id)?.clone())
    }

    async fn add_tags(&self, _scope: &Scope, id: &str, tags: &Tags) -> Result<()> {
        if !self.tag_api {
            return Err(CloudError::unsupported(R::KIND, "add_tags"));
        }
        if let Some(fault) = self.log.record(R::KIND, Operation::AddTags, id) {
            return Err(self.fail(fault, "add_tags", id));
        }
        let mut state = self.lock();
        self.tags_of(&mut state, id)?
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn remove_tags(&self, _scope: &Scope, id: &str, keys: &[String]) -> Result<()> {
        if !self.tag_api {
            return Err(CloudError::unsupported(R::KIND, "remove_tags"));
        }
        if let Some(fault) = self.log.record(R::KIND, Operation::RemoveTags, id) {
            return Err(self.fail(fault, "remove_tags", id));
        }
        let mut state = self.lock();
        let tags = self.tags_of(&mut state, id)?;
        for key in keys {
            tags.remove(key);
        }
        Ok(())
    }
}

impl<R: CloudResource> fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &R::KIND)
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::find_unique;

    #[derive(Debug, Clone, PartialEq)]
    struct Net {
        id: Option<String>,
        name: String,
        parent: Option<String>,
        tags: Tags,
    }

    impl Net {
        fn named(name: &str) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                parent: None,
                tags: Tags::new(),
            }
        }
    }

    impl CloudResource for Net {
        const KIND: &'static str = "Net";
        const TAGGABLE: bool = true;

        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn parent(&self) -> Option<&str> {
            self.parent.as_deref()
        }

        fn tags(&self) -> Option<&Tags> {
            Some(&self.tags)
        }

        fn tags_mut(&mut self) -> Option<&mut Tags> {
            Some(&mut self.tags)
        }

        fn with_id(mut self, id: String) -> Self {
            self.id = Some(id);
            self
        }
    }

    fn scope() -> Scope {
        Scope::region("cn-hangzhou")
    }

    #[tokio::test]
    async fn test_upsert_keeps_id() {
        let store = MemoryStore::<Net>::new("net", CallLog::new());
        let first = store.create_or_update(&scope(), Net::named("a")).await.unwrap();
        let second = store.create_or_update(&scope(), Net::named("a")).await.unwrap();
        assert_eq!(first.id.as_deref(), Some("net-1"));
        assert_eq!(second.id, first.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_scoped() {
        let store = MemoryStore::<Net>::new("net", CallLog::new());
        store.insert(&scope(), Net::named("a"));
        store.insert(&Scope::region("cn-beijing"), Net::named("a"));

        let found = store.list(&scope(), &ListFilter::by_name("a")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_find_unique_ambiguous() {
        let store = MemoryStore::<Net>::new("net", CallLog::new());
        store.insert(&scope(), Net::named("dup"));
        store.insert(&scope(), Net::named("dup"));

        let err = find_unique(&store, &scope(), &ListFilter::by_name("dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AmbiguousFind { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_faults_and_log() {
        let log = CallLog::new();
        let store = MemoryStore::<Net>::new("net", log.clone());
        log.inject("Net", Operation::CreateOrUpdate, Fault::Transient, 1);

        assert!(store
            .create_or_update(&scope(), Net::named("a"))
            .await
            .unwrap_err()
            .is_transient());
        assert!(store.is_empty());

        log.inject("Net", Operation::CreateOrUpdate, Fault::AlreadyExists, 1);
        let err = store
            .create_or_update(&scope(), Net::named("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AlreadyExists { .. }));
        assert_eq!(store.len(), 1);

        assert_eq!(log.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_succeeds_and_guard() {
        let log = CallLog::new();
        let store = MemoryStore::<Net>::new("net", log.clone());
        store.delete(&scope(), "net-404").await.unwrap();

        let net = store.insert(&scope(), Net::named("a"));
        let id = net.id.clone().unwrap();
        store.set_delete_guard(Arc::new(|_| Some("vswitch-1".to_string())));
        assert!(store.delete(&scope(), &id).await.unwrap_err().is_transient());
        assert!(store.contains(&id));

        assert_eq!(log.deletes(), vec!["Net:net-404", format!("Net:{id}").as_str()]);
    }

    #[tokio::test]
    async fn test_tag_api() {
        let store = MemoryStore::<Net>::new("net", CallLog::new()).with_tag_api();
        let net = store.insert(&scope(), Net::named("a"));
        let id = net.id.unwrap();

        let mut tags = Tags::new();
        tags.insert("KubernetesCluster".into(), "c".into());
        tags.insert("extra".into(), "1".into());
        store.add_tags(&scope(), &id, &tags).await.unwrap();
        store
            .remove_tags(&scope(), &id, &["extra".to_string()])
            .await
            .unwrap();

        let actual = store.get_tags(&scope(), &id).await.unwrap();
        assert_eq!(actual.len(), 1);
        assert!(store.supports_tags());
    }
}
