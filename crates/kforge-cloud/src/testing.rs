//! In-crate fake cloud for engine tests

use crate::changes::Changes;
use crate::error::{CloudError, Result};
use crate::task::{CloudTask, Context, Lifecycle, Link};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Record {
    id: String,
    size: Option<u32>,
    label: Option<String>,
    parent: Option<String>,
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Record>,
    next_id: u32,
    calls: usize,
    mutations: usize,
    races: HashSet<String>,
    failures: HashMap<String, fn() -> CloudError>,
    slow: HashMap<String, Duration>,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn mutations(&self) -> usize {
        self.state().mutations
    }

    pub fn id_of(&self, name: &str) -> Option<String> {
        self.state().records.get(name).map(|r| r.id.clone())
    }

    pub fn parent_of(&self, name: &str) -> Option<String> {
        self.state().records.get(name).and_then(|r| r.parent.clone())
    }

    /// The next create of `name` lands but reports already-exists
    pub fn race_on_create(&self, name: &str) {
        self.state().races.insert(name.to_string());
    }

    pub fn fail_render(&self, name: &str, error: fn() -> CloudError) {
        self.state().failures.insert(name.to_string(), error);
    }

    pub fn slow_render(&self, name: &str, delay: Duration) {
        self.state().slow.insert(name.to_string(), delay);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Widget {
    pub name: String,
    pub size: Option<u32>,
    pub label: Option<String>,
    pub parent: Option<Link>,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: None,
            label: None,
            parent: None,
            id: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.parent = Some(Link::to::<Widget>(name));
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

#[async_trait]
impl CloudTask for Widget {
    type Cloud = FakeCloud;
    const KIND: &'static str = "Widget";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        self.parent.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.parent.iter_mut().collect()
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<FakeCloud>) -> Result<Option<Self>> {
        let mut state = ctx.cloud.state();
        state.calls += 1;
        Ok(state.records.get(&self.name).map(|r| Widget {
            name: self.name.clone(),
            size: r.size,
            label: r.label.clone(),
            parent: r.parent.clone().map(Link::observed::<Widget>),
            id: Some(r.id.clone()),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["size"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<FakeCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let delay = ctx.cloud.state().slow.get(&self.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let parent = match &self.parent {
            Some(link) => Some(link.require_id(&self.key())?.to_string()),
            None => None,
        };

        let mut state = ctx.cloud.state();
        state.calls += 1;
        if let Some(error) = state.failures.get(&self.name) {
            return Err(error());
        }
        state.mutations += 1;

        let id = match state.records.get(&self.name) {
            Some(r) => r.id.clone(),
            None => {
                state.next_id += 1;
                format!("w-{}", state.next_id)
            }
        };
        state.records.insert(
            self.name.clone(),
            Record {
                id: id.clone(),
                size: self.size,
                label: self.label.clone(),
                parent,
            },
        );

        if state.races.remove(&self.name) {
            return Err(CloudError::AlreadyExists {
                kind: Self::KIND.into(),
                name: self.name.clone(),
            });
        }
        self.id = Some(id);
        Ok(())
    }
}
