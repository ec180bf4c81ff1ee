//! In-memory set of tasks keyed by `<Kind>/<name>`
//!
//! The graph is pure data. Ordering lives in the reconciler.

use crate::error::{CloudError, Result};
use crate::task::{CloudTask, Task, TaskKey};
use std::collections::BTreeMap;
use std::fmt;

pub struct TaskGraph<C> {
    tasks: BTreeMap<TaskKey, Box<dyn Task<C>>>,
}

impl<C: 'static> TaskGraph<C> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Fails with `DuplicateTask` when the key is taken
    pub fn add_task<T: Task<C> + 'static>(&mut self, task: T) -> Result<()> {
        self.add_boxed(Box::new(task))
    }

    pub fn add_boxed(&mut self, task: Box<dyn Task<C>>) -> Result<()> {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return Err(CloudError::DuplicateTask(key.to_string()));
        }
        self.tasks.insert(key, task);
        Ok(())
    }

    pub fn get_by_name(&self, key: &TaskKey) -> Option<&dyn Task<C>> {
        self.tasks.get(key).map(|t| t.as_ref())
    }

    /// Typed lookup by kind and name
    pub fn get<T: CloudTask<Cloud = C>>(&self, name: &str) -> Option<&T> {
        self.tasks
            .get(&TaskKey::of::<T>(name))
            .and_then(|t| t.as_any().downcast_ref::<T>())
    }

    /// Every task of one kind, in name order
    pub fn tasks_of<T: CloudTask<Cloud = C>>(&self) -> Vec<&T> {
        self.tasks
            .values()
            .filter_map(|t| t.as_any().downcast_ref::<T>())
            .collect()
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &dyn Task<C>)> {
        self.tasks.iter().map(|(k, t)| (k, t.as_ref()))
    }

    pub(crate) fn take(&mut self, key: &TaskKey) -> Option<Box<dyn Task<C>>> {
        self.tasks.remove(key)
    }

    pub(crate) fn put_back(&mut self, key: TaskKey, task: Box<dyn Task<C>>) {
        self.tasks.insert(key, task);
    }
}

impl<C: 'static> Default for TaskGraph<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TaskGraph<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tasks.keys()).finish()
    }
}
