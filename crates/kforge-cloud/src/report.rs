//! Outcomes of a reconcile pass

use crate::error::{CloudError, ErrorKind, Result};
use crate::task::TaskKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type of action taken (or planned) for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of running one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Created,
    Updated { fields: Vec<String> },
    UpToDate,
    /// Differences found on an `ExistsAndWarnIfChanges` task
    Warned { fields: Vec<String> },
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
    /// Dry-run result
    Planned { action: ActionType, fields: Vec<String> },
}

impl TaskOutcome {
    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            TaskOutcome::Created => Some(ActionType::Create),
            TaskOutcome::Updated { .. } => Some(ActionType::Update),
            TaskOutcome::UpToDate | TaskOutcome::Warned { .. } => Some(ActionType::NoOp),
            TaskOutcome::Planned { action, .. } => Some(*action),
            TaskOutcome::Skipped { .. } | TaskOutcome::Failed { .. } => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, TaskOutcome::Created | TaskOutcome::Updated { .. })
    }
}

/// Outcome of a single task in a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub key: TaskKey,

    /// Cloud id after the run, if known
    pub id: Option<String>,

    pub outcome: TaskOutcome,
}

/// Result of a reconcile pass
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Per-task results, in completion order
    pub results: Vec<TaskResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    #[serde(skip)]
    errors: Vec<(TaskKey, CloudError)>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_outcome(&mut self, key: TaskKey, id: Option<String>, outcome: TaskOutcome) {
        self.results.push(TaskResult { key, id, outcome });
    }

    pub fn add_skipped(&mut self, key: TaskKey, reason: impl Into<String>) {
        self.add_outcome(
            key,
            None,
            TaskOutcome::Skipped {
                reason: reason.into(),
            },
        );
    }

    pub fn add_failure(&mut self, key: TaskKey, error: CloudError) {
        self.add_outcome(
            key.clone(),
            None,
            TaskOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        );
        self.errors.push((key, error));
    }

    pub fn outcome(&self, key: &TaskKey) -> Option<&TaskOutcome> {
        self.results
            .iter()
            .find(|r| &r.key == key)
            .map(|r| &r.outcome)
    }

    pub fn errors(&self) -> &[(TaskKey, CloudError)] {
        &self.errors
    }

    pub fn mutation_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_mutation()).count()
    }

    /// Fails with the first recorded error
    pub fn into_result(mut self) -> Result<Self> {
        if self.errors.is_empty() {
            return Ok(self);
        }
        let (_, error) = self.errors.remove(0);
        Err(error)
    }

    /// The pass as a plan of actions
    pub fn plan(&self) -> Plan {
        let actions = self
            .results
            .iter()
            .filter_map(|r| {
                let action_type = r.outcome.action_type()?;
                let fields = match &r.outcome {
                    TaskOutcome::Updated { fields }
                    | TaskOutcome::Warned { fields }
                    | TaskOutcome::Planned { fields, .. } => fields.clone(),
                    _ => Vec::new(),
                };
                let mut details = HashMap::new();
                if !fields.is_empty() {
                    details.insert("fields".to_string(), serde_json::json!(fields));
                }
                Some(Action {
                    id: r.key.to_string(),
                    action_type,
                    resource_type: r.key.kind.clone(),
                    resource_id: r.key.name.clone(),
                    description: format!("{} {}", action_type, r.key),
                    details,
                })
            })
            .collect();
        Plan::new(actions)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = self.plan().summary();
        for result in &self.results {
            match result.outcome {
                TaskOutcome::Warned { .. } => summary.warned += 1,
                TaskOutcome::Skipped { .. } => summary.skipped += 1,
                TaskOutcome::Failed { .. } => summary.failed += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Represents a planned action for a cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action (the task key)
    pub id: String,

    pub action_type: ActionType,

    /// Resource kind (e.g., "Vpc", "LoadBalancer")
    pub resource_type: String,

    /// Resource name
    pub resource_id: String,

    pub description: String,

    /// Additional details about the action
    pub details: HashMap<String, serde_json::Value>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
            ..Default::default()
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub no_change: usize,
    pub warned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} unchanged",
            self.create, self.update, self.no_change
        )?;
        for (count, label) in [
            (self.warned, "warned"),
            (self.skipped, "skipped"),
            (self.failed, "failed"),
        ] {
            if count > 0 {
                write!(f, ", {count} {label}")?;
            }
        }
        Ok(())
    }
}
