//! Dependency-ordered, idempotent reconciliation of a task graph

use crate::error::{CloudError, ErrorKind, Result};
use crate::graph::TaskGraph;
use crate::report::{ReconcileReport, TaskOutcome};
use crate::task::{Context, IdTable, Task, TaskKey};
use futures_util::stream::{self, StreamExt};
use kforge_config::EngineConfig;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Tasks of one layer running at once
    pub concurrency: usize,
    /// Find, diff and check only
    pub dry_run: bool,
    /// Budget for the whole pass
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            dry_run: false,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl From<&EngineConfig> for ReconcileOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            dry_run: config.dry_run,
            deadline: config.deadline(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Layers tasks with Kahn's algorithm; ties within a layer are in key order.
///
/// Fails with `UnknownDependency` for a link to a task outside the graph
/// that carries no id, and with `DependencyCycle` naming the tasks left
/// over when no layer can be formed.
pub fn topological_layers<C: 'static>(graph: &TaskGraph<C>) -> Result<Vec<Vec<TaskKey>>> {
    let mut deps: BTreeMap<TaskKey, BTreeSet<TaskKey>> = BTreeMap::new();

    for (key, task) in graph.iter() {
        let mut edges = BTreeSet::new();
        for link in task.dependencies() {
            if graph.contains(link.key()) {
                if link.key() != key {
                    edges.insert(link.key().clone());
                } else {
                    return Err(CloudError::DependencyCycle(vec![key.to_string()]));
                }
            } else if !link.is_resolved() {
                return Err(CloudError::UnknownDependency {
                    task: key.to_string(),
                    dependency: link.key().to_string(),
                });
            }
        }
        deps.insert(key.clone(), edges);
    }

    let mut layers = Vec::new();
    while !deps.is_empty() {
        let ready: Vec<TaskKey> = deps
            .iter()
            .filter(|(_, edges)| edges.is_empty())
            .map(|(k, _)| k.clone())
            .collect();

        if ready.is_empty() {
            return Err(CloudError::DependencyCycle(
                deps.keys().map(ToString::to_string).collect(),
            ));
        }

        for key in &ready {
            deps.remove(key);
        }
        for edges in deps.values_mut() {
            for key in &ready {
                edges.remove(key);
            }
        }
        layers.push(ready);
    }

    Ok(layers)
}

pub struct Reconciler<C> {
    cloud: Arc<C>,
    cluster_name: String,
    options: ReconcileOptions,
}

impl<C: Send + Sync + 'static> Reconciler<C> {
    pub fn new(cloud: Arc<C>, cluster_name: impl Into<String>, options: ReconcileOptions) -> Self {
        Self {
            cloud,
            cluster_name: cluster_name.into(),
            options,
        }
    }

    /// Runs every task once.
    ///
    /// Ordering errors are returned before any adapter call. Task failures
    /// are recorded in the report: a failed task skips its dependents,
    /// `operation-failed` lets independent branches continue, and any
    /// other kind stops new layers from starting.
    pub async fn run(&self, graph: &mut TaskGraph<C>) -> Result<ReconcileReport> {
        let started = std::time::Instant::now();
        let layers = topological_layers(graph)?;

        let ctx = Context {
            cloud: self.cloud.clone(),
            cluster_name: self.cluster_name.clone(),
            cancel: self.options.cancel.clone(),
            deadline: self.options.deadline.map(|d| Instant::now() + d),
            dry_run: self.options.dry_run,
        };

        info!(
            cluster = %self.cluster_name,
            tasks = graph.len(),
            layers = layers.len(),
            dry_run = self.options.dry_run,
            "Reconciling"
        );

        let mut report = ReconcileReport::new();
        let mut ids = IdTable::default();
        let mut failed: HashSet<TaskKey> = HashSet::new();
        let mut halted: Option<String> = None;

        for layer in layers {
            if halted.is_none() {
                if let Err(e) = ctx.check_cancelled() {
                    halted = Some(e.to_string());
                }
            }
            if let Some(reason) = &halted {
                for key in layer {
                    report.add_skipped(key, reason.clone());
                }
                continue;
            }

            let mut runnable: Vec<(TaskKey, Box<dyn Task<C>>)> = Vec::new();
            for key in layer {
                let Some(mut task) = graph.take(&key) else {
                    continue;
                };
                let blocked_by = task
                    .dependencies()
                    .into_iter()
                    .find(|link| failed.contains(link.key()));
                if let Some(link) = blocked_by {
                    debug!(task = %key, dependency = %link.key(), "Dependency failed, skipping");
                    report.add_skipped(key.clone(), format!("dependency {} failed", link.key()));
                    failed.insert(key.clone());
                    graph.put_back(key, task);
                    continue;
                }
                task.resolve(&ids);
                runnable.push((key, task));
            }

            let ctx_ref = &ctx;
            let mut results: Vec<(TaskKey, Box<dyn Task<C>>, Result<TaskOutcome>)> =
                stream::iter(runnable.into_iter().map(|(key, mut task)| async move {
                    let result = run_task(ctx_ref, task.as_mut()).await;
                    (key, task, result)
                }))
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;
            results.sort_by(|a, b| a.0.cmp(&b.0));

            for (key, task, result) in results {
                match result {
                    Ok(outcome) => {
                        let id = task.id();
                        if let Some(id) = &id {
                            ids.insert(key.clone(), id.clone());
                        }
                        report.add_outcome(key.clone(), id, outcome);
                    }
                    Err(e) => {
                        error!(task = %key, kind = %e.kind(), error = %e, "Task failed");
                        failed.insert(key.clone());
                        if e.kind() != ErrorKind::OperationFailed && halted.is_none() {
                            halted = Some(format!("stopped after {key} failed"));
                        }
                        report.add_failure(key.clone(), e);
                    }
                }
                graph.put_back(key, task);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.is_success() {
            info!(cluster = %self.cluster_name, summary = %report.summary(), "Reconcile finished");
        } else {
            warn!(cluster = %self.cluster_name, summary = %report.summary(), "Reconcile finished with failures");
        }
        Ok(report)
    }
}

/// One task under the pass deadline and cancellation token
///
/// A task still queued when the pass is cancelled is skipped, not failed.
async fn run_task<C: Send + Sync + 'static>(
    ctx: &Context<C>,
    task: &mut dyn Task<C>,
) -> Result<TaskOutcome> {
    if let Err(e) = ctx.check_cancelled() {
        debug!(task = %task.key(), reason = %e, "Pass stopped before task started");
        return Ok(TaskOutcome::Skipped {
            reason: e.to_string(),
        });
    }
    let run = async {
        match ctx.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, task.run(ctx))
                .await
                .map_err(|_| CloudError::DeadlineExceeded)?,
            None => task.run(ctx).await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(CloudError::Cancelled),
        result = run => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ActionType;
    use crate::task::Lifecycle;
    use crate::testing::{FakeCloud, Widget};

    fn graph(widgets: Vec<Widget>) -> TaskGraph<FakeCloud> {
        let mut graph = TaskGraph::new();
        for w in widgets {
            graph.add_task(w).unwrap();
        }
        graph
    }

    fn reconciler(cloud: &Arc<FakeCloud>) -> Reconciler<FakeCloud> {
        Reconciler::new(cloud.clone(), "c", ReconcileOptions::default())
    }

    #[test]
    fn test_duplicate_task() {
        let mut g = graph(vec![Widget::new("a")]);
        let err = g.add_task(Widget::new("a")).unwrap_err();
        assert!(matches!(err, CloudError::DuplicateTask(k) if k == "Widget/a"));
    }

    #[test]
    fn test_layers_are_name_ordered() {
        let g = graph(vec![
            Widget::new("net"),
            Widget::new("b").depends_on("net"),
            Widget::new("a").depends_on("net"),
            Widget::new("z"),
        ]);
        let layers = topological_layers(&g).unwrap();
        let names: Vec<Vec<&str>> = layers
            .iter()
            .map(|l| l.iter().map(|k| k.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["net", "z"], vec!["a", "b"]]);
    }

    #[test]
    fn test_unknown_dependency() {
        let g = graph(vec![Widget::new("a").depends_on("missing")]);
        assert!(matches!(
            topological_layers(&g),
            Err(CloudError::UnknownDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_call() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![
            Widget::new("a").depends_on("b"),
            Widget::new("b").depends_on("c"),
            Widget::new("c").depends_on("a"),
            Widget::new("d"),
        ]);
        let err = reconciler(&cloud).run(&mut g).await.unwrap_err();
        match err {
            CloudError::DependencyCycle(keys) => {
                assert_eq!(keys, vec!["Widget/a", "Widget/b", "Widget/c"])
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_ids_flow_to_dependents_and_second_run_is_quiet() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![Widget::new("net"), Widget::new("sub").depends_on("net")]);

        let report = reconciler(&cloud).run(&mut g).await.unwrap().into_result().unwrap();
        assert_eq!(report.mutation_count(), 2);
        let net_id = cloud.id_of("net").unwrap();
        assert_eq!(cloud.parent_of("sub"), Some(net_id));

        let mutations = cloud.mutations();
        let mut again = graph(vec![Widget::new("net"), Widget::new("sub").depends_on("net")]);
        let report = reconciler(&cloud).run(&mut again).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.mutation_count(), 0);
        assert_eq!(cloud.mutations(), mutations);
        assert_eq!(
            report.outcome(&TaskKey::new("Widget", "sub")),
            Some(&TaskOutcome::UpToDate)
        );
    }

    #[tokio::test]
    async fn test_immutable_change_never_renders() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![Widget::new("a").with_size(1)]);
        reconciler(&cloud).run(&mut g).await.unwrap().into_result().unwrap();
        let mutations = cloud.mutations();

        let mut g = graph(vec![Widget::new("a").with_size(2)]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap();
        assert!(matches!(
            report.into_result(),
            Err(CloudError::CannotChangeField { field, .. }) if field == "size"
        ));
        assert_eq!(cloud.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_lifecycles() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![
            Widget::new("ignored").with_lifecycle(Lifecycle::Ignore),
            Widget::new("required").with_lifecycle(Lifecycle::ExistsAndValidates),
        ]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap();
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "ignored")),
            Some(TaskOutcome::Skipped { .. })
        ));
        assert!(matches!(
            report.errors()[0].1,
            CloudError::MissingRequiredResource { .. }
        ));
        assert_eq!(cloud.mutations(), 0);
    }

    #[tokio::test]
    async fn test_warn_if_changes_does_not_mutate() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![Widget::new("a").with_label("one")]);
        reconciler(&cloud).run(&mut g).await.unwrap().into_result().unwrap();
        let mutations = cloud.mutations();

        let mut g = graph(vec![Widget::new("a")
            .with_label("two")
            .with_lifecycle(Lifecycle::ExistsAndWarnIfChanges)]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap();
        assert_eq!(
            report.outcome(&TaskKey::new("Widget", "a")),
            Some(&TaskOutcome::Warned {
                fields: vec!["label".into()]
            })
        );
        assert_eq!(cloud.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_rendering() {
        let cloud = Arc::new(FakeCloud::default());
        let mut g = graph(vec![Widget::new("net"), Widget::new("sub").depends_on("net")]);
        let options = ReconcileOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = Reconciler::new(cloud.clone(), "c", options)
            .run(&mut g)
            .await
            .unwrap();
        assert_eq!(report.summary().create, 2);
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "sub")),
            Some(TaskOutcome::Planned {
                action: ActionType::Create,
                ..
            })
        ));
        assert_eq!(cloud.mutations(), 0);
    }

    #[tokio::test]
    async fn test_already_exists_refinds() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.race_on_create("a");
        let mut g = graph(vec![Widget::new("a")]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap().into_result().unwrap();
        assert_eq!(report.results[0].id, cloud.id_of("a"));
        assert!(report.results[0].id.is_some());
    }

    #[tokio::test]
    async fn test_operation_failed_keeps_independent_branches() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.fail_render("bad", || CloudError::OperationFailed {
            operation: "create".into(),
            attempts: 3,
            message: "503".into(),
        });
        let mut g = graph(vec![
            Widget::new("bad"),
            Widget::new("child").depends_on("bad"),
            Widget::new("good"),
            Widget::new("grandchild").depends_on("child"),
            Widget::new("other").depends_on("good"),
        ]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap();
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "child")),
            Some(TaskOutcome::Skipped { .. })
        ));
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "grandchild")),
            Some(TaskOutcome::Skipped { .. })
        ));
        assert_eq!(
            report.outcome(&TaskKey::new("Widget", "other")),
            Some(&TaskOutcome::Created)
        );
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_new_layers() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.fail_render("bad", || CloudError::OwnershipConflict {
            kind: "Widget".into(),
            name: "bad".into(),
            owner: "other".into(),
        });
        let mut g = graph(vec![
            Widget::new("bad"),
            Widget::new("good"),
            Widget::new("other").depends_on("good"),
        ]);
        let report = reconciler(&cloud).run(&mut g).await.unwrap();
        assert_eq!(
            report.outcome(&TaskKey::new("Widget", "good")),
            Some(&TaskOutcome::Created)
        );
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "other")),
            Some(TaskOutcome::Skipped { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let cloud = Arc::new(FakeCloud::default());
        let options = ReconcileOptions::default();
        options.cancel.cancel();
        let mut g = graph(vec![Widget::new("a"), Widget::new("b").depends_on("a")]);
        let report = Reconciler::new(cloud.clone(), "c", options)
            .run(&mut g)
            .await
            .unwrap();
        assert_eq!(report.summary().skipped, 2);
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_render() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.slow_render("slow", Duration::from_secs(60));
        let options = ReconcileOptions::default();
        let cancel = options.cancel.clone();
        let mut g = graph(vec![Widget::new("slow"), Widget::new("after").depends_on("slow")]);

        let reconciler = Reconciler::new(cloud.clone(), "c", options);
        let (report, _) = tokio::join!(reconciler.run(&mut g), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let report = report.unwrap();
        assert!(matches!(
            report.errors()[0].1,
            CloudError::Cancelled
        ));
        assert!(matches!(
            report.outcome(&TaskKey::new("Widget", "after")),
            Some(TaskOutcome::Skipped { .. })
        ));
        assert!(cloud.id_of("slow").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_queued_tasks_in_the_same_layer() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.slow_render("a", Duration::from_secs(60));
        let options = ReconcileOptions {
            concurrency: 1,
            ..Default::default()
        };
        let cancel = options.cancel.clone();
        let mut g = graph(vec![Widget::new("a"), Widget::new("b"), Widget::new("c")]);

        let reconciler = Reconciler::new(cloud.clone(), "c", options);
        let (report, _) = tokio::join!(reconciler.run(&mut g), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let report = report.unwrap();

        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].0, TaskKey::new("Widget", "a"));
        for name in ["b", "c"] {
            assert!(matches!(
                report.outcome(&TaskKey::new("Widget", name)),
                Some(TaskOutcome::Skipped { .. })
            ));
            assert!(cloud.id_of(name).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_applies_to_the_pass() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.slow_render("slow", Duration::from_secs(60));
        let options = ReconcileOptions {
            deadline: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut g = graph(vec![Widget::new("slow")]);
        let report = Reconciler::new(cloud.clone(), "c", options)
            .run(&mut g)
            .await
            .unwrap();
        assert!(matches!(
            report.into_result(),
            Err(CloudError::DeadlineExceeded)
        ));
    }
}
