//! Task service — submit, poll, wait for and cancel concurrent runs.
//!
//! Every submitted task runs on its own tokio task with its own
//! [`CancellationToken`]. The service keeps one status channel per task, so
//! readers never contend with the run that writes the result.
//!
//! Finished results stay until collected with [`TaskService::take_result`]
//! or [`TaskService::remove`]; past the retention limit the oldest finished
//! ones are dropped on the next submit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use scribeloop_core::article::{Article, FailureReport};
use scribeloop_core::error::EngineError;
use scribeloop_core::event::{EngineEvent, EventBus};
use scribeloop_core::task::{Task, TaskConfig, TaskId};

use crate::loop_runner::{ExecutionEngine, TaskOutcome};

/// Where a submitted task stands.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Completed(Article),
    Failed(FailureReport),
}

impl TaskStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<TaskOutcome> for TaskStatus {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed(article) => Self::Completed(article),
            TaskOutcome::Failed(report) => Self::Failed(report),
        }
    }
}

/// Finished results kept before the oldest are dropped.
pub const DEFAULT_RETAINED_RESULTS: usize = 1024;

struct TaskHandle {
    /// Submission order
    order: u64,
    cancel: CancellationToken,
    status: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    fn is_finished(&self) -> bool {
        !self.status.borrow().is_pending()
    }
}

/// Front door for callers: accepts tasks and hands back results by id.
#[derive(Clone)]
pub struct TaskService {
    engine: Arc<ExecutionEngine>,
    tasks: Arc<RwLock<HashMap<TaskId, TaskHandle>>>,
    next_order: Arc<AtomicU64>,
    retained: usize,
}

impl TaskService {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            next_order: Arc::new(AtomicU64::new(0)),
            retained: DEFAULT_RETAINED_RESULTS,
        }
    }

    /// Keep at most `limit` finished results. Running tasks never count.
    pub fn with_retention(mut self, limit: usize) -> Self {
        self.retained = limit;
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Subscribe to events from every task this service runs.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Arc<EngineEvent>> {
        self.engine.event_bus().subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.engine.event_bus()
    }

    /// Validate and start a task. Returns immediately with its id.
    ///
    /// Tasks naming unregistered tools are rejected here and never run.
    pub async fn submit(&self, task: Task) -> Result<TaskId, EngineError> {
        self.engine.validate(&task)?;

        let id = task.id;
        let task = Arc::new(task);
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(TaskStatus::Pending);

        {
            let mut tasks = self.tasks.write().await;
            prune_finished(&mut tasks, self.retained);
            tasks.insert(
                id,
                TaskHandle {
                    order: self.next_order.fetch_add(1, Ordering::Relaxed),
                    cancel: cancel.clone(),
                    status: rx,
                },
            );
        }

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let status = match engine.run(task, cancel).await {
                Ok(report) => TaskStatus::from(report.outcome),
                // Validated above; only reachable if the registry changed underneath.
                Err(e) => {
                    error!(task_id = %id, error = %e, "Task rejected by engine");
                    TaskStatus::Failed(FailureReport {
                        task_id: id,
                        reason: e,
                        iterations: 0,
                        attempts: Vec::new(),
                        elapsed_ms: 0,
                    })
                }
            };
            let _ = tx.send(status);
        });

        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Current status, or `None` for an unknown id.
    pub async fn get_result(&self, id: TaskId) -> Option<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).map(|h| h.status.borrow().clone())
    }

    /// Request cancellation. Returns `false` for unknown or finished tasks.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(&id) {
            Some(handle) if handle.status.borrow().is_pending() => {
                info!(task_id = %id, "Cancelling task");
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait until the task leaves `Pending`. `None` for an unknown id.
    pub async fn wait(&self, id: TaskId) -> Option<TaskStatus> {
        let mut rx = {
            let tasks = self.tasks.read().await;
            tasks.get(&id)?.status.clone()
        };
        let finished = rx.wait_for(|s| !s.is_pending()).await.map(|s| s.clone());
        match finished {
            Ok(status) => Some(status),
            // Sender gone without a final status: the run panicked.
            Err(_) => Some(rx.borrow().clone()),
        }
    }

    /// Build a task from `topic` and `config`, then submit it.
    pub async fn submit_topic(
        &self,
        topic: impl Into<String>,
        config: TaskConfig,
    ) -> scribeloop_core::Result<TaskId> {
        let task = Task::new(topic, config)?;
        Ok(self.submit(task).await?)
    }

    /// Hand over a finished result and forget the task.
    ///
    /// A running task stays tracked and yields `Some(Pending)`.
    pub async fn take_result(&self, id: TaskId) -> Option<TaskStatus> {
        let mut tasks = self.tasks.write().await;
        let status = tasks.get(&id)?.status.borrow().clone();
        if !status.is_pending() {
            tasks.remove(&id);
        }
        Some(status)
    }

    /// Forget a finished task. Returns `false` for unknown or running tasks.
    pub async fn remove(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let finished = tasks.get(&id).is_some_and(TaskHandle::is_finished);
        if finished {
            tasks.remove(&id);
        }
        finished
    }

    /// Ids of every task still tracked: running, or finished and uncollected.
    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.read().await.keys().copied().collect()
    }
}

/// Drop the oldest finished entries until at most `keep` remain.
fn prune_finished(tasks: &mut HashMap<TaskId, TaskHandle>, keep: usize) {
    let mut finished: Vec<(u64, TaskId)> = tasks
        .iter()
        .filter(|(_, h)| h.is_finished())
        .map(|(id, h)| (h.order, *id))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort_unstable_by_key(|(order, _)| *order);
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
    debug!(dropped = excess, kept = keep, "Dropped oldest finished results");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedCapability, echo_retrieval, registry_with};
    use scribeloop_core::task::RetryPolicy;
    use scribeloop_core::tool::ToolOutput;
    use std::time::Duration;

    fn service(tools: Vec<(&str, Arc<ScriptedCapability>)>) -> TaskService {
        let engine = ExecutionEngine::new(
            Arc::new(registry_with(tools)),
            Arc::new(EventBus::default()),
        );
        TaskService::new(Arc::new(engine))
    }

    fn task(required: &[&str]) -> Task {
        let config = TaskConfig {
            retry: RetryPolicy::immediate(),
            ..TaskConfig::default()
        }
        .with_required(required);
        Task::new("Soil microbiome", config).unwrap()
    }

    #[tokio::test]
    async fn submit_then_wait_for_article() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]);
        let id = svc.submit(task(&["search"])).await.unwrap();

        let article = match svc.wait(id).await.unwrap() {
            TaskStatus::Completed(article) => article,
            other => panic!("Expected completion, got {other:?}"),
        };
        assert_eq!(article.task_id, id);
        assert_eq!(svc.get_result(id).await, Some(TaskStatus::Completed(article)));
    }

    #[tokio::test]
    async fn unknown_tool_rejected_at_submit() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]);
        let err = svc.submit(task(&["ghost"])).await.unwrap_err();
        assert_eq!(err, EngineError::UnknownTool { name: "ghost".into() });
        assert!(svc.task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn submit_topic_validates_topic() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]);
        let err = svc
            .submit_topic("   ", TaskConfig::default().with_required(&["search"]))
            .await
            .unwrap_err();
        assert!(matches!(err, scribeloop_core::Error::Task(_)));

        let id = svc
            .submit_topic("Soil", TaskConfig::default().with_required(&["search"]))
            .await
            .unwrap();
        assert!(matches!(svc.wait(id).await, Some(TaskStatus::Completed(_))));
    }

    #[tokio::test]
    async fn unknown_id_yields_none() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]);
        let id = TaskId::new();
        assert_eq!(svc.get_result(id).await, None);
        assert_eq!(svc.wait(id).await, None);
        assert!(!svc.cancel(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_task() {
        let slow = Arc::new(
            ScriptedCapability::retrieval(vec![Ok(ToolOutput::text("slow"))])
                .with_delays(vec![Duration::from_secs(30)]),
        );
        let svc = service(vec![("search", slow)]);
        let id = svc.submit(task(&["search"])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(svc.get_result(id).await.unwrap().is_pending());
        assert!(svc.cancel(id).await);

        let TaskStatus::Failed(report) = svc.wait(id).await.unwrap() else {
            panic!("Expected failure");
        };
        assert_eq!(report.reason, EngineError::Cancelled);
        // Already finished.
        assert!(!svc.cancel(id).await);
    }

    #[tokio::test]
    async fn taking_a_result_releases_the_task() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]);
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(svc.submit(task(&["search"])).await.unwrap());
        }
        for id in &ids {
            svc.wait(*id).await.unwrap();
        }
        assert_eq!(svc.task_ids().await.len(), 20);

        for id in &ids {
            assert!(matches!(svc.take_result(*id).await, Some(TaskStatus::Completed(_))));
        }
        assert!(svc.task_ids().await.is_empty());
        assert_eq!(svc.take_result(ids[0]).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_is_not_removed() {
        let slow = Arc::new(
            ScriptedCapability::retrieval(vec![Ok(ToolOutput::text("slow"))])
                .with_delays(vec![Duration::from_secs(30)]),
        );
        let svc = service(vec![("search", slow)]);
        let id = svc.submit(task(&["search"])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(svc.take_result(id).await, Some(TaskStatus::Pending));
        assert!(!svc.remove(id).await);
        assert_eq!(svc.task_ids().await, vec![id]);

        svc.wait(id).await.unwrap();
        assert!(svc.remove(id).await);
        assert!(svc.task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn retention_drops_oldest_finished_results() {
        let svc = service(vec![("search", echo_retrieval("evidence"))]).with_retention(3);
        let mut ids = Vec::new();
        for _ in 0..6 {
            let id = svc.submit(task(&["search"])).await.unwrap();
            svc.wait(id).await.unwrap();
            ids.push(id);
        }

        // The sixth submit pruned down to three finished, then added itself.
        let mut kept = svc.task_ids().await;
        kept.sort_by_key(|id| ids.iter().position(|i| i == id));
        assert_eq!(kept, ids[2..].to_vec());
        assert_eq!(svc.get_result(ids[0]).await, None);
    }

    #[tokio::test]
    async fn concurrent_tasks_are_isolated() {
        let svc = service(vec![
            ("search", echo_retrieval("evidence")),
            (
                "broken",
                Arc::new(ScriptedCapability::retrieval(vec![Err(
                    scribeloop_core::error::CapabilityError::Fatal("down".into()),
                )])),
            ),
        ]);

        let ok_ids: Vec<_> = {
            let mut ids = Vec::new();
            for _ in 0..5 {
                ids.push(svc.submit(task(&["search"])).await.unwrap());
            }
            ids
        };
        let bad = svc.submit(task(&["broken"])).await.unwrap();

        for id in ok_ids {
            assert!(matches!(svc.wait(id).await, Some(TaskStatus::Completed(_))));
        }
        assert!(matches!(svc.wait(bad).await, Some(TaskStatus::Failed(_))));
    }
}
