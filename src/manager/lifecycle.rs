//! Task creation, state transitions, progress and shutdown.

use super::{TaskManager, lock};
use crate::error::{Error, Result};
use crate::events::Subscription;
use crate::progress::ProgressCallback;
use crate::types::{
    CompletionCallback, ProgressSnapshot, TASK_COMPLETED, TASK_FAILED, Task, TaskEvent, TaskId,
    TaskOutput, TaskPayload, TaskStatus, TaskType,
};
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Handle to a launched task
///
/// Await it (directly or through [`TaskHandle::wait`]) to get the typed result.
/// Dropping the handle does not stop the task.
#[must_use = "the handle carries the task id and its result"]
pub struct TaskHandle<T> {
    task_id: TaskId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// ID of the task behind this handle
    pub fn id(&self) -> TaskId {
        self.task_id
    }

    /// Wait for the task to settle
    ///
    /// # Errors
    ///
    /// Returns the error that failed the task.
    pub async fn wait(self) -> Result<T> {
        let id = self.task_id;
        self.rx
            .await
            .unwrap_or_else(|_| Err(Error::Other(format!("task {id} ended without settling"))))
    }
}

impl<T: Send + 'static> IntoFuture for TaskHandle<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// Feeds progress of one task back into the manager
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    manager: TaskManager,
    id: TaskId,
}

impl ProgressReporter {
    pub(crate) fn report(&self, snapshot: ProgressSnapshot) {
        self.manager.update_progress(self.id, &snapshot, None);
    }

    pub(crate) fn report_with(
        &self,
        snapshot: ProgressSnapshot,
        extra: serde_json::Map<String, serde_json::Value>,
    ) {
        self.manager.update_progress(self.id, &snapshot, Some(extra));
    }

    /// Callback form handed to codec adapters
    pub(crate) fn callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |snapshot| reporter.report(snapshot))
    }
}

impl TaskManager {
    /// Create a task, then run `work` for it in the background
    ///
    /// `created` is published before this returns; everything else happens on
    /// the spawned execution. Fails with [`Error::Other`] when called outside a
    /// tokio runtime.
    pub(crate) fn spawn_task<T, F, Fut>(
        &self,
        task_type: TaskType,
        payload: TaskPayload,
        on_complete: Option<CompletionCallback<T>>,
        work: F,
    ) -> Result<TaskHandle<T>>
    where
        T: TaskOutput,
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("no tokio runtime to start the task on: {e}")))?;

        let task = Task::new(task_type, payload);
        let id = task.id;
        self.write_tasks().insert(task.clone());
        tracing::info!(task_id = %id, %task_type, "task created");
        self.publish(TaskEvent::Created(task));

        if let Some(callback) = on_complete {
            self.attach_completion_callback(id, callback, runtime.clone());
        }

        let (tx, rx) = oneshot::channel();
        let manager = self.clone();
        self.tracker.spawn_on(
            async move {
                let outcome = manager.execute(id, work).await;
                // The caller may have dropped the handle
                tx.send(outcome).ok();
            },
            &runtime,
        );

        Ok(TaskHandle { task_id: id, rx })
    }

    async fn execute<T, F, Fut>(&self, id: TaskId, work: F) -> Result<T>
    where
        T: TaskOutput,
        F: FnOnce(ProgressReporter) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = self.transition(id, TaskStatus::InProgress, |_| {})?;
        tracing::info!(task_id = %id, "task started");
        self.publish(TaskEvent::Started(started));

        let reporter = ProgressReporter {
            manager: self.clone(),
            id,
        };
        let outcome = match AssertUnwindSafe(work(reporter)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Other("task execution panicked".into())),
        };

        match outcome {
            Ok(output) => {
                self.complete(id, output.clone())?;
                Ok(output)
            }
            Err(e) => {
                self.fail(id, &e);
                Err(e)
            }
        }
    }

    fn complete<T: TaskOutput>(&self, id: TaskId, output: T) -> Result<()> {
        if let Some(task) = self.get_task(id)
            && task.progress < 100
        {
            let details = &task.details;
            self.update_progress(
                id,
                &ProgressSnapshot::finished(details.processed_bytes, details.total_bytes),
                None,
            );
        }

        let result = output.into_result();
        let task = self.transition(id, TaskStatus::Completed, move |task| {
            task.result = Some(result);
        })?;
        tracing::info!(task_id = %id, task_type = %task.task_type, "task completed");
        self.publish(TaskEvent::Completed(task));
        Ok(())
    }

    fn fail(&self, id: TaskId, error: &Error) {
        let message = error.to_string();
        tracing::error!(task_id = %id, error = %message, "task failed");
        match self.transition(id, TaskStatus::Failed, |task| task.error = Some(message)) {
            Ok(task) => self.publish(TaskEvent::Failed(task)),
            Err(e) => tracing::error!(task_id = %id, error = %e, "could not record task failure"),
        }
    }

    /// Apply a status change and return the updated snapshot
    fn transition(
        &self,
        id: TaskId,
        next: TaskStatus,
        update: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        let mut table = self.write_tasks();
        let task = table
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        task.transition(next)?;
        update(task);
        Ok(task.clone())
    }

    /// Record a progress snapshot for an in-progress task
    ///
    /// The stored percentage is clamped to 100 and never moves backwards.
    /// Snapshots for tasks that are not running are dropped.
    pub(crate) fn update_progress(
        &self,
        id: TaskId,
        snapshot: &ProgressSnapshot,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let event = {
            let mut table = self.write_tasks();
            let Some(task) = table.tasks.get_mut(&id) else {
                return;
            };
            if task.status != TaskStatus::InProgress {
                return;
            }
            let percentage = snapshot.percentage.clamp(0.0, 100.0);
            let clamped = ProgressSnapshot {
                percentage,
                ..snapshot.clone()
            };
            task.progress = task.progress.max(percentage.round() as u8);
            task.details.merge(&clamped, extra);
            task.updated_at = Utc::now();
            TaskEvent::Progress(task.clone())
        };
        self.publish(event);
    }

    pub(crate) fn publish(&self, event: TaskEvent) {
        self.bus.publish(event.name(), &event);
    }

    /// Run `callback` with the typed result once the task completes
    ///
    /// Never fires for a failed task. The callback runs on its own tokio task,
    /// so a panic inside it cannot affect the task or its handle.
    fn attach_completion_callback<T: TaskOutput>(
        &self,
        id: TaskId,
        callback: CompletionCallback<T>,
        runtime: tokio::runtime::Handle,
    ) {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let subscriptions: Arc<Mutex<Vec<Subscription>>> =
            Arc::new(Mutex::new(Vec::with_capacity(2)));

        let on_completed = {
            let subscriptions = Arc::clone(&subscriptions);
            self.bus.subscribe(TASK_COMPLETED, move |event: &TaskEvent| {
                let task = event.task();
                if task.id != id {
                    return;
                }
                for subscription in lock(&subscriptions).iter() {
                    subscription.unsubscribe();
                }
                let Some(callback) = lock(&slot).take() else {
                    return;
                };
                match task.result.as_ref().and_then(T::from_result) {
                    Some(output) => {
                        runtime.spawn(async move { callback(output) });
                    }
                    None => {
                        tracing::warn!(
                            task_id = %id,
                            "completed task has no matching result for its callback"
                        );
                    }
                }
            })
        };
        let on_failed = {
            let subscriptions = Arc::clone(&subscriptions);
            self.bus.subscribe(TASK_FAILED, move |event: &TaskEvent| {
                if event.task().id != id {
                    return;
                }
                for subscription in lock(&subscriptions).iter() {
                    subscription.unsubscribe();
                }
                tracing::debug!(task_id = %id, "task failed, completion callback dropped");
            })
        };
        lock(&subscriptions).extend([on_completed, on_failed]);
    }

    /// Gracefully shut down the manager
    ///
    /// Stops accepting new tasks, then waits for every running task to reach
    /// a terminal state. Running tasks are not interrupted.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        self.tracker.close();
        tracing::info!(running = self.tracker.len(), "Waiting for running tasks");
        self.tracker.wait().await;

        tracing::info!("Shutdown complete");
    }
}
