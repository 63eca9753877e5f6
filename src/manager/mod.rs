//! Task orchestration split into focused submodules.
//!
//! The `TaskManager` struct and its methods are organized by concern:
//! - [`lifecycle`] - Task creation, state transitions, progress and shutdown
//! - [`archive_ops`] - Backup, restore and unpack operations
//! - [`download`] - Remote downloads through a [`Transport`]

mod archive_ops;
mod download;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use lifecycle::TaskHandle;

use crate::codec::{AdapterInfo, AdapterRegistry, ArchiveAdapter};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, Subscription};
use crate::transport::{HttpTransport, Transport};
use crate::types::{TASK_COMPLETED, TASK_FAILED, Task, TaskEvent, TaskId, TaskResult, TaskStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, oneshot};
use tokio_util::task::TaskTracker;

/// Every task ever created, in creation order
#[derive(Default)]
pub(crate) struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskTable {
    fn insert(&mut self, task: Task) {
        self.order.push(task.id);
        self.tasks.insert(task.id, task);
    }
}

/// Asynchronous task engine for archive and download jobs
///
/// Cheap to clone; clones share the task table, event bus and adapters.
#[derive(Clone)]
pub struct TaskManager {
    /// Configuration (wrapped in Arc for sharing)
    pub(crate) config: Arc<Config>,
    /// Synchronous event bus every lifecycle change is published on
    pub(crate) bus: EventBus<TaskEvent>,
    /// Broadcast side-channel fed from the bus
    pub(crate) event_tx: broadcast::Sender<TaskEvent>,
    /// Task table, the only shared mutable state
    pub(crate) tasks: Arc<RwLock<TaskTable>>,
    /// Codec adapters in priority order
    pub(crate) adapters: Arc<AdapterRegistry>,
    /// Download backend
    pub(crate) transport: Arc<dyn Transport>,
    /// In-flight task executions
    pub(crate) tracker: TaskTracker,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl TaskManager {
    /// Create a manager with the built-in adapters and the HTTP transport
    ///
    /// Validates `config` and creates the backup, restore and download
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a directory cannot be
    /// created or the HTTP client cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.download, config.archive.progress_interval)?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Create a manager downloading through a custom [`Transport`]
    ///
    /// # Errors
    ///
    /// Same as [`TaskManager::new`], minus the HTTP client.
    pub async fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        for dir in [
            &config.storage.backup_dir,
            &config.storage.restore_dir,
            &config.download.download_dir,
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to create directory {}: {e}", dir.display()),
                ))
            })?;
        }

        let bus = EventBus::new(config.events.max_listeners);
        let (event_tx, _rx) = broadcast::channel(config.events.channel_capacity);
        let forward = event_tx.clone();
        // Lagging or absent receivers are not an error for the bus
        bus.subscribe_any(move |_, event: &TaskEvent| {
            forward.send(event.clone()).ok();
        });

        tracing::info!(
            transport = transport.name(),
            backup_dir = ?config.storage.backup_dir,
            restore_dir = ?config.storage.restore_dir,
            download_dir = ?config.download.download_dir,
            "task manager ready"
        );

        Ok(Self {
            config: Arc::new(config),
            bus,
            event_tx,
            tasks: Arc::new(RwLock::new(TaskTable::default())),
            adapters: Arc::new(AdapterRegistry::with_defaults()),
            transport,
            tracker: TaskTracker::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to task events through a broadcast channel
    ///
    /// Multiple subscribers can receive events independently. A receiver that
    /// falls more than `events.channel_capacity` events behind gets
    /// `RecvError::Lagged`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use archive_tasks::{Config, TaskManager};
    /// # async fn example() -> archive_tasks::Result<()> {
    /// let manager = TaskManager::new(Config::default()).await?;
    /// let mut events = manager.subscribe();
    ///
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         println!("{}: {}", event.name(), event.task().id);
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    /// The synchronous event bus (`task:created`, `task:progress`, ...)
    pub fn events(&self) -> &EventBus<TaskEvent> {
        &self.bus
    }

    /// Active configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Register a codec adapter ahead of every adapter already known
    pub fn register_adapter(&self, adapter: Arc<dyn ArchiveAdapter>) {
        tracing::info!(adapter = adapter.name(), "registering archive adapter");
        self.adapters.register(adapter);
    }

    /// Registered adapters in resolution order
    pub fn adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.list()
    }

    /// Snapshot of one task, `None` for an unknown id
    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.read_tasks().tasks.get(&id).cloned()
    }

    /// Snapshots of every task in creation order
    pub fn list_tasks(&self) -> Vec<Task> {
        let table = self.read_tasks();
        table
            .order
            .iter()
            .filter_map(|id| table.tasks.get(id).cloned())
            .collect()
    }

    /// Wait for a task to finish and return its stored result
    ///
    /// Settles immediately when the task is already terminal.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown id
    /// - [`Error::TaskFailed`] carrying the stored message if the task failed
    pub async fn wait_for_task(&self, id: TaskId) -> Result<TaskResult> {
        let task = self
            .get_task(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if task.is_terminal() {
            return settled(task);
        }

        let (tx, rx) = oneshot::channel::<Task>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let guard = Unsubscribe(
            [TASK_COMPLETED, TASK_FAILED]
                .into_iter()
                .map(|event| {
                    let tx = Arc::clone(&tx);
                    self.bus.subscribe(event, move |e: &TaskEvent| {
                        if e.task().id == id
                            && let Some(tx) = lock(&tx).take()
                        {
                            tx.send(e.task().clone()).ok();
                        }
                    })
                })
                .collect(),
        );

        // The task may have settled between the first lookup and subscribing
        if let Some(task) = self.get_task(id)
            && task.is_terminal()
        {
            return settled(task);
        }

        let task = rx
            .await
            .map_err(|_| Error::Other(format!("task {id} never settled")))?;
        drop(guard);
        settled(task)
    }

    pub(crate) fn read_tasks(&self) -> RwLockReadGuard<'_, TaskTable> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_tasks(&self) -> RwLockWriteGuard<'_, TaskTable> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}

/// Removes its subscriptions when dropped
struct Unsubscribe(Vec<Subscription>);

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        for subscription in &self.0 {
            subscription.unsubscribe();
        }
    }
}

fn settled(task: Task) -> Result<TaskResult> {
    match task.status {
        TaskStatus::Completed => task
            .result
            .ok_or_else(|| Error::Other(format!("task {} completed without a result", task.id))),
        _ => Err(Error::TaskFailed {
            id: task.id,
            message: task.error.unwrap_or_else(|| format!("task {}", task.status)),
        }),
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
