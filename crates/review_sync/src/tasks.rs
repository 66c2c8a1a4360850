//! In-memory tracking of running sync tasks.
//!
//! Tasks live in a table guarded by one mutex, shared by the sync path, status
//! readers and a background sweep that drops expired entries. Nothing here is
//! durable: a restart forgets every task, but never touches committed rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

/// Default period of the expiry sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Running tasks idle this long are treated as abandoned.
pub const DEFAULT_RUNNING_TTL: Duration = Duration::from_secs(30 * 60);

/// Completed or failed tasks are kept this long after their last update.
pub const DEFAULT_TERMINAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Stored state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Status reported to readers, which adds the two "absent" answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Expired,
    NotFound,
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Running => TaskState::Running,
            TaskStatus::Completed => TaskState::Completed,
            TaskStatus::Failed => TaskState::Failed,
        }
    }
}

/// Answer to [`TaskLifecycleManager::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub exists: bool,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl TaskSnapshot {
    fn not_found() -> Self {
        Self {
            exists: false,
            status: TaskState::NotFound,
            message: Some("Task not found or expired"),
            data: None,
            created_at: None,
            last_updated: None,
            access_count: 0,
        }
    }

    /// Value of `data[key]`, if present.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.get(key)
    }
}

/// Counts reported by [`TaskLifecycleManager::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cleanup_interval: Duration,
    pub task_ttl: Duration,
}

/// Expiry and sweep timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskManagerConfig {
    pub cleanup_interval: Duration,
    pub running_ttl: Duration,
    pub terminal_ttl: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            running_ttl: DEFAULT_RUNNING_TTL,
            terminal_ttl: DEFAULT_TERMINAL_TTL,
        }
    }
}

#[derive(Debug)]
struct TaskEntry {
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    touched: Instant,
    status: TaskStatus,
    data: Map<String, Value>,
    access_count: u64,
}

impl TaskEntry {
    fn touch(&mut self) {
        self.last_updated = Utc::now();
        self.touched = Instant::now();
    }

    fn is_expired(&self, config: &TaskManagerConfig, now: Instant) -> bool {
        let ttl = if self.status.is_terminal() {
            config.terminal_ttl
        } else {
            config.running_ttl
        };
        now.saturating_duration_since(self.touched) > ttl
    }

    fn marks_completion(data: &Map<String, Value>) -> bool {
        ["current_stage", "task_status"]
            .iter()
            .any(|key| data.get(*key).and_then(Value::as_str) == Some("completed"))
    }
}

type TaskTable = HashMap<String, TaskEntry>;

fn lock(table: &Mutex<TaskTable>) -> MutexGuard<'_, TaskTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Called with the ids removed by a sweep, after the table lock is released.
pub type ExpiryHook = Arc<dyn Fn(&[String]) + Send + Sync>;

fn sweep(
    table: &Mutex<TaskTable>,
    hook: &Mutex<Option<ExpiryHook>>,
    config: &TaskManagerConfig,
) -> usize {
    let now = Instant::now();
    let mut removed = Vec::new();
    lock(table).retain(|task_id, task| {
        let expired = task.is_expired(config, now);
        if expired {
            tracing::debug!(task_id, "Expired task removed");
            removed.push(task_id.clone());
        }
        !expired
    });

    if !removed.is_empty() {
        let hook = hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(&removed);
        }
    }
    removed.len()
}

/// Tracks sync tasks by caller-supplied id and expires stale entries.
pub struct TaskLifecycleManager {
    tasks: Arc<Mutex<TaskTable>>,
    config: TaskManagerConfig,
    running: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    on_expired: Arc<Mutex<Option<ExpiryHook>>>,
}

impl std::fmt::Debug for TaskLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycleManager")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for TaskLifecycleManager {
    fn default() -> Self {
        Self::new(TaskManagerConfig::default())
    }
}

impl TaskLifecycleManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            config,
            running: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
            on_expired: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> TaskManagerConfig {
        self.config
    }

    /// Install the callback run with the ids of swept tasks, replacing any
    /// previous one.
    pub fn on_expired(&self, hook: impl Fn(&[String]) + Send + Sync + 'static) {
        *self
            .on_expired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(hook));
    }

    /// Spawn the expiry sweep. Calling it twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks = Arc::clone(&self.tasks);
        let hook = Arc::clone(&self.on_expired);
        let running = Arc::clone(&self.running);
        let config = self.config;
        let period = config.cleanup_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let removed = sweep(&tasks, &hook, &config);
                if removed > 0 {
                    tracing::info!(removed, "Cleaned expired tasks");
                }
            }
        });

        *self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        tracing::info!(
            interval_secs = period.as_secs(),
            "Task lifecycle manager started"
        );
    }

    /// Stop the expiry sweep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Task lifecycle manager stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a task as running, replacing any task with the same id.
    pub fn register(&self, task_id: &str, initial: Map<String, Value>) {
        let now = Utc::now();
        lock(&self.tasks).insert(
            task_id.to_string(),
            TaskEntry {
                created_at: now,
                last_updated: now,
                touched: Instant::now(),
                status: TaskStatus::Running,
                data: initial,
                access_count: 0,
            },
        );
        tracing::debug!(task_id, "Task registered");
    }

    /// Shallow-merge `partial` into the task's data.
    ///
    /// A merged `current_stage` or `task_status` of `"completed"` marks the
    /// task completed. Unknown ids are ignored.
    pub fn update(&self, task_id: &str, partial: Map<String, Value>) {
        let mut tasks = lock(&self.tasks);
        let Some(task) = tasks.get_mut(task_id) else {
            return;
        };
        task.data.extend(partial);
        task.touch();
        if task.status == TaskStatus::Running && TaskEntry::marks_completion(&task.data) {
            task.status = TaskStatus::Completed;
            tracing::debug!(task_id, "Task marked completed by update");
        }
    }

    /// Mark a task completed, storing `results` under `data.results`.
    pub fn complete(&self, task_id: &str, results: Option<Value>) {
        let mut tasks = lock(&self.tasks);
        let Some(task) = tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Completed;
        task.touch();
        if let Some(results) = results {
            task.data.insert("results".to_string(), results);
        }
        tracing::info!(task_id, "Task completed");
    }

    /// Mark a task failed, storing `error` under `data.error`.
    pub fn fail(&self, task_id: &str, error: &str) {
        let mut tasks = lock(&self.tasks);
        let Some(task) = tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Failed;
        task.touch();
        task.data
            .insert("error".to_string(), Value::String(error.to_string()));
        tracing::warn!(task_id, error, "Task failed");
    }

    /// Current state of a task. Every read of a present task counts as an
    /// access, expired or not.
    pub fn status(&self, task_id: &str) -> TaskSnapshot {
        let mut tasks = lock(&self.tasks);
        let Some(task) = tasks.get_mut(task_id) else {
            return TaskSnapshot::not_found();
        };
        task.access_count += 1;

        if task.is_expired(&self.config, Instant::now()) {
            return TaskSnapshot {
                exists: true,
                status: TaskState::Expired,
                message: Some("Task has expired"),
                data: Some(task.data.clone()),
                created_at: None,
                last_updated: None,
                access_count: task.access_count,
            };
        }

        TaskSnapshot {
            exists: true,
            status: task.status.into(),
            message: None,
            data: Some(task.data.clone()),
            created_at: Some(task.created_at),
            last_updated: Some(task.last_updated),
            access_count: task.access_count,
        }
    }

    /// Remove expired tasks now; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        sweep(&self.tasks, &self.on_expired, &self.config)
    }

    pub fn stats(&self) -> TaskStats {
        let tasks = lock(&self.tasks);
        let count = |status: TaskStatus| tasks.values().filter(|t| t.status == status).count();
        TaskStats {
            total: tasks.len(),
            running: count(TaskStatus::Running),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            cleanup_interval: self.config.cleanup_interval,
            task_ttl: self.config.running_ttl,
        }
    }
}

impl Drop for TaskLifecycleManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut sweeper) = self.sweeper.lock()
            && let Some(handle) = sweeper.take()
        {
            handle.abort();
        }
    }
}
