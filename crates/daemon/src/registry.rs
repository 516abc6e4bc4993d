//! Task table with single-active-job exclusivity
//!
//! One mutex guards both the table and the active-task pointer so that
//! check-and-register is atomic. Each task's snapshot has its own lock,
//! written by its monitor and read by status queries.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shopguard_common::{
    new_task_id, Error, Result, TaskSnapshot, TaskStatus, TaskSummary, TestRequest,
};

/// A supervised task: its snapshot plus the signals around its monitor
pub struct TaskHandle {
    snapshot: RwLock<TaskSnapshot>,
    /// Requests a stop
    cancel: CancellationToken,
    /// Fired once the monitor has recorded the terminal state
    done: CancellationToken,
}

impl TaskHandle {
    fn new(snapshot: TaskSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> String {
        self.snapshot.read().id.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.snapshot.read().status
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.read().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut TaskSnapshot) -> R) -> R {
        f(&mut self.snapshot.write())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn done_token(&self) -> &CancellationToken {
        &self.done
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Arc<TaskHandle>>,
    active: Option<String>,
}

/// In-memory table of supervised tasks
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running task unless another one is still running.
    pub fn try_acquire(&self, request: TestRequest) -> Result<Arc<TaskHandle>> {
        let mut inner = self.inner.lock();

        if let Some(active) = &inner.active {
            let running = inner
                .tasks
                .get(active)
                .map(|t| t.status() == TaskStatus::Running)
                .unwrap_or(false);
            if running {
                return Err(Error::Conflict {
                    active_task_id: active.clone(),
                });
            }
        }

        let mut id = new_task_id();
        while inner.tasks.contains_key(&id) {
            id = new_task_id();
        }

        let handle = Arc::new(TaskHandle::new(TaskSnapshot::new(&id, request)));
        inner.tasks.insert(id.clone(), handle.clone());
        inner.active = Some(id.clone());
        debug!("Task {} acquired the browser", id);
        Ok(handle)
    }

    /// Clear the active pointer if it still names `id`
    pub fn release(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner.active.as_deref() == Some(id) {
            inner.active = None;
            debug!("Task {} released the browser", id);
        }
    }

    pub fn active(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<TaskHandle>> {
        self.inner.lock().tasks.get(id).cloned()
    }

    /// Newest first
    pub fn list(&self) -> Vec<TaskSummary> {
        let handles: Vec<_> = self.inner.lock().tasks.values().cloned().collect();
        let mut summaries: Vec<_> = handles.iter().map(|h| h.snapshot.read().summary()).collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    /// Evict terminal tasks that finished more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let cutoff = Utc::now().checked_sub_signed(retention);
        let mut inner = self.inner.lock();
        let active = inner.active.clone();
        let before = inner.tasks.len();

        inner.tasks.retain(|id, handle| {
            if active.as_deref() == Some(id.as_str()) {
                return true;
            }
            let snapshot = handle.snapshot.read();
            match (snapshot.status.is_terminal(), snapshot.completed_at, cutoff) {
                (true, Some(completed), Some(cutoff)) => completed > cutoff,
                _ => true,
            }
        });
        before - inner.tasks.len()
    }
}
