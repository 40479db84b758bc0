// src/manager.rs

use crate::config::DownloaderConfig;
use crate::models::{now_millis, ProgressSnapshot, StartRequest, TaskId, TaskState};
use crate::orchestrator::{Orchestrator, TaskControl};
use crate::store::{ProgressRecord, StoreError, TaskStore};
use crate::transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("task {0} is still running")]
    Busy(TaskId),
}

struct ActiveTask {
    id: TaskId,
    control: Arc<TaskControl>,
    status: watch::Receiver<ProgressSnapshot>,
}

impl ActiveTask {
    /// A task whose status sender is gone is not running, whatever it last reported.
    fn is_running(&self) -> bool {
        self.status.has_changed().is_ok() && !self.status.borrow().state.is_terminal()
    }
}

/// Holds at most one running task and routes commands to it.
///
/// Starting a task while another is running is rejected, there is no queue.
/// Pause, resume, cancel and status are no-ops unless the id matches the
/// running task.
pub struct TaskRegistry {
    store: TaskStore,
    transport: Arc<dyn Transport>,
    config: Arc<DownloaderConfig>,
    events: broadcast::Sender<ProgressSnapshot>,
    active: Mutex<Option<ActiveTask>>,
    last_id: AtomicU64,
}

impl TaskRegistry {
    /// Creates the registry and closes out tasks a previous process left unfinished.
    pub async fn new(
        store: TaskStore,
        transport: Arc<dyn Transport>,
        config: DownloaderConfig,
    ) -> Result<Self, RegistryError> {
        let mut last_id = 0;
        for ProgressRecord { mut snapshot, .. } in store.list_progress().await? {
            last_id = last_id.max(snapshot.id);
            if !snapshot.state.is_terminal() {
                warn!(
                    task_id = snapshot.id,
                    state = %snapshot.state,
                    "task interrupted by restart"
                );
                snapshot.state = TaskState::Errored;
                snapshot.status_text = "interrupted before completion".to_string();
                store.save_progress(&snapshot).await?;
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            transport,
            config: Arc::new(config),
            events,
            active: Mutex::new(None),
            last_id: AtomicU64::new(last_id),
        })
    }

    /// Receives every progress broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Time-derived and strictly increasing, even for starts within the same millisecond.
    fn next_id(&self) -> TaskId {
        let now = now_millis();
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// Starts a transfer in the background and returns its id.
    pub async fn start(&self, request: StartRequest) -> Result<TaskId, RegistryError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref().filter(|a| a.is_running()) {
            info!(task_id = current.id, "start rejected, a task is already running");
            return Err(RegistryError::Busy(current.id));
        }

        let id = self.next_id();
        let control = Arc::new(TaskControl::default());
        let (orchestrator, status) = Orchestrator::new(
            id,
            request,
            self.transport.clone(),
            self.store.clone(),
            self.config.clone(),
            control.clone(),
            self.events.clone(),
        );
        tokio::spawn(orchestrator.run());

        *active = Some(ActiveTask { id, control, status });
        Ok(id)
    }

    async fn with_active<R>(&self, id: TaskId, f: impl FnOnce(&ActiveTask) -> R) -> Option<R> {
        let active = self.active.lock().await;
        active.as_ref().filter(|a| a.id == id).map(f)
    }

    /// Returns `true` if the command reached a running task.
    pub async fn pause(&self, id: TaskId) -> bool {
        self.with_active(id, |a| {
            let running = a.is_running();
            if running {
                info!(task_id = id, "pause requested");
                a.control.pause();
            }
            running
        })
        .await
        .unwrap_or(false)
    }

    pub async fn resume(&self, id: TaskId) -> bool {
        self.with_active(id, |a| {
            let running = a.is_running();
            if running {
                info!(task_id = id, "resume requested");
                a.control.resume();
            }
            running
        })
        .await
        .unwrap_or(false)
    }

    pub async fn cancel(&self, id: TaskId) -> bool {
        self.with_active(id, |a| {
            let running = a.is_running();
            if running {
                info!(task_id = id, "cancel requested");
                a.control.cancel();
            }
            running
        })
        .await
        .unwrap_or(false)
    }

    /// Latest snapshot of the task held by the registry, running or just finished.
    pub async fn status(&self, id: TaskId) -> Option<ProgressSnapshot> {
        self.with_active(id, |a| a.status.borrow().clone()).await
    }

    pub async fn active_id(&self) -> Option<TaskId> {
        let active = self.active.lock().await;
        active.as_ref().filter(|a| a.is_running()).map(|a| a.id)
    }

    /// Waits until the task reaches a terminal state and returns its final snapshot.
    pub async fn wait(&self, id: TaskId) -> Option<ProgressSnapshot> {
        let mut status = self.with_active(id, |a| a.status.clone()).await?;
        // the sender only drops early if the orchestrator panicked
        let finished = status
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|s| s.clone())
            .ok();
        Some(finished.unwrap_or_else(|| status.borrow().clone()))
    }

    /// Persisted progress of every known task.
    pub async fn history(&self) -> Result<Vec<ProgressRecord>, RegistryError> {
        Ok(self.store.list_progress().await?)
    }

    /// Forgets a finished task: its progress record and any unsaved bytes.
    pub async fn remove(&self, id: TaskId) -> Result<bool, RegistryError> {
        if self.active_id().await == Some(id) {
            return Ok(false);
        }
        self.store.delete_chunks(id).await?;
        self.store.delete_progress(id).await?;
        info!(task_id = id, "task removed");
        Ok(true)
    }

    /// Removes every finished task whose bytes are not waiting to be saved.
    /// Returns how many were removed.
    pub async fn clear_finished(&self) -> Result<usize, RegistryError> {
        let pending = self.store.list_chunk_ids().await?;
        let mut removed = 0;
        for ProgressRecord { snapshot, .. } in self.history().await? {
            let settled = snapshot.state.is_terminal() && !pending.contains(&snapshot.id);
            if settled && self.remove(snapshot.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
