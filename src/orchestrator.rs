// src/orchestrator.rs

use crate::classify::{container_for, output_filename};
use crate::config::DownloaderConfig;
use crate::limiter::Throttle;
use crate::models::{
    format_bytes, ChunkRecord, DownloadTask, ProgressSnapshot, StartRequest, TaskId, TaskState,
};
use crate::planner::{fallback_plan, SegmentPlanner};
use crate::store::TaskStore;
use crate::transport::Transport;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands shared between the registry and a running orchestrator.
#[derive(Debug, Default)]
pub struct TaskControl {
    paused: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
}

impl TaskControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Why the fetch loop stopped short of Completed.
#[derive(Debug)]
enum Stop {
    Canceled,
    Failed(String),
}

/// Drives one task from Starting to a terminal state.
///
/// The orchestrator is the only writer of its [`DownloadTask`]. Everyone else
/// sees snapshots: through the broadcast channel, the status watch, or the
/// progress record in the store.
pub struct Orchestrator {
    task: DownloadTask,
    request: StartRequest,
    transport: Arc<dyn Transport>,
    store: TaskStore,
    config: Arc<DownloaderConfig>,
    control: Arc<TaskControl>,
    events: broadcast::Sender<ProgressSnapshot>,
    status: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        request: StartRequest,
        transport: Arc<dyn Transport>,
        store: TaskStore,
        config: Arc<DownloaderConfig>,
        control: Arc<TaskControl>,
        events: broadcast::Sender<ProgressSnapshot>,
    ) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let task = DownloadTask::new(id);
        let (status, status_rx) = watch::channel(task.snapshot());
        let status = Arc::new(status);
        let orchestrator =
            Self { task, request, transport, store, config, control, events, status };
        (orchestrator, status_rx)
    }

    /// Runs the task to completion and returns its final snapshot.
    ///
    /// A panic inside the task still ends it: the last published snapshot is
    /// turned into an Errored one and persisted, broadcast and sent on the watch.
    pub async fn run(self) -> ProgressSnapshot {
        let id = self.task.id;
        let store = self.store.clone();
        let events = self.events.clone();
        let status = self.status.clone();

        match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                let mut snapshot = status.borrow().clone();
                error!(task_id = id, state = %snapshot.state, "task panicked");
                snapshot.state = TaskState::Errored;
                snapshot.status_text = "internal error".to_string();
                if let Err(e) = store.save_progress(&snapshot).await {
                    error!(task_id = id, error = %e, "failed to persist progress");
                }
                let _ = events.send(snapshot.clone());
                status.send_replace(snapshot.clone());
                snapshot
            }
        }
    }

    async fn drive(mut self) -> ProgressSnapshot {
        info!(task_id = self.task.id, "task started");
        match self.execute().await {
            Ok(()) => {}
            Err(Stop::Canceled) => {
                self.task.canceled = true;
                let text = format!(
                    "Canceled at {}/{}",
                    self.task.downloaded_count,
                    self.task.total_planned()
                );
                info!(task_id = self.task.id, "{}", text);
                self.transition(TaskState::Canceled, text).await;
            }
            Err(Stop::Failed(reason)) => {
                error!(task_id = self.task.id, %reason, "task failed");
                self.transition(TaskState::Errored, reason).await;
            }
        }
        self.task.snapshot()
    }

    async fn execute(&mut self) -> Result<(), Stop> {
        self.publish().await;
        self.check_canceled()?;

        let plan = if self.request.manifest_url.is_some() {
            self.transition(TaskState::ParsingManifest, "Parsing manifest...".to_string()).await;
            SegmentPlanner::new(
                self.transport.as_ref(),
                self.config.max_playlist_depth,
                self.config.max_segments,
            )
            .plan(&self.request)
            .await
        } else {
            fallback_plan(&self.request.segments, self.request.init_segment_url.clone())
        };
        self.check_canceled()?;

        if plan.is_empty() {
            return Err(Stop::Failed("no segments found".to_string()));
        }
        let container = container_for(plan.segments.first().map(|s| s.url.as_str()));
        self.task.filename = output_filename(container, plan.total_duration, self.task.id);
        let init_url = plan.init_segment_url.clone();
        self.task.set_plan(plan);
        info!(
            task_id = self.task.id,
            segments = self.task.total_planned(),
            filename = %self.task.filename,
            "plan ready"
        );

        if let Some(url) = init_url {
            self.check_canceled()?;
            self.transition(TaskState::FetchingInit, "Fetching init segment...".to_string()).await;
            match self.transport.fetch(&url).await {
                Ok(bytes) => self.task.set_init_chunk(bytes),
                Err(e) => warn!(
                    task_id = self.task.id,
                    %url,
                    error = %e,
                    "init segment fetch failed, continuing without it"
                ),
            }
        }

        self.fetch_segments().await?;
        self.combine(container.mime_type).await
    }

    async fn fetch_segments(&mut self) -> Result<(), Stop> {
        let total = self.task.total_planned();
        self.transition(TaskState::FetchingSegments, format!("Downloading 0/{}", total)).await;

        let mut throttle =
            Throttle::new(self.config.segment_delay(), self.config.rate_limit_bytes_per_sec);
        let every = self.config.progress_every.max(1);

        for index in 0..total {
            self.wait_while_paused().await?;

            let url = self.task.plan.segments[index].url.clone();
            let mut received = 0;
            match self.transport.fetch(&url).await {
                Ok(bytes) => {
                    received = bytes.len() as u64;
                    self.task.fill(index, bytes);
                }
                Err(e) => warn!(
                    task_id = self.task.id,
                    index,
                    %url,
                    error = %e,
                    "segment fetch failed, leaving a gap"
                ),
            }
            self.task.downloaded_count += 1;
            self.task.status_text = format!("Downloading {}/{}", self.task.downloaded_count, total);
            debug!(task_id = self.task.id, index, bytes = received, "segment attempted");

            if self.task.downloaded_count % every == 0 {
                self.publish().await;
            }
            if index + 1 < total && !throttle.pace(received, &self.control.cancel).await {
                return Err(Stop::Canceled);
            }
        }
        self.check_canceled()
    }

    async fn combine(&mut self, mime_type: &str) -> Result<(), Stop> {
        let filled = self.task.filled_count();
        if filled == 0 {
            return Err(Stop::Failed("no segments downloaded".to_string()));
        }
        self.transition(TaskState::Combining, format!("Combining {} segments...", filled)).await;

        let chunks = self.task.ordered_chunks();
        if chunks.is_empty() {
            return Err(Stop::Failed("no segments downloaded".to_string()));
        }
        let record = ChunkRecord {
            id: self.task.id,
            filename: self.task.filename.clone(),
            mime_type: mime_type.to_string(),
            total_bytes: self.task.total_bytes,
            chunks,
        };
        self.store
            .put_chunks(&record)
            .await
            .map_err(|e| Stop::Failed(format!("failed to store downloaded data: {}", e)))?;

        let size = format_bytes(self.task.total_bytes);
        self.transition(TaskState::ReadyToSave, format!("Ready to save ({})", size)).await;

        let total = self.task.total_planned();
        let text = if filled == total {
            format!("Completed: {} segments, {}", total, size)
        } else {
            format!("Completed with gaps: {}/{} segments, {}", filled, total, size)
        };
        info!(
            task_id = self.task.id,
            filled,
            total,
            bytes = self.task.total_bytes,
            "task completed"
        );
        self.transition(TaskState::Completed, text).await;
        Ok(())
    }

    /// Holds the loop while paused. Returns `Stop::Canceled` if a cancel arrives first.
    async fn wait_while_paused(&mut self) -> Result<(), Stop> {
        self.check_canceled()?;
        if !self.control.is_paused() {
            return Ok(());
        }

        let total = self.task.total_planned();
        self.task.paused = true;
        self.task.status_text = format!("Paused at {}/{}", self.task.downloaded_count, total);
        info!(task_id = self.task.id, at = self.task.downloaded_count, "paused");
        self.publish().await;

        let poll = self.config.pause_poll();
        while self.control.is_paused() && !self.control.is_canceled() {
            tokio::select! {
                _ = self.control.wake.notified() => {}
                _ = self.control.cancel.cancelled() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
        self.task.paused = false;
        self.check_canceled()?;

        info!(task_id = self.task.id, at = self.task.downloaded_count, "resumed");
        self.task.status_text = format!("Downloading {}/{}", self.task.downloaded_count, total);
        self.publish().await;
        Ok(())
    }

    fn check_canceled(&self) -> Result<(), Stop> {
        if self.control.is_canceled() {
            Err(Stop::Canceled)
        } else {
            Ok(())
        }
    }

    async fn transition(&mut self, state: TaskState, status_text: String) {
        debug_assert!(state > self.task.state, "{:?} -> {:?}", self.task.state, state);
        debug!(task_id = self.task.id, from = %self.task.state, to = %state, "state change");
        self.task.state = state;
        self.task.status_text = status_text;
        self.publish().await;
    }

    /// Persists the current snapshot, then broadcasts it.
    async fn publish(&mut self) {
        let snapshot = self.task.snapshot();
        if let Err(e) = self.store.save_progress(&snapshot).await {
            error!(task_id = self.task.id, error = %e, "failed to persist progress");
        }
        // no subscribers is fine
        let _ = self.events.send(snapshot.clone());
        self.status.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::{PanickingTransport, ScriptedTransport};
    use std::time::Duration;

    fn config() -> Arc<DownloaderConfig> {
        Arc::new(DownloaderConfig {
            segment_delay_ms: 0,
            pause_poll_ms: 10,
            progress_every: 2,
            ..DownloaderConfig::default()
        })
    }

    fn segments(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://cdn.example/s{}.ts", i)).collect()
    }

    async fn orchestrator(
        transport: Arc<dyn Transport>,
        request: StartRequest,
    ) -> (Orchestrator, Arc<TaskControl>, TaskStore, broadcast::Receiver<ProgressSnapshot>) {
        let store = TaskStore::open_in_memory().await.unwrap();
        let control = Arc::new(TaskControl::default());
        let (events, rx) = broadcast::channel(256);
        let (orchestrator, _status) = Orchestrator::new(
            1,
            request,
            transport,
            store.clone(),
            config(),
            control.clone(),
            events,
        );
        (orchestrator, control, store, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<ProgressSnapshot>) -> Vec<ProgressSnapshot> {
        let mut out = Vec::new();
        while let Ok(s) = rx.try_recv() {
            out.push(s);
        }
        out
    }

    #[tokio::test]
    async fn full_success_concatenates_in_order() {
        let mut transport = ScriptedTransport::new().with("https://cdn.example/init.mp4", "I");
        for (i, url) in segments(3).iter().enumerate() {
            transport = transport.with(url, format!("<{}>", i));
        }
        let request = StartRequest {
            manifest_url: None,
            segments: segments(3),
            init_segment_url: Some("https://cdn.example/init.mp4".to_string()),
        };
        let (orch, _control, store, mut rx) = orchestrator(Arc::new(transport), request).await;

        let last = orch.run().await;
        assert_eq!(last.state, TaskState::Completed);
        assert_eq!(last.filename, "video_1.ts");

        let record = store.get_chunks(1).await.unwrap().unwrap();
        assert_eq!(record.concat(), b"I<0><1><2>");
        assert_eq!(record.mime_type, "video/mp2t");
        assert_eq!(record.total_bytes, 10);

        let states: Vec<TaskState> = drain(&mut rx).iter().map(|s| s.state).collect();
        let mut distinct = states.clone();
        distinct.dedup();
        assert_eq!(
            distinct,
            vec![
                TaskState::Starting,
                TaskState::FetchingInit,
                TaskState::FetchingSegments,
                TaskState::Combining,
                TaskState::ReadyToSave,
                TaskState::Completed,
            ]
        );
        let persisted = store.load_progress(1).await.unwrap().unwrap();
        assert_eq!(persisted.snapshot, last);
    }

    #[tokio::test]
    async fn failed_segment_leaves_gap_and_completes() {
        let sizes = [3usize, 5, 7, 11, 13];
        let mut transport = ScriptedTransport::new();
        for (i, url) in segments(5).iter().enumerate() {
            if i != 2 {
                transport = transport.with(url, vec![b'x'; sizes[i]]);
            }
        }
        let request = StartRequest { segments: segments(5), ..StartRequest::default() };
        let (mut orch, _control, store, _rx) = orchestrator(Arc::new(transport), request).await;

        orch.execute().await.unwrap();
        assert_eq!(orch.task.state, TaskState::Completed);
        assert!(orch.task.results[2].is_none());
        assert_eq!(orch.task.results.len(), 5);
        assert_eq!(orch.task.downloaded_count, 5);
        assert_eq!(orch.task.total_bytes, 3 + 5 + 11 + 13);
        assert!(orch.task.status_text.starts_with("Completed with gaps: 4/5"));
        assert_eq!(store.get_chunks(1).await.unwrap().unwrap().total_bytes, 32);
    }

    #[tokio::test]
    async fn empty_plan_errors_with_reason() {
        let transport = Arc::new(ScriptedTransport::new());
        let request = StartRequest {
            manifest_url: Some("https://cdn.example/missing.m3u8".to_string()),
            ..StartRequest::default()
        };
        let (orch, _control, store, _rx) = orchestrator(transport, request).await;

        let last = orch.run().await;
        assert_eq!(last.state, TaskState::Errored);
        assert_eq!(last.status_text, "no segments found");
        assert!(store.list_chunk_ids().await.unwrap().is_empty());
        let persisted = store.load_progress(1).await.unwrap().unwrap();
        assert_eq!(persisted.snapshot.state, TaskState::Errored);
    }

    #[tokio::test]
    async fn panic_inside_the_task_ends_it_errored() {
        let request = StartRequest { segments: segments(2), ..StartRequest::default() };
        let (orch, _control, store, mut rx) =
            orchestrator(Arc::new(PanickingTransport), request).await;

        let last = orch.run().await;
        assert_eq!(last.state, TaskState::Errored);
        assert_eq!(last.status_text, "internal error");
        assert_eq!(last.total_planned, 2);

        let broadcast = drain(&mut rx).pop().unwrap();
        assert_eq!(broadcast.state, TaskState::Errored);
        let persisted = store.load_progress(1).await.unwrap().unwrap();
        assert_eq!(persisted.snapshot.state, TaskState::Errored);
        assert_eq!(persisted.snapshot.status_text, "internal error");
    }

    #[tokio::test]
    async fn all_segments_failing_is_an_error() {
        let transport =
            Arc::new(ScriptedTransport::new().with("https://cdn.example/init.mp4", "I"));
        let request = StartRequest {
            segments: segments(2),
            init_segment_url: Some("https://cdn.example/init.mp4".to_string()),
            ..StartRequest::default()
        };
        let (orch, _control, store, _rx) = orchestrator(transport, request).await;

        let last = orch.run().await;
        assert_eq!(last.state, TaskState::Errored);
        assert_eq!(last.status_text, "no segments downloaded");
        assert_eq!(last.downloaded_count, 2);
        assert!(store.get_chunks(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_during_fetch_stops_after_it_settles() {
        let mut transport = ScriptedTransport::new();
        for url in segments(10) {
            transport = transport.with(&url, "data");
        }
        let transport = Arc::new(transport);
        let gate = transport.hold("https://cdn.example/s3.ts");
        let request = StartRequest { segments: segments(10), ..StartRequest::default() };
        let (orch, control, store, _rx) = orchestrator(transport.clone(), request).await;

        let handle = tokio::spawn(orch.run());
        gate.entered.notified().await;
        control.cancel();
        gate.release.notify_one();

        let last = handle.await.unwrap();
        assert_eq!(last.state, TaskState::Canceled);
        assert_eq!(last.downloaded_count, 4);
        assert_eq!(transport.requests().len(), 4);
        assert!(store.list_chunk_ids().await.unwrap().is_empty());
        assert_eq!(
            store.load_progress(1).await.unwrap().unwrap().snapshot.state,
            TaskState::Canceled
        );
    }

    #[tokio::test]
    async fn pause_holds_and_resume_continues_without_refetch() {
        let mut transport = ScriptedTransport::new();
        for url in segments(4) {
            transport = transport.with(&url, "ab");
        }
        let transport = Arc::new(transport);
        let gate = transport.hold("https://cdn.example/s1.ts");
        let request = StartRequest { segments: segments(4), ..StartRequest::default() };
        let (orch, control, _store, mut rx) = orchestrator(transport.clone(), request).await;

        let handle = tokio::spawn(orch.run());
        gate.entered.notified().await;
        control.pause();
        gate.release.notify_one();

        // the in-flight segment settles, then the loop parks
        let paused = loop {
            let s = rx.recv().await.unwrap();
            if s.status_text.starts_with("Paused") {
                break s;
            }
        };
        assert_eq!(paused.status_text, "Paused at 2/4");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.requests().len(), 2);

        control.resume();
        let last = handle.await.unwrap();
        assert_eq!(last.state, TaskState::Completed);
        assert_eq!(last.total_bytes, 8);
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn pause_then_resume_before_next_fetch_changes_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let request = StartRequest { segments: segments(3), ..StartRequest::default() };
        let (mut orch, control, _store, _rx) = orchestrator(transport, request).await;
        orch.task.set_plan(fallback_plan(&segments(3), None));
        orch.task.fill(0, bytes::Bytes::from_static(b"abc"));
        orch.task.downloaded_count = 1;
        let before = (orch.task.results.clone(), orch.task.downloaded_count, orch.task.total_bytes);

        control.pause();
        control.resume();
        orch.wait_while_paused().await.unwrap();

        let after = (orch.task.results.clone(), orch.task.downloaded_count, orch.task.total_bytes);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn cancel_while_paused() {
        let transport = Arc::new(ScriptedTransport::new().with("https://cdn.example/s0.ts", "a"));
        let request = StartRequest { segments: segments(3), ..StartRequest::default() };
        let (orch, control, _store, _rx) = orchestrator(transport.clone(), request).await;
        control.pause();

        let handle = tokio::spawn(orch.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.cancel();

        let last = handle.await.unwrap();
        assert_eq!(last.state, TaskState::Canceled);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn progress_is_persisted_on_cadence() {
        let mut transport = ScriptedTransport::new();
        for url in segments(5) {
            transport = transport.with(&url, "z");
        }
        let request = StartRequest { segments: segments(5), ..StartRequest::default() };
        let (orch, _control, _store, mut rx) = orchestrator(Arc::new(transport), request).await;

        orch.run().await;
        let counts: Vec<usize> = drain(&mut rx)
            .iter()
            .filter(|s| s.state == TaskState::FetchingSegments)
            .map(|s| s.downloaded_count)
            .collect();
        assert_eq!(counts, vec![0, 2, 4]);
    }
}
