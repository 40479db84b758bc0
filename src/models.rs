// src/models.rs

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a download task. Derived from the wall clock at creation time.
pub type TaskId = u64;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One planned unit of media content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub url: String,
    /// Seconds, 0.0 when unknown.
    pub duration: f64,
    pub index: usize,
}

/// The ordered outcome of resolving one manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestResult {
    pub segments: Vec<Segment>,
    pub total_duration: f64,
    pub init_segment_url: Option<String>,
}

impl ManifestResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends a segment, assigning it the next index and accumulating its duration.
    pub fn push(&mut self, url: String, duration: f64) {
        let index = self.segments.len();
        self.total_duration += duration;
        self.segments.push(Segment { url, duration, index });
    }
}

/// Lifecycle of a download task. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    ParsingManifest,
    FetchingInit,
    FetchingSegments,
    Combining,
    ReadyToSave,
    Completed,
    Errored,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Errored | TaskState::Canceled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Starting => "starting",
            TaskState::ParsingManifest => "parsing manifest",
            TaskState::FetchingInit => "fetching init segment",
            TaskState::FetchingSegments => "downloading",
            TaskState::Combining => "combining",
            TaskState::ReadyToSave => "ready to save",
            TaskState::Completed => "completed",
            TaskState::Errored => "error",
            TaskState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// What a collaborator hands over to start a transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    pub manifest_url: Option<String>,
    /// Segment URLs already observed on the page, in capture order.
    pub segments: Vec<String>,
    pub init_segment_url: Option<String>,
}

/// Progress broadcast and persisted progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub id: TaskId,
    pub filename: String,
    pub state: TaskState,
    pub total_planned: usize,
    pub downloaded_count: usize,
    pub total_bytes: u64,
    /// Seconds of media in the plan.
    pub duration: f64,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub status_text: String,
}

impl ProgressSnapshot {
    /// Fraction of planned segments attempted, 0.0 to 1.0.
    pub fn progress(&self) -> f32 {
        if self.total_planned == 0 {
            0.0
        } else {
            self.downloaded_count as f32 / self.total_planned as f32
        }
    }
}

/// The mutable state of one transfer. Owned by the orchestrator loop.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub state: TaskState,
    pub plan: ManifestResult,
    /// One slot per planned segment; `None` until fetched, and left `None` on failure.
    pub results: Vec<Option<Bytes>>,
    pub init_chunk: Option<Bytes>,
    pub downloaded_count: usize,
    pub total_bytes: u64,
    pub paused: bool,
    pub canceled: bool,
    pub filename: String,
    pub start_time: u64,
    pub status_text: String,
}

impl DownloadTask {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Starting,
            plan: ManifestResult::empty(),
            results: Vec::new(),
            init_chunk: None,
            downloaded_count: 0,
            total_bytes: 0,
            paused: false,
            canceled: false,
            filename: String::new(),
            start_time: now_millis(),
            status_text: "Starting...".to_string(),
        }
    }

    /// Installs the plan and sizes the slot array to match it.
    pub fn set_plan(&mut self, plan: ManifestResult) {
        self.results = vec![None; plan.segments.len()];
        self.plan = plan;
    }

    pub fn total_planned(&self) -> usize {
        self.plan.segments.len()
    }

    pub fn set_init_chunk(&mut self, bytes: Bytes) {
        self.total_bytes += bytes.len() as u64;
        self.init_chunk = Some(bytes);
    }

    /// Fills slot `index`. Out-of-range indices and already filled slots are left alone.
    pub fn fill(&mut self, index: usize, bytes: Bytes) {
        if let Some(slot) = self.results.get_mut(index) {
            if slot.is_none() {
                self.total_bytes += bytes.len() as u64;
                *slot = Some(bytes);
            }
        }
    }

    /// Number of segment slots holding bytes.
    pub fn filled_count(&self) -> usize {
        self.results.iter().filter(|slot| slot.is_some()).count()
    }

    /// Init chunk first, then every filled slot in index order.
    pub fn ordered_chunks(&self) -> Vec<Bytes> {
        self.init_chunk
            .iter()
            .chain(self.results.iter().flatten())
            .filter(|chunk| !chunk.is_empty())
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            id: self.id,
            filename: self.filename.clone(),
            state: self.state,
            total_planned: self.total_planned(),
            downloaded_count: self.downloaded_count,
            total_bytes: self.total_bytes,
            duration: self.plan.total_duration,
            start_time: self.start_time,
            status_text: self.status_text.clone(),
        }
    }
}

/// Durable bytes of a finished transfer, waiting to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: TaskId,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
    pub chunks: Vec<Bytes>,
}

impl ChunkRecord {
    /// Concatenates every chunk into one buffer.
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// `H:MM:SS` when an hour or longer, otherwise `M:SS`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Compact duration safe for file names, e.g. `1h02m03s` or `4m05s`.
pub fn format_duration_compact(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else {
        format!("{}m{:02}s", m, s)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(n: usize) -> DownloadTask {
        let mut plan = ManifestResult::empty();
        for i in 0..n {
            plan.push(format!("https://cdn.example/seg{}.ts", i), 2.0);
        }
        let mut task = DownloadTask::new(7);
        task.set_plan(plan);
        task
    }

    #[test]
    fn slots_match_plan_length() {
        let task = planned(4);
        assert_eq!(task.results.len(), 4);
        assert_eq!(task.plan.total_duration, 8.0);
        assert_eq!(task.plan.segments[3].index, 3);
    }

    #[test]
    fn total_bytes_counts_init_and_filled_slots() {
        let mut task = planned(3);
        task.set_init_chunk(Bytes::from_static(b"init"));
        task.fill(0, Bytes::from_static(b"aa"));
        task.fill(2, Bytes::from_static(b"ccc"));
        // a second fill of the same slot is ignored
        task.fill(2, Bytes::from_static(b"zzzzzz"));
        task.fill(9, Bytes::from_static(b"out of range"));

        assert_eq!(task.total_bytes, 9);
        assert_eq!(task.filled_count(), 2);
        let joined: Vec<u8> = task.ordered_chunks().concat();
        assert_eq!(joined, b"initaaccc");
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Errored.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::ReadyToSave.is_terminal());
        assert!(TaskState::Starting < TaskState::FetchingSegments);
    }

    #[test]
    fn formats_durations_and_sizes() {
        assert_eq!(format_duration(90.0), "1:30");
        assert_eq!(format_duration(3723.4), "1:02:03");
        assert_eq!(format_duration_compact(245.0), "4m05s");
        assert_eq!(format_duration_compact(3723.0), "1h02m03s");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
