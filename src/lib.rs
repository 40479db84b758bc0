pub mod classify;
pub mod config;
pub mod dash;
pub mod hls;
pub mod integrity;
pub mod limiter;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod recovery;
pub mod saver;
pub mod store;
pub mod transport;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::DownloaderConfig;
    pub use crate::manager::{RegistryError, TaskRegistry};
    pub use crate::models::{
        format_bytes, format_duration, ManifestResult, ProgressSnapshot, Segment, StartRequest,
        TaskId, TaskState,
    };
    pub use crate::planner::SegmentPlanner;
    pub use crate::recovery::{Recoverable, RecoveryScanner};
    pub use crate::saver::{DiskSaver, SaveError, SaveReport};
    pub use crate::store::TaskStore;
    pub use crate::transport::{HttpTransport, Transport};
}
