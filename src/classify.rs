// src/classify.rs

//! Lookup tables deciding which resolver handles a URL, which playlist lines
//! are media segments, and which container the reassembled output uses.

use crate::models::{format_duration_compact, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
}

/// Checked in order; the first extension found anywhere in the lowercased URL wins.
const MANIFEST_EXTENSIONS: &[(&str, ManifestKind)] =
    &[(".m3u8", ManifestKind::Hls), (".mpd", ManifestKind::Dash)];

/// Playlist lines containing one of these are treated as media segments.
pub const MEDIA_SEGMENT_EXTENSIONS: &[&str] = &[".ts", ".m4s", ".m4v", ".aac", ".mp4"];

pub const HLS_PLAYLIST_EXTENSION: &str = ".m3u8";

/// Output container chosen from the first segment's URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container {
    pub extension: &'static str,
    pub mime_type: &'static str,
}

pub const TRANSPORT_STREAM: Container = Container { extension: "ts", mime_type: "video/mp2t" };
pub const MPEG4: Container = Container { extension: "mp4", mime_type: "video/mp4" };

impl ManifestKind {
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        MANIFEST_EXTENSIONS
            .iter()
            .find(|(ext, _)| lower.contains(ext))
            .map(|(_, kind)| *kind)
    }
}

pub fn is_media_segment(line: &str) -> bool {
    MEDIA_SEGMENT_EXTENSIONS.iter().any(|ext| line.contains(ext))
}

pub fn references_playlist(line: &str) -> bool {
    line.contains(HLS_PLAYLIST_EXTENSION)
}

/// The URL with its query string and fragment removed.
fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

pub fn container_for(first_segment_url: Option<&str>) -> Container {
    match first_segment_url {
        Some(url) if strip_query(url).to_ascii_lowercase().ends_with(".ts") => TRANSPORT_STREAM,
        _ => MPEG4,
    }
}

/// `video_<duration>_<id>.<ext>`; the duration part is dropped when unknown.
pub fn output_filename(container: Container, duration: f64, id: TaskId) -> String {
    if duration > 0.0 {
        format!(
            "video_{}_{}.{}",
            format_duration_compact(duration),
            id,
            container.extension
        )
    } else {
        format!("video_{}.{}", id, container.extension)
    }
}
