// src/planner.rs

use crate::classify::ManifestKind;
use crate::dash::DashResolver;
use crate::hls::HlsResolver;
use crate::models::{ManifestResult, StartRequest};
use crate::transport::Transport;
use tracing::{info, warn};

/// Turns a start request into a segment plan: a resolved manifest when one is
/// reachable, otherwise the segments the caller already observed.
pub struct SegmentPlanner<'a> {
    transport: &'a dyn Transport,
    max_playlist_depth: usize,
    max_segments: usize,
}

impl<'a> SegmentPlanner<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        max_playlist_depth: usize,
        max_segments: usize,
    ) -> Self {
        Self { transport, max_playlist_depth, max_segments }
    }

    /// Dispatches on the URL's extension. URLs that are neither HLS nor DASH resolve to nothing.
    pub async fn resolve(&self, manifest_url: &str) -> ManifestResult {
        match ManifestKind::from_url(manifest_url) {
            Some(ManifestKind::Hls) => {
                HlsResolver::new(self.transport, self.max_playlist_depth)
                    .resolve(manifest_url)
                    .await
            }
            Some(ManifestKind::Dash) => {
                DashResolver::new(self.transport, self.max_segments)
                    .resolve(manifest_url)
                    .await
            }
            None => {
                warn!(url = manifest_url, "not a recognized manifest url");
                ManifestResult::empty()
            }
        }
    }

    /// May return an empty plan; deciding what that means is the caller's job.
    pub async fn plan(&self, request: &StartRequest) -> ManifestResult {
        if let Some(url) = request.manifest_url.as_deref() {
            let resolved = self.resolve(url).await;
            if !resolved.is_empty() {
                return resolved;
            }
            info!(
                url,
                captured = request.segments.len(),
                "manifest yielded no segments, falling back to captured list"
            );
        }
        fallback_plan(&request.segments, request.init_segment_url.clone())
    }
}

/// Plan built from already-observed segment URLs: durations unknown, indices by position.
pub fn fallback_plan(segments: &[String], init_segment_url: Option<String>) -> ManifestResult {
    let mut plan = ManifestResult::empty();
    for url in segments {
        plan.push(url.clone(), 0.0);
    }
    plan.init_segment_url = init_segment_url;
    plan
}
