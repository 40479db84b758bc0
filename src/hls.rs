// src/hls.rs

use crate::classify::{is_media_segment, references_playlist};
use crate::models::ManifestResult;
use crate::transport::Transport;
use tracing::{debug, info, warn};
use url::Url;

/// One `#EXT-X-STREAM-INF` entry of a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub url: String,
}

/// Resolves `.m3u8` playlists into a segment list, following master playlists
/// to their highest-bandwidth variant.
pub struct HlsResolver<'a> {
    transport: &'a dyn Transport,
    max_depth: usize,
}

impl<'a> HlsResolver<'a> {
    /// `max_depth` bounds how many master playlists are followed before giving up.
    pub fn new(transport: &'a dyn Transport, max_depth: usize) -> Self {
        Self { transport, max_depth }
    }

    /// Never fails: unreachable or unusable playlists produce an empty result.
    pub async fn resolve(&self, url: &str) -> ManifestResult {
        let mut current = url.to_string();

        for depth in 0..=self.max_depth {
            let text = match self.transport.fetch_text(&current).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(url = %current, error = %e, "playlist unreachable");
                    return ManifestResult::empty();
                }
            };
            let base = match Url::parse(&current) {
                Ok(base) => base,
                Err(e) => {
                    warn!(url = %current, error = %e, "playlist url is not absolute");
                    return ManifestResult::empty();
                }
            };

            let lines: Vec<&str> = text.lines().map(str::trim).collect();
            if !is_master(&lines) {
                let result = parse_media(&text, &base);
                info!(
                    url = %current,
                    segments = result.segments.len(),
                    duration = result.total_duration,
                    "resolved media playlist"
                );
                return result;
            }

            let variants = parse_master(&lines, &base);
            match select_variant(&variants) {
                Some(best) => {
                    debug!(depth, bandwidth = best.bandwidth, url = %best.url, "following variant");
                    current = best.url.clone();
                }
                None => {
                    warn!(url = %current, "master playlist lists no variants");
                    return ManifestResult::empty();
                }
            }
        }

        warn!(url, max_depth = self.max_depth, "master playlist nesting too deep");
        ManifestResult::empty()
    }
}

fn is_uri_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}

/// A playlist is a master playlist when any URI line references another playlist.
pub fn is_master(lines: &[&str]) -> bool {
    lines.iter().any(|line| is_uri_line(line) && references_playlist(line))
}

pub fn parse_master(lines: &[&str], base: &Url) -> Vec<Variant> {
    let mut variants = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") else {
            continue;
        };
        let bandwidth = attribute(attrs, "BANDWIDTH")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let Some(uri) = lines[i + 1..].iter().find(|l| is_uri_line(l)) else {
            continue;
        };
        match base.join(uri) {
            Ok(url) => variants.push(Variant { bandwidth, url: url.to_string() }),
            Err(e) => debug!(uri, error = %e, "skipping unresolvable variant"),
        }
    }
    variants
}

/// Strictly largest bandwidth; the first declared variant wins a tie.
pub fn select_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().fold(None, |best: Option<&Variant>, v| match best {
        Some(b) if b.bandwidth >= v.bandwidth => Some(b),
        _ => Some(v),
    })
}

/// Parses a media playlist, keeping only URIs with a media segment extension.
///
/// `EXT-X-MAP` normally lands on the first segment. A map with no segment after
/// it stays an unknown tag and is read from there.
pub fn parse_media(text: &str, base: &Url) -> ManifestResult {
    let playlist = match m3u8_rs::parse_media_playlist_res(text.as_bytes()) {
        Ok(playlist) => playlist,
        Err(e) => {
            warn!(url = %base, error = ?e, "media playlist unparseable");
            return ManifestResult::empty();
        }
    };

    let mut result = ManifestResult::empty();
    let map_uri = playlist
        .segments
        .iter()
        .find_map(|s| s.map.as_ref().map(|m| m.uri.clone()))
        .or_else(|| {
            playlist
                .unknown_tags
                .iter()
                .rev()
                .find(|t| t.tag == "X-MAP")
                .and_then(|t| t.rest.as_deref())
                .and_then(|rest| attribute(rest, "URI"))
        });
    if let Some(uri) = map_uri {
        match base.join(&uri) {
            Ok(url) => result.init_segment_url = Some(url.to_string()),
            Err(e) => debug!(uri = %uri, error = %e, "skipping unresolvable init segment"),
        }
    }

    for segment in &playlist.segments {
        let uri = segment.uri.trim();
        if !is_media_segment(uri) {
            continue;
        }
        match base.join(uri) {
            Ok(url) => result.push(url.to_string(), f64::from(segment.duration).max(0.0)),
            Err(e) => debug!(uri, error = %e, "skipping unresolvable segment"),
        }
    }
    result
}

/// Looks up `key` in an attribute list such as `BANDWIDTH=800000,CODECS="a,b"`.
/// Quoted values are returned without their quotes.
pub fn attribute(list: &str, key: &str) -> Option<String> {
    let mut rest = list;
    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let name = rest[..eq].trim();
        let after = &rest[eq + 1..];

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let close = quoted.find('"').unwrap_or(quoted.len());
            let tail = quoted.get(close + 1..).unwrap_or("");
            (&quoted[..close], tail.strip_prefix(',').unwrap_or(tail))
        } else {
            match after.find(',') {
                Some(comma) => (&after[..comma], &after[comma + 1..]),
                None => (after, ""),
            }
        };

        if name == key {
            return Some(value.trim().to_string());
        }
        rest = remainder;
    }
    None
}
