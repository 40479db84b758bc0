// src/dash.rs

use crate::models::ManifestResult;
use crate::transport::Transport;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum DashError {
    #[error("malformed MPD: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no representation found")]
    NoRepresentation,
    #[error("segment timing overflows")]
    Overflow,
    #[error("manifest describes more than {0} segments")]
    TooManySegments(usize),
}

// Numeric attributes stay strings and are parsed leniently. A bad value falls
// back to its default.

#[derive(Debug, Default, Deserialize)]
struct Mpd {
    #[serde(rename = "@mediaPresentationDuration")]
    media_presentation_duration: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Default, Deserialize)]
struct BaseUrl {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Period {
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Default, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "@mimeType")]
    mime_type: Option<String>,
    #[serde(rename = "@contentType")]
    content_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList")]
    segment_list: Option<SegmentList>,
    #[serde(rename = "Representation", default)]
    representations: Vec<Representation>,
}

#[derive(Debug, Default, Deserialize)]
struct Representation {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@bandwidth")]
    bandwidth: Option<String>,
    #[serde(rename = "@mimeType")]
    mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList")]
    segment_list: Option<SegmentList>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct SegmentTemplate {
    #[serde(rename = "@media")]
    media: Option<String>,
    #[serde(rename = "@initialization")]
    initialization: Option<String>,
    #[serde(rename = "@timescale")]
    timescale: Option<String>,
    #[serde(rename = "@duration")]
    duration: Option<String>,
    #[serde(rename = "@startNumber")]
    start_number: Option<String>,
    #[serde(rename = "SegmentTimeline")]
    timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct SegmentTimeline {
    #[serde(rename = "S", default)]
    entries: Vec<TimelineEntry>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct TimelineEntry {
    #[serde(rename = "@t")]
    t: Option<String>,
    #[serde(rename = "@d")]
    d: Option<String>,
    #[serde(rename = "@r")]
    r: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SegmentList {
    #[serde(rename = "@timescale")]
    timescale: Option<String>,
    #[serde(rename = "@duration")]
    duration: Option<String>,
    #[serde(rename = "Initialization")]
    initialization: Option<Initialization>,
    #[serde(rename = "SegmentURL", default)]
    segment_urls: Vec<SegmentUrl>,
}

#[derive(Debug, Default, Deserialize)]
struct Initialization {
    #[serde(rename = "@sourceURL")]
    source_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SegmentUrl {
    #[serde(rename = "@media")]
    media: Option<String>,
}

fn parse_u64(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

fn first_base(base_urls: &[BaseUrl]) -> Option<&str> {
    base_urls.first().map(|b| b.value.trim()).filter(|v| !v.is_empty())
}

impl SegmentTemplate {
    /// Fills attributes missing here from the adaptation-set level template.
    fn inherit(&self, parent: Option<&SegmentTemplate>) -> SegmentTemplate {
        let Some(parent) = parent else {
            return self.clone();
        };
        SegmentTemplate {
            media: self.media.clone().or_else(|| parent.media.clone()),
            initialization: self.initialization.clone().or_else(|| parent.initialization.clone()),
            timescale: self.timescale.clone().or_else(|| parent.timescale.clone()),
            duration: self.duration.clone().or_else(|| parent.duration.clone()),
            start_number: self.start_number.clone().or_else(|| parent.start_number.clone()),
            timeline: self.timeline.clone().or_else(|| parent.timeline.clone()),
        }
    }

    fn timescale(&self) -> u64 {
        parse_u64(&self.timescale).filter(|t| *t > 0).unwrap_or(1)
    }

    fn start_number(&self) -> u64 {
        parse_u64(&self.start_number).unwrap_or(1)
    }
}

impl AdaptationSet {
    fn is_video(&self) -> bool {
        let mentions_video = |v: &Option<String>| v.as_deref().is_some_and(|s| s.contains("video"));
        mentions_video(&self.mime_type)
            || mentions_video(&self.content_type)
            || self.representations.iter().any(|r| mentions_video(&r.mime_type))
    }
}

impl Representation {
    fn bandwidth(&self) -> u64 {
        parse_u64(&self.bandwidth).unwrap_or(0)
    }
}

/// Parses an ISO-8601 duration such as `PT1H2M3.5S` or `P1DT2H` into seconds.
pub fn parse_duration(value: &str) -> Option<f64> {
    let rest = value.trim().strip_prefix('P')?;
    let (date, time) = match rest.find('T') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };

    let mut total = 0.0;
    for (amount, unit) in components(date)? {
        total += amount
            * match unit {
                'W' => 604_800.0,
                'D' => 86_400.0,
                _ => return None,
            };
    }
    for (amount, unit) in components(time)? {
        total += amount
            * match unit {
                'H' => 3600.0,
                'M' => 60.0,
                'S' => 1.0,
                _ => return None,
            };
    }
    Some(total)
}

fn components(part: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            out.push((number.parse().ok()?, c));
            number.clear();
        }
    }
    number.is_empty().then_some(out)
}

/// Expands `$RepresentationID$`, `$Number$`, `$Time$`, `$Bandwidth$` (with an
/// optional `%0Nd` width) and the `$$` escape.
pub fn expand_template(
    pattern: &str,
    rep_id: &str,
    number: u64,
    time: u64,
    bandwidth: u64,
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &after[..end];
        rest = &after[end + 1..];

        if token.is_empty() {
            out.push('$');
            continue;
        }
        let (name, format) = match token.find('%') {
            Some(i) => (&token[..i], Some(&token[i..])),
            None => (token, None),
        };
        let value = match name {
            "RepresentationID" => {
                out.push_str(rep_id);
                continue;
            }
            "Number" => number,
            "Time" => time,
            "Bandwidth" => bandwidth,
            _ => {
                out.push('$');
                out.push_str(token);
                out.push('$');
                continue;
            }
        };
        let width = format
            .and_then(|f| f.trim_start_matches('%').trim_end_matches('d').parse::<usize>().ok())
            .unwrap_or(0);
        out.push_str(&format!("{:0width$}", value, width = width));
    }
    out.push_str(rest);
    out
}

pub struct DashResolver<'a> {
    transport: &'a dyn Transport,
    max_segments: usize,
}

impl<'a> DashResolver<'a> {
    /// Manifests describing more than `max_segments` segments are rejected.
    pub fn new(transport: &'a dyn Transport, max_segments: usize) -> Self {
        Self { transport, max_segments }
    }

    /// Never fails: unreachable or malformed manifests produce an empty result.
    pub async fn resolve(&self, url: &str) -> ManifestResult {
        let text = match self.transport.fetch_text(url).await {
            Ok(text) => text,
            Err(e) => {
                warn!(url, error = %e, "manifest unreachable");
                return ManifestResult::empty();
            }
        };
        match parse_mpd(&text, url, self.max_segments) {
            Ok(result) => {
                info!(
                    url,
                    segments = result.segments.len(),
                    duration = result.total_duration,
                    "resolved DASH manifest"
                );
                result
            }
            Err(e) => {
                warn!(url, error = %e, "manifest unparseable");
                ManifestResult::empty()
            }
        }
    }
}

/// Resolves MPD text fetched from `manifest_url` into the segment list of its
/// highest-bandwidth video representation.
pub fn parse_mpd(
    text: &str,
    manifest_url: &str,
    max_segments: usize,
) -> Result<ManifestResult, DashError> {
    let mpd: Mpd = quick_xml::de::from_str(text)?;

    let total_duration = mpd
        .media_presentation_duration
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(0.0);

    let sets: Vec<(&Period, &AdaptationSet)> = mpd
        .periods
        .iter()
        .flat_map(|p| p.adaptation_sets.iter().map(move |s| (p, s)))
        .collect();
    let video: Vec<_> = sets.iter().copied().filter(|(_, s)| s.is_video()).collect();
    let pool = if video.is_empty() { sets } else { video };

    let mut best: Option<(&Period, &AdaptationSet, &Representation)> = None;
    for (period, set) in pool {
        for rep in &set.representations {
            if best.map_or(true, |(_, _, b)| rep.bandwidth() > b.bandwidth()) {
                best = Some((period, set, rep));
            }
        }
    }
    let (period, set, rep) = best.ok_or(DashError::NoRepresentation)?;
    let rep_id = rep.id.clone().unwrap_or_default();
    let bandwidth = rep.bandwidth();
    debug!(representation = %rep_id, bandwidth, "selected representation");

    let mut base = Url::parse(manifest_url)?;
    let mut explicit_base = false;
    for level in [
        first_base(&mpd.base_urls),
        first_base(&period.base_urls),
        first_base(&set.base_urls),
        first_base(&rep.base_urls),
    ]
    .into_iter()
    .flatten()
    {
        base = base.join(level)?;
        explicit_base = true;
    }

    let mut result = ManifestResult { total_duration, ..ManifestResult::default() };

    let template = rep
        .segment_template
        .as_ref()
        .map(|t| t.inherit(set.segment_template.as_ref()))
        .or_else(|| set.segment_template.clone());

    if let Some(template) = &template {
        if let Some(init) = &template.initialization {
            let init = expand_template(init, &rep_id, template.start_number(), 0, bandwidth);
            result.init_segment_url = Some(base.join(&init)?.to_string());
        }
        if let Some(media) = &template.media {
            let expansion = Expansion { template, media, rep_id: &rep_id, bandwidth, max_segments };
            let planned = if template.timeline.is_some() {
                expansion.timeline(total_duration)?
            } else {
                expansion.fixed_duration(total_duration)?
            };
            for (path, duration) in planned {
                result.push(base.join(&path)?.to_string(), duration);
            }
        }
    }

    if result.segments.is_empty() {
        if let Some(list) = rep.segment_list.as_ref().or(set.segment_list.as_ref()) {
            let timescale = parse_u64(&list.timescale).filter(|t| *t > 0).unwrap_or(1);
            let duration = parse_u64(&list.duration).unwrap_or(0) as f64 / timescale as f64;
            if let Some(init) = list.initialization.as_ref().and_then(|i| i.source_url.as_ref()) {
                result.init_segment_url = Some(base.join(init)?.to_string());
            }
            if list.segment_urls.len() > max_segments {
                return Err(DashError::TooManySegments(max_segments));
            }
            for media in list.segment_urls.iter().filter_map(|s| s.media.as_ref()) {
                result.push(base.join(media)?.to_string(), duration);
            }
        }
    }

    if result.segments.is_empty() && explicit_base {
        result.push(base.to_string(), total_duration);
    }

    // push() accumulates per-segment durations; the presentation duration wins when known
    if total_duration > 0.0 {
        result.total_duration = total_duration;
    }
    Ok(result)
}

/// Turns a SegmentTemplate into `(path, seconds)` pairs for one representation.
struct Expansion<'a> {
    template: &'a SegmentTemplate,
    media: &'a str,
    rep_id: &'a str,
    bandwidth: u64,
    max_segments: usize,
}

impl Expansion<'_> {
    fn reserve(&self, planned: usize, more: u64) -> Result<(), DashError> {
        let total = (planned as u64).checked_add(more).ok_or(DashError::Overflow)?;
        if total > self.max_segments as u64 {
            return Err(DashError::TooManySegments(self.max_segments));
        }
        Ok(())
    }

    fn path(&self, number: u64, time: u64) -> String {
        expand_template(self.media, self.rep_id, number, time, self.bandwidth)
    }

    fn timeline(&self, total_duration: f64) -> Result<Vec<(String, f64)>, DashError> {
        let timescale = self.template.timescale();
        let entries = self.template.timeline.as_ref().map(|t| t.entries.as_slice()).unwrap_or(&[]);
        let mut planned = Vec::new();
        let mut clock = 0u64;
        let mut number = self.template.start_number();

        for (i, entry) in entries.iter().enumerate() {
            if let Some(t) = parse_u64(&entry.t) {
                clock = t;
            }
            let d = parse_u64(&entry.d).unwrap_or(0);
            let r = entry.r.as_deref().and_then(|r| r.trim().parse::<i64>().ok()).unwrap_or(0);
            let repeats = if r >= 0 {
                r as u64
            } else {
                // negative repeat runs until the next entry's start or the end of the presentation
                let presentation_end =
                    (total_duration > 0.0).then(|| (total_duration * timescale as f64) as u64);
                let end = entries
                    .get(i + 1)
                    .and_then(|next| parse_u64(&next.t))
                    .or(presentation_end);
                match end {
                    Some(end) if end > clock && d > 0 => (end - clock).div_ceil(d) - 1,
                    _ => 0,
                }
            };
            self.reserve(planned.len(), repeats.checked_add(1).ok_or(DashError::Overflow)?)?;

            for _ in 0..=repeats {
                planned.push((self.path(number, clock), d as f64 / timescale as f64));
                clock = clock.checked_add(d).ok_or(DashError::Overflow)?;
                number = number.checked_add(1).ok_or(DashError::Overflow)?;
            }
        }
        Ok(planned)
    }

    fn fixed_duration(&self, total_duration: f64) -> Result<Vec<(String, f64)>, DashError> {
        let Some(duration) = parse_u64(&self.template.duration).filter(|d| *d > 0) else {
            return Ok(Vec::new());
        };
        if total_duration <= 0.0 {
            return Ok(Vec::new());
        }
        let seconds = duration as f64 / self.template.timescale() as f64;
        // float to int casts saturate, so an absurd ratio lands above the cap
        let count = (total_duration / seconds).ceil() as u64;
        self.reserve(0, count)?;
        let start = self.template.start_number();

        (0..count)
            .map(|i| {
                let number = start.checked_add(i).ok_or(DashError::Overflow)?;
                let time = i.checked_mul(duration).ok_or(DashError::Overflow)?;
                Ok((self.path(number, time), seconds))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;

    const MANIFEST: &str = "https://cdn.example/vod/title/manifest.mpd";
    const LIMIT: usize = 10_000;

    fn timeline_mpd(entries: &str) -> String {
        format!(
            r#"<MPD mediaPresentationDuration="PT10S">
  <Period><AdaptationSet mimeType="video/mp4">
    <SegmentTemplate timescale="1" media="$Number$-$Time$.m4s">
      <SegmentTimeline>{}</SegmentTimeline>
    </SegmentTemplate>
    <Representation id="v" bandwidth="1"/>
  </AdaptationSet></Period>
</MPD>"#,
            entries
        )
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("PT1M30S"), Some(90.0));
        assert_eq!(parse_duration("PT1H"), Some(3600.0));
        assert_eq!(parse_duration("PT2.5S"), Some(2.5));
        assert_eq!(parse_duration("PT1H0M10.25S"), Some(3610.25));
        assert_eq!(parse_duration("P1DT1S"), Some(86_401.0));
        assert_eq!(parse_duration("PT"), Some(0.0));
        assert_eq!(parse_duration("1M30S"), None);
        assert_eq!(parse_duration("PT12"), None);
    }

    #[test]
    fn template_identifiers() {
        assert_eq!(
            expand_template("$RepresentationID$/seg-$Number%05d$-$Time$.m4s", "v1", 7, 9000, 1),
            "v1/seg-00007-9000.m4s"
        );
        assert_eq!(
            expand_template("b$Bandwidth$_$$_$Unknown$", "x", 1, 0, 800),
            "b800_$_$Unknown$"
        );
        assert_eq!(expand_template("dangling$Number", "x", 1, 0, 0), "dangling$Number");
    }

    #[test]
    fn timeline_counts_and_durations() {
        let xml = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" mediaPresentationDuration="PT1M30S">
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="a" bandwidth="9999999"/>
    </AdaptationSet>
    <AdaptationSet contentType="video">
      <SegmentTemplate timescale="1000" media="$RepresentationID$/$Time$.m4s"
                       initialization="$RepresentationID$/init.mp4">
        <SegmentTimeline>
          <S t="0" d="4000" r="2"/>
          <S d="2000"/>
          <S d="3000" r="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="low" bandwidth="100000"/>
      <Representation id="high" bandwidth="500000"/>
      <Representation id="same" bandwidth="500000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let result = parse_mpd(xml, MANIFEST, LIMIT).unwrap();

        assert_eq!(result.total_duration, 90.0);
        assert_eq!(result.segments.len(), 3 + 1 + 2);
        let sum: f64 = result.segments.iter().map(|s| s.duration).sum();
        assert_eq!(sum, 20.0);
        assert_eq!(
            result.init_segment_url.as_deref(),
            Some("https://cdn.example/vod/title/high/init.mp4")
        );
        let urls: Vec<&str> = result.segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls[0], "https://cdn.example/vod/title/high/0.m4s");
        assert_eq!(urls[3], "https://cdn.example/vod/title/high/12000.m4s");
        assert_eq!(urls[5], "https://cdn.example/vod/title/high/17000.m4s");
    }

    #[test]
    fn fixed_duration_template_uses_ceiling() {
        let xml = r#"<MPD mediaPresentationDuration="PT25S">
  <BaseURL>https://media.example/content/</BaseURL>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="v" bandwidth="1">
        <SegmentTemplate duration="10" timescale="1" startNumber="5" media="seg_$Number$.m4s"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let result = parse_mpd(xml, MANIFEST, LIMIT).unwrap();
        let urls: Vec<&str> = result.segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://media.example/content/seg_5.m4s",
                "https://media.example/content/seg_6.m4s",
                "https://media.example/content/seg_7.m4s",
            ]
        );
        assert_eq!(result.init_segment_url, None);
    }

    #[test]
    fn segment_list_and_missing_bandwidth() {
        let xml = r#"<MPD>
  <Period>
    <AdaptationSet>
      <Representation id="nobw">
        <SegmentList><SegmentURL media="wrong.m4s"/></SegmentList>
      </Representation>
      <Representation id="r" bandwidth="10">
        <SegmentList timescale="90000" duration="180000">
          <Initialization sourceURL="init.mp4"/>
          <SegmentURL media="a.m4s"/>
          <SegmentURL media="b.m4s"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let result = parse_mpd(xml, MANIFEST, LIMIT).unwrap();
        assert_eq!(
            result.init_segment_url.as_deref(),
            Some("https://cdn.example/vod/title/init.mp4")
        );
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].url, "https://cdn.example/vod/title/b.m4s");
        assert_eq!(result.segments[0].duration, 2.0);
    }

    #[test]
    fn base_url_only_is_one_segment() {
        let xml = r#"<MPD mediaPresentationDuration="PT42S">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="r" bandwidth="10"><BaseURL>full.mp4</BaseURL></Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let result = parse_mpd(xml, MANIFEST, LIMIT).unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].url, "https://cdn.example/vod/title/full.mp4");
        assert_eq!(result.segments[0].duration, 42.0);
    }

    #[test]
    fn negative_repeat_fills_to_presentation_end() {
        let xml = r#"<MPD mediaPresentationDuration="PT10S">
  <Period><AdaptationSet mimeType="video/mp4">
    <SegmentTemplate timescale="1" media="$Number$.m4s">
      <SegmentTimeline><S t="0" d="2" r="-1"/></SegmentTimeline>
    </SegmentTemplate>
    <Representation id="v" bandwidth="1"/>
  </AdaptationSet></Period>
</MPD>"#;
        let result = parse_mpd(xml, MANIFEST, LIMIT).unwrap();
        assert_eq!(result.segments.len(), 5);
        assert_eq!(result.segments[4].url, "https://cdn.example/vod/title/5.m4s");
    }

    #[tokio::test]
    async fn malformed_manifest_is_empty() {
        let transport = ScriptedTransport::new()
            .with(MANIFEST, "<MPD mediaPresentationDuration=\"PT1S\"><Period>");
        let result = DashResolver::new(&transport, LIMIT).resolve(MANIFEST).await;
        assert!(result.is_empty());
    }

    #[test]
    fn zero_duration_entries_still_count() {
        let xml = timeline_mpd(r#"<S t="0" d="2" r="1"/><S d="0" r="2"/><S d="3"/>"#);
        let result = parse_mpd(&xml, MANIFEST, LIMIT).unwrap();
        assert_eq!(result.segments.len(), 2 + 3 + 1);
        let durations: Vec<f64> = result.segments.iter().map(|s| s.duration).collect();
        assert_eq!(durations, vec![2.0, 2.0, 0.0, 0.0, 0.0, 3.0]);

        let xml = timeline_mpd(r#"<S t="0" r="-1"/>"#);
        assert_eq!(parse_mpd(&xml, MANIFEST, LIMIT).unwrap().segments.len(), 1);
    }

    #[test]
    fn clock_overflow_is_an_error() {
        let xml = timeline_mpd(r#"<S t="18446744073709551615" d="2" r="1"/>"#);
        assert!(matches!(parse_mpd(&xml, MANIFEST, LIMIT), Err(DashError::Overflow)));
    }

    #[test]
    fn oversized_manifests_are_rejected() {
        let xml = timeline_mpd(r#"<S t="0" d="1" r="4294967295"/>"#);
        assert!(matches!(
            parse_mpd(&xml, MANIFEST, LIMIT),
            Err(DashError::TooManySegments(LIMIT))
        ));

        let xml = r#"<MPD mediaPresentationDuration="P365D">
  <Period><AdaptationSet mimeType="video/mp4">
    <SegmentTemplate timescale="1000" duration="1" media="$Number$.m4s"/>
    <Representation id="v" bandwidth="1"/>
  </AdaptationSet></Period>
</MPD>"#;
        assert!(matches!(
            parse_mpd(xml, MANIFEST, LIMIT),
            Err(DashError::TooManySegments(LIMIT))
        ));
    }

    #[tokio::test]
    async fn overflowing_manifest_resolves_empty() {
        let xml = timeline_mpd(r#"<S t="18446744073709551615" d="2" r="1"/>"#);
        let transport = ScriptedTransport::new().with(MANIFEST, xml);
        assert!(DashResolver::new(&transport, LIMIT).resolve(MANIFEST).await.is_empty());
    }
}
