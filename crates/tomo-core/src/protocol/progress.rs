//! Slicing progress stream: server-sent-event framing and frame parsing.
//!
//! The slicing server answers `GET /api/slice/progress/{job_id}` with a
//! `text/event-stream` body.  Each event is one or more `data:` lines
//! followed by a blank line; the data is a JSON object:
//!
//! ```json
//! {"progress":45,"stage":"PROJECTING","status":"Generating projection 34/120"}
//! {"progress":100,"stage":"COMPLETE","status":"complete","images":["iVBOR...", "..."]}
//! {"progress":100,"stage":"FAILED","status":"failed","error":"mesh is empty"}
//! ```
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete event payloads;
//! [`parse_progress_frame`] turns one payload into a closed [`JobUpdate`].

use serde::Deserialize;
use tracing::warn;

use crate::domain::image_set::ImageSet;
use crate::domain::job_state::{JobStage, JobUpdate};
use crate::error::JobError;
use crate::protocol::base64;

// ── SSE framing ───────────────────────────────────────────────────────────────

/// Incremental `text/event-stream` decoder.
///
/// Network reads split events at arbitrary byte boundaries, so bytes are
/// buffered until a blank line terminates an event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // Prefix of `buf` already searched for a separator.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns the data payload of every event it completed.
    ///
    /// Multiple `data:` lines in one event are joined with `\n`; comment lines
    /// (`:`) and other fields (`event:`, `id:`, `retry:`) are ignored.  Events
    /// without data produce nothing.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        // A separator may straddle the previous chunk, so back up by at most
        // three bytes (`\r\n\r` of a `\r\n\r\n`).
        let mut from = self.scanned.saturating_sub(3);
        while let Some((end, sep_len)) = find_event_boundary(&self.buf, from) {
            let raw: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
            from = 0;
            let text = String::from_utf8_lossy(&raw);
            let mut data_lines = Vec::new();
            for line in text.split('\n') {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                }
            }
            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
            }
        }
        self.scanned = self.buf.len();

        events
    }

    /// Bytes buffered for an event that has not terminated yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Finds the first blank-line separator at or after `from`; returns
/// (event_end, separator_len).
fn find_event_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

// ── Frame parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawProgressFrame {
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Option<RawDetails>,
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDetails {
    #[serde(default)]
    current_step: Option<u64>,
    #[serde(default)]
    total_steps: Option<u64>,
    #[serde(default)]
    eta: Option<f64>,
}

/// Parses one event payload.
///
/// Returns:
/// - `Ok(Some(update))` for a recognised frame,
/// - `Ok(None)` for a payload that is not a JSON object (logged and skipped;
///   the next frame supersedes it anyway),
/// - `Err(JobError::Malformed)` for a terminal frame missing its payload or
///   carrying undecodable images.
///
/// A frame is terminal when `status` is `complete`/`failed` or `stage` is
/// `COMPLETE`/`FAILED`.  Decoded images receive sequence indices in arrival
/// order.
///
/// # Errors
///
/// See above.
pub fn parse_progress_frame(payload: &str) -> Result<Option<JobUpdate>, JobError> {
    let raw: RawProgressFrame = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("skipping unparseable progress frame: {e}");
            return Ok(None);
        }
    };

    let status = raw.status.as_deref().unwrap_or("");
    let stage = raw.stage.as_deref().map(JobStage::parse);

    let is_complete = status == "complete" || stage == Some(JobStage::Complete);
    let is_failed = status == "failed" || stage == Some(JobStage::Failed);

    if is_failed {
        let reason = raw
            .error
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "unknown backend error".to_string());
        return Ok(Some(JobUpdate::Failed { reason }));
    }

    if is_complete {
        let encoded = raw
            .images
            .ok_or_else(|| JobError::Malformed("complete frame without images".into()))?;
        let mut buffers = Vec::with_capacity(encoded.len());
        for (i, text) in encoded.iter().enumerate() {
            let bytes = base64::decode(text)
                .map_err(|e| JobError::Malformed(format!("image {i}: {e}")))?;
            buffers.push(bytes);
        }
        return Ok(Some(JobUpdate::Complete {
            images: ImageSet::from_buffers(buffers),
        }));
    }

    if let Some(JobStage::Other(name)) = &stage {
        warn!("progress frame with unrecognised stage '{name}'");
    }

    Ok(Some(JobUpdate::Progress {
        progress: raw.progress,
        stage: stage.unwrap_or(JobStage::Idle),
        detail: describe(raw.status, raw.details),
    }))
}

fn describe(status: Option<String>, details: Option<RawDetails>) -> Option<String> {
    let mut text = status.filter(|s| !s.is_empty());
    if let Some(d) = details {
        let mut extra = Vec::new();
        if let (Some(cur), Some(total)) = (d.current_step, d.total_steps) {
            extra.push(format!("step {cur}/{total}"));
        }
        if let Some(eta) = d.eta {
            extra.push(format!("eta {eta:.0}s"));
        }
        if !extra.is_empty() {
            let extra = extra.join(", ");
            text = Some(match text {
                Some(t) => format!("{t} ({extra})"),
                None => extra,
            });
        }
    }
    text
}

// ── Tests ─────────────────────────────────────────────────────────────────────
