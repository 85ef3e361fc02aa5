//! Recording state and events
//!
//! Types shared between the recorder, its workers and whoever listens to
//! recording events.

use crate::config::{Codec, RecorderSettings};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingEvent {
    /// A session opened its file and its worker is running
    #[serde(rename_all = "camelCase")]
    Started { device_index: usize, filename: String },
    /// A session was torn down, by request or on its own
    #[serde(rename_all = "camelCase")]
    Stopped { device_index: usize },
    /// Opening or writing failed for one device
    #[serde(rename_all = "camelCase")]
    Error { device_index: usize, message: String },
}

impl RecordingEvent {
    pub fn device_index(&self) -> usize {
        match self {
            RecordingEvent::Started { device_index, .. }
            | RecordingEvent::Stopped { device_index }
            | RecordingEvent::Error { device_index, .. } => *device_index,
        }
    }
}

/// Point-in-time view of one active recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub device_index: usize,
    pub filename: PathBuf,
    pub duration_ms: f64,
    pub frames_written: u64,
    pub dropped_frames: u64,
    pub queued_frames: usize,
}

/// Build the output path for a new recording of `device_index`
///
/// `<prefix>_<device>_<YYYYmmdd_HHMMSS>.<ext>` with auto-timestamping,
/// `<prefix>_<device>.<ext>` without.
pub fn recording_path(
    settings: &RecorderSettings,
    codec: Codec,
    device_index: usize,
    now: DateTime<Local>,
) -> PathBuf {
    let stem = if settings.auto_timestamp {
        format!(
            "{}_{}_{}",
            settings.filename_prefix,
            device_index,
            now.format("%Y%m%d_%H%M%S")
        )
    } else {
        format!("{}_{}", settings.filename_prefix, device_index)
    };
    settings
        .save_dir
        .join(format!("{}.{}", stem, codec.extension()))
}
