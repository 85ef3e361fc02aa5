//! Pipeline configuration
//!
//! Serializable settings for capture, processing, recording and monitoring,
//! stored as one JSON document. Every struct has defaults that describe a
//! single HD camera at 30 fps recorded to XVID.

use crate::capture::traits::Resolution;
use crate::utils::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Named capture resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionPreset {
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "FHD")]
    FullHd,
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "VGA")]
    Vga,
}

impl ResolutionPreset {
    pub const ALL: [ResolutionPreset; 4] = [
        ResolutionPreset::Uhd4k,
        ResolutionPreset::FullHd,
        ResolutionPreset::Hd,
        ResolutionPreset::Vga,
    ];

    /// Pixel dimensions of the preset
    pub fn resolution(&self) -> Resolution {
        match self {
            ResolutionPreset::Uhd4k => Resolution::new(3840, 2160),
            ResolutionPreset::FullHd => Resolution::new(1920, 1080),
            ResolutionPreset::Hd => Resolution::new(1280, 720),
            ResolutionPreset::Vga => Resolution::new(640, 480),
        }
    }

    /// Short display name ("4K", "FHD", ...)
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionPreset::Uhd4k => "4K",
            ResolutionPreset::FullHd => "FHD",
            ResolutionPreset::Hd => "HD",
            ResolutionPreset::Vga => "VGA",
        }
    }

    /// Look up a preset by its display name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(name))
    }
}

impl Default for ResolutionPreset {
    fn default() -> Self {
        Self::Hd
    }
}

/// Video codec used for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Codec {
    Xvid,
    Mjpg,
    H264,
    Mp4v,
}

impl Codec {
    /// FourCC identifier of the codec
    pub fn fourcc(&self) -> &'static str {
        match self {
            Codec::Xvid => "XVID",
            Codec::Mjpg => "MJPG",
            Codec::H264 => "H264",
            Codec::Mp4v => "MP4V",
        }
    }

    /// Parse a FourCC identifier
    pub fn from_fourcc(fourcc: &str) -> Option<Self> {
        match fourcc.to_ascii_uppercase().as_str() {
            "XVID" => Some(Codec::Xvid),
            "MJPG" => Some(Codec::Mjpg),
            "H264" => Some(Codec::H264),
            "MP4V" => Some(Codec::Mp4v),
            _ => None,
        }
    }

    /// Container extension the codec is written into
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Xvid | Codec::Mjpg => "avi",
            Codec::H264 | Codec::Mp4v => "mp4",
        }
    }

    /// FFmpeg encoder name
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Codec::Xvid => "mpeg4",
            Codec::Mjpg => "mjpeg",
            Codec::H264 => "libx264",
            Codec::Mp4v => "mpeg4",
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::Xvid
    }
}

/// Settings captured by a recording session when it starts
///
/// Changing the recorder's config never affects sessions already running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub codec: Codec,

    /// Frame rate written into the container
    pub fps: f64,

    /// Quality on a 0-100 scale (100 = best)
    pub quality: u8,

    /// Stop a recording on its own after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<f64>,
}

impl PipelineConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Xvid,
            fps: 30.0,
            quality: 80,
            max_duration_secs: None,
        }
    }
}

/// Where and how recordings are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSettings {
    pub save_dir: PathBuf,

    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,

    #[serde(default = "default_true")]
    pub auto_timestamp: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

fn default_filename_prefix() -> String {
    "cam".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    100
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_join_timeout_ms() -> u64 {
    5000
}

impl RecorderSettings {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./recordings"),
            filename_prefix: default_filename_prefix(),
            auto_timestamp: true,
            queue_capacity: default_queue_capacity(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

/// Frame processor toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSettings {
    pub adaptive_quality: bool,
    pub frame_skipping: bool,
    pub cpu_limit_enabled: bool,
    /// System CPU percentage above which frames become skip candidates
    pub cpu_limit_threshold: f64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            adaptive_quality: false,
            frame_skipping: false,
            cpu_limit_enabled: false,
            cpu_limit_threshold: 80.0,
        }
    }
}

/// Performance monitor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    pub history_size: usize,
    pub sampling_interval_ms: u64,
}

impl MonitorSettings {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            history_size: 100,
            sampling_interval_ms: 1000,
        }
    }
}

/// Capture defaults applied by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub resolution: ResolutionPreset,
    pub frame_rate: f64,
    /// Upper bound on how long one tick waits for a device's next frame
    pub frame_timeout_ms: u64,
    /// Suggested delay between orchestrator ticks for the host event loop
    pub tick_interval_ms: u64,
}

impl CaptureSettings {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            resolution: ResolutionPreset::Hd,
            frame_rate: 30.0,
            frame_timeout_ms: 1000,
            // Lower is smoother but costs more CPU
            tick_interval_ms: 15,
        }
    }
}

/// Aggregate configuration for the whole pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl AppConfig {
    /// Read a config file; missing sections fall back to their defaults
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AppError;

    #[test]
    fn test_resolution_presets() {
        assert_eq!(ResolutionPreset::from_name("hd"), Some(ResolutionPreset::Hd));
        assert_eq!(ResolutionPreset::from_name("4K"), Some(ResolutionPreset::Uhd4k));
        assert_eq!(ResolutionPreset::from_name("8K"), None);
        assert_eq!(ResolutionPreset::FullHd.resolution(), Resolution::new(1920, 1080));
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(Codec::from_fourcc("mjpg"), Some(Codec::Mjpg));
        assert_eq!(Codec::Xvid.extension(), "avi");
        assert_eq!(Codec::H264.ffmpeg_codec(), "libx264");
    }

    #[test]
    fn test_max_duration_ignores_non_positive() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.max_duration(), None);
        config.max_duration_secs = Some(0.0);
        assert_eq!(config.max_duration(), None);
        config.max_duration_secs = Some(1.5);
        assert_eq!(config.max_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_app_config_defaults_from_partial_json() {
        let config: AppConfig = serde_json::from_str(r#"{"pipeline":{"codec":"MJPG","fps":15.0,"quality":50}}"#)
            .unwrap();
        assert_eq!(config.pipeline.codec, Codec::Mjpg);
        assert_eq!(config.recorder.queue_capacity, 100);
        assert_eq!(config.capture.resolution, ResolutionPreset::Hd);
        assert_eq!(config.monitor.sampling_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("camfleet.json");
        let mut config = AppConfig::default();
        config.capture.resolution = ResolutionPreset::Vga;
        config.pipeline.max_duration_secs = Some(60.0);
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.capture.resolution, ResolutionPreset::Vga);
        assert_eq!(loaded.pipeline.max_duration(), Some(Duration::from_secs(60)));
        assert!(matches!(
            AppConfig::load(&dir.path().join("absent.json")),
            Err(AppError::Io(_))
        ));
    }
}
