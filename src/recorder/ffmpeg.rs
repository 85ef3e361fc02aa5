//! FFmpeg-backed encoder
//!
//! Raw BGR frames are piped into an `ffmpeg` child process which does the
//! actual compression and muxing.

use crate::capture::frame::{Frame, PixelLayout};
use crate::capture::traits::Resolution;
use crate::config::{Codec, PipelineConfig};
use crate::recorder::encoder::{check_frame_size, EncoderFactory, VideoEncoder};
use crate::utils::error::EncoderError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// How long a freshly spawned ffmpeg must stay alive to count as opened
const STARTUP_GRACE: Duration = Duration::from_millis(150);

/// Spawns one `ffmpeg` process per recording
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    binary: PathBuf,
    startup_grace: Duration,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Use a specific ffmpeg executable instead of the one on `PATH`
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            startup_grace: STARTUP_GRACE,
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(
        &self,
        path: &Path,
        config: &PipelineConfig,
        frame_size: Resolution,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        let args = encoder_args(path, config, frame_size);
        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::Open {
                path: path.display().to_string(),
                reason: format!("failed to start {}: {}", self.binary.display(), e),
            })?;

        if let Some(reason) = exited_during_startup(&mut process, self.startup_grace) {
            return Err(EncoderError::Open {
                path: path.display().to_string(),
                reason,
            });
        }

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, codec={}, output: {}",
            frame_size,
            config.fps,
            config.codec.ffmpeg_codec(),
            path.display()
        );

        Ok(Box::new(FfmpegEncoder {
            process: Some(process),
            frame_size,
            frames_written: 0,
            path: path.to_path_buf(),
        }))
    }
}

/// Why ffmpeg quit within `grace`, or `None` if it is still running
fn exited_during_startup(process: &mut Child, grace: Duration) -> Option<String> {
    let deadline = Instant::now() + grace;
    loop {
        match process.try_wait() {
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = process.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Some(format!("ffmpeg exited with {}: {}", status, stderr.trim()));
            }
            Ok(None) if Instant::now() >= deadline => return None,
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                let _ = process.kill();
                let _ = process.wait();
                return Some(format!("cannot poll ffmpeg: {}", e));
            }
        }
    }
}

/// Map 0-100 quality onto ffmpeg's codec-specific scale
fn quality_args(codec: Codec, quality: u8) -> [String; 2] {
    let quality = quality.min(100) as u32;
    match codec {
        // CRF 0 (lossless) .. 51 (worst)
        Codec::H264 => ["-crf".to_string(), (51 - quality * 51 / 100).to_string()],
        // q:v 2 (best) .. 31 (worst)
        Codec::Xvid | Codec::Mjpg | Codec::Mp4v => {
            ["-q:v".to_string(), (2 + (100 - quality) * 29 / 100).to_string()]
        }
    }
}

pub(crate) fn encoder_args(path: &Path, config: &PipelineConfig, frame_size: Resolution) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        "bgr24".into(),
        "-video_size".into(),
        format!("{}x{}", frame_size.width, frame_size.height),
        "-framerate".into(),
        config.fps.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        config.codec.ffmpeg_codec().into(),
    ];
    match config.codec {
        Codec::Xvid => args.extend(["-vtag".into(), "xvid".into()]),
        Codec::H264 => args.extend(["-pix_fmt".into(), "yuv420p".into()]),
        Codec::Mjpg | Codec::Mp4v => {}
    }
    args.extend(quality_args(config.codec, config.quality));
    args.push(path.to_string_lossy().to_string());
    args
}

struct FfmpegEncoder {
    process: Option<Child>,
    frame_size: Resolution,
    frames_written: u64,
    path: PathBuf,
}

impl VideoEncoder for FfmpegEncoder {
    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        check_frame_size(self.frame_size, frame)?;
        if frame.layout() != PixelLayout::Bgr8 {
            return Err(EncoderError::Write(format!(
                "expected BGR8 pixels, got {}",
                frame.layout()
            )));
        }

        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or(EncoderError::Closed)?;
        stdin.write_all(frame.data())?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        // Close stdin to signal EOF
        drop(process.stdin.take());
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Write(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(
            "FFmpeg encoder finished: {} frames, output: {}",
            self.frames_written,
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("FFmpeg encoder for {} did not finish cleanly: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_for_default_config() {
        let args = encoder_args(
            Path::new("/tmp/cam_0.avi"),
            &PipelineConfig::default(),
            Resolution::new(640, 480),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-pixel_format bgr24"));
        assert!(joined.contains("-video_size 640x480"));
        assert!(joined.contains("-framerate 30"));
        assert!(joined.contains("-c:v mpeg4 -vtag xvid"));
        assert!(joined.contains("-q:v 7"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/cam_0.avi"));
    }

    #[test]
    fn test_quality_mapping() {
        assert_eq!(quality_args(Codec::Mjpg, 100), ["-q:v".to_string(), "2".to_string()]);
        assert_eq!(quality_args(Codec::Mjpg, 0), ["-q:v".to_string(), "31".to_string()]);
        assert_eq!(quality_args(Codec::H264, 100), ["-crf".to_string(), "0".to_string()]);
        assert_eq!(quality_args(Codec::H264, 0), ["-crf".to_string(), "51".to_string()]);
        assert_eq!(quality_args(Codec::H264, 250), ["-crf".to_string(), "0".to_string()]);
    }

    #[test]
    fn test_missing_binary_fails_to_open() {
        let factory = FfmpegEncoderFactory::with_binary("/nonexistent/ffmpeg");
        let result = factory.open(
            Path::new("/tmp/never.avi"),
            &PipelineConfig::default(),
            Resolution::new(4, 4),
        );
        assert!(matches!(result, Err(EncoderError::Open { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_that_exits_at_once_fails_to_open() {
        let factory = FfmpegEncoderFactory::with_binary("false").with_startup_grace(Duration::from_secs(2));
        let started = Instant::now();
        let result = factory.open(
            Path::new("/tmp/never.avi"),
            &PipelineConfig::default(),
            Resolution::new(4, 4),
        );
        match result {
            Err(EncoderError::Open { reason, .. }) => assert!(reason.contains("exited"), "{reason}"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("exited process reported as open"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
