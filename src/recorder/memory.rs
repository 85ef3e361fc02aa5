//! In-memory encoder
//!
//! Keeps every written frame in a shared store keyed by output path. Used
//! for dry runs and previews, and as the encoder in tests. Writes can be
//! held back or made to fail to reproduce a slow or broken encoder.

use crate::capture::frame::{Frame, PixelLayout};
use crate::capture::traits::Resolution;
use crate::config::PipelineConfig;
use crate::recorder::encoder::{check_frame_size, EncoderFactory, VideoEncoder};
use crate::utils::error::EncoderError;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything written to one path
#[derive(Debug, Clone)]
pub struct RecordedVideo {
    pub config: PipelineConfig,
    pub frame_size: Resolution,
    pub frames: Vec<Frame>,
    pub closed: bool,
}

#[derive(Default)]
struct Behaviour {
    fail_open: Option<String>,
    fail_after: Option<u64>,
    held: bool,
}

#[derive(Default)]
struct Store {
    videos: Mutex<BTreeMap<PathBuf, RecordedVideo>>,
    behaviour: Mutex<Behaviour>,
    released: Condvar,
}

/// Factory whose encoders write into shared memory
///
/// Clones share the same store.
#[derive(Clone, Default)]
pub struct MemoryEncoderFactory {
    store: Arc<Store>,
    layout: Option<PixelLayout>,
}

impl MemoryEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request frames in `layout` instead of BGR
    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Make every subsequent `open` fail with `reason`
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.store.behaviour.lock().fail_open = Some(reason.into());
    }

    /// Make encoders fail once they have written `frames` frames
    pub fn fail_after(&self, frames: u64) {
        self.store.behaviour.lock().fail_after = Some(frames);
    }

    /// Block writers until [`release_writes`](Self::release_writes)
    pub fn hold_writes(&self) {
        self.store.behaviour.lock().held = true;
    }

    pub fn release_writes(&self) {
        self.store.behaviour.lock().held = false;
        self.store.released.notify_all();
    }

    pub fn video(&self, path: &Path) -> Option<RecordedVideo> {
        self.store.videos.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.store.videos.lock().keys().cloned().collect()
    }

    pub fn frame_count(&self, path: &Path) -> usize {
        self.store
            .videos
            .lock()
            .get(path)
            .map(|v| v.frames.len())
            .unwrap_or(0)
    }
}

impl EncoderFactory for MemoryEncoderFactory {
    fn open(
        &self,
        path: &Path,
        config: &PipelineConfig,
        frame_size: Resolution,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError> {
        if let Some(reason) = self.store.behaviour.lock().fail_open.clone() {
            return Err(EncoderError::Open {
                path: path.display().to_string(),
                reason,
            });
        }

        self.store.videos.lock().insert(
            path.to_path_buf(),
            RecordedVideo {
                config: config.clone(),
                frame_size,
                frames: Vec::new(),
                closed: false,
            },
        );

        Ok(Box::new(MemoryEncoder {
            store: self.store.clone(),
            path: path.to_path_buf(),
            frame_size,
            frames_written: 0,
            closed: false,
        }))
    }

    fn pixel_layout(&self) -> PixelLayout {
        self.layout.unwrap_or(PixelLayout::Bgr8)
    }
}

struct MemoryEncoder {
    store: Arc<Store>,
    path: PathBuf,
    frame_size: Resolution,
    frames_written: u64,
    closed: bool,
}

impl VideoEncoder for MemoryEncoder {
    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        if self.closed {
            return Err(EncoderError::Closed);
        }
        check_frame_size(self.frame_size, frame)?;

        {
            let mut behaviour = self.store.behaviour.lock();
            while behaviour.held {
                self.store.released.wait(&mut behaviour);
            }
            if behaviour.fail_after.is_some_and(|limit| self.frames_written >= limit) {
                return Err(EncoderError::Write("simulated write failure".to_string()));
            }
        }

        if let Some(video) = self.store.videos.lock().get_mut(&self.path) {
            video.frames.push(frame.clone());
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(video) = self.store.videos.lock().get_mut(&self.path) {
            video.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(0, width, height, PixelLayout::Bgr8, vec![0; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn test_records_frames_per_path() {
        let factory = MemoryEncoderFactory::new();
        let path = Path::new("a.avi");
        let mut encoder = factory
            .open(path, &PipelineConfig::default(), Resolution::new(4, 2))
            .unwrap();
        encoder.write(&frame(4, 2)).unwrap();
        encoder.write(&frame(4, 2)).unwrap();
        encoder.close().unwrap();

        let video = factory.video(path).unwrap();
        assert_eq!(video.frames.len(), 2);
        assert!(video.closed);
        assert!(matches!(encoder.write(&frame(4, 2)), Err(EncoderError::Closed)));
    }

    #[test]
    fn test_rejects_wrong_size() {
        let factory = MemoryEncoderFactory::new();
        let mut encoder = factory
            .open(Path::new("b.avi"), &PipelineConfig::default(), Resolution::new(4, 2))
            .unwrap();
        assert!(matches!(
            encoder.write(&frame(2, 2)),
            Err(EncoderError::FrameSize { actual_width: 2, .. })
        ));
    }

    #[test]
    fn test_injected_failures() {
        let factory = MemoryEncoderFactory::new();
        factory.fail_after(1);
        let mut encoder = factory
            .open(Path::new("c.avi"), &PipelineConfig::default(), Resolution::new(1, 1))
            .unwrap();
        assert!(encoder.write(&frame(1, 1)).is_ok());
        assert!(encoder.write(&frame(1, 1)).is_err());

        factory.fail_open("no space left");
        assert!(factory
            .open(Path::new("d.avi"), &PipelineConfig::default(), Resolution::new(1, 1))
            .is_err());
    }
}
