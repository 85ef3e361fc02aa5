//! Recording coordinator
//!
//! Owns every active recording, at most one per device, and manages their
//! lifecycle: opening the encoder, spawning the worker, feeding frames
//! without ever blocking the caller, and tearing sessions down.

use crate::capture::frame::Frame;
use crate::capture::traits::Resolution;
use crate::config::{PipelineConfig, RecorderSettings};
use crate::recorder::encoder::EncoderFactory;
use crate::recorder::state::{recording_path, RecordingEvent, RecordingStatus};
use crate::recorder::worker::{ActiveRecording, RecordingWorker, SessionMap};
use chrono::Local;
use crossbeam_channel::{bounded, RecvTimeoutError, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Records frames from any number of devices into separate files
pub struct Recorder {
    settings: RecorderSettings,
    config: RwLock<PipelineConfig>,
    factory: Arc<dyn EncoderFactory>,
    sessions: SessionMap,
    /// Devices whose encoder is being opened
    opening: Mutex<HashSet<usize>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    pub fn new(
        settings: RecorderSettings,
        config: PipelineConfig,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            settings,
            config: RwLock::new(config),
            factory,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            opening: Mutex::new(HashSet::new()),
            event_tx,
        }
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.read().clone()
    }

    /// Replace the config used by recordings started from now on
    pub fn configure(&self, config: PipelineConfig) {
        tracing::info!(
            "Recording config: codec={}, fps={}, quality={}",
            config.codec.fourcc(),
            config.fps,
            config.quality
        );
        *self.config.write() = config;
    }

    /// Start recording `device_index` at `frame_size`
    ///
    /// Returns false if the device is already recording or the encoder
    /// cannot be opened; the latter is also reported as an `Error` event.
    pub fn start_recording(
        &self,
        device_index: usize,
        frame_size: Resolution,
        filename: Option<PathBuf>,
    ) -> bool {
        let Some(_reservation) = self.reserve(device_index) else {
            tracing::warn!("Camera {} is already recording", device_index);
            return false;
        };

        let config = self.config.read().clone();
        let path = match filename {
            Some(name) => self.settings.save_dir.join(name),
            None => recording_path(&self.settings, config.codec, device_index, Local::now()),
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(dir) {
                self.report_error(device_index, format!("cannot create {}: {}", dir.display(), e));
                return false;
            }
        }

        // No session lock is held while the encoder opens
        let encoder = match self.factory.open(&path, &config, frame_size) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.report_error(device_index, e.to_string());
                return false;
            }
        };

        let (frame_tx, frame_rx) = bounded(self.settings.queue_capacity.max(1));
        let (done_tx, done_rx) = bounded::<()>(0);
        let recording = Arc::new(ActiveRecording::new(
            device_index,
            path.clone(),
            encoder,
            frame_tx,
            done_rx,
        ));

        let worker = RecordingWorker {
            recording: recording.clone(),
            frames: frame_rx,
            sessions: self.sessions.clone(),
            events: self.event_tx.clone(),
            layout: self.factory.pixel_layout(),
            dequeue_timeout: self.settings.dequeue_timeout(),
            max_duration: config.max_duration(),
            done_tx,
        };

        let mut sessions = self.sessions.lock();
        // Registered before the worker runs so a worker that ends at once
        // finds its own entry to remove
        sessions.insert(device_index, recording.clone());

        let spawned = std::thread::Builder::new()
            .name(format!("recorder-cam{}", device_index))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => *recording.worker.lock() = Some(handle),
            Err(e) => {
                sessions.remove(&device_index);
                drop(sessions);
                recording.deactivate();
                self.report_error(device_index, format!("failed to spawn worker: {}", e));
                return false;
            }
        }

        // Sent under the lock so it always precedes the worker's own Stopped
        let filename = path.display().to_string();
        tracing::info!("Recording started for camera {}: {}", device_index, filename);
        let _ = self.event_tx.send(RecordingEvent::Started {
            device_index,
            filename,
        });
        true
    }

    /// Queue a frame for `device_index`
    ///
    /// Never blocks. Returns false when the device is not recording or the
    /// queue is full, in which case the frame is counted as dropped.
    pub fn add_frame(&self, device_index: usize, frame: Frame) -> bool {
        let Some(recording) = self.active(device_index) else {
            return false;
        };
        match recording.frame_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                recording.record_drop();
                tracing::debug!("Recording queue full for camera {}, frame dropped", device_index);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stop recording `device_index`; false if it was not recording
    ///
    /// Waits at most the configured join timeout for the worker.
    pub fn stop_recording(&self, device_index: usize) -> bool {
        let Some(recording) = self.sessions.lock().remove(&device_index) else {
            return false;
        };
        let deadline = Instant::now() + self.settings.join_timeout();

        if !recording.deactivate() {
            // The worker is already tearing the session down
            wait_for_worker(&recording, deadline);
            return false;
        }

        if wait_for_worker(&recording, deadline) {
            if let Some(handle) = recording.worker.lock().take() {
                if handle.join().is_err() {
                    tracing::error!("Recording worker for camera {} panicked", device_index);
                }
            }
        } else {
            tracing::warn!(
                "Recording worker for camera {} did not exit within {:?}",
                device_index,
                self.settings.join_timeout()
            );
        }

        recording.close_encoder(deadline, &self.event_tx);

        tracing::info!(
            "Recording stopped for camera {}: {} frames written, {} dropped, {} discarded",
            device_index,
            recording.frames_written(),
            recording.dropped_frames(),
            recording.queued_frames()
        );
        let _ = self.event_tx.send(RecordingEvent::Stopped { device_index });
        true
    }

    /// Stop every active recording
    pub fn stop_all_recordings(&self) {
        for device_index in self.active_devices() {
            self.stop_recording(device_index);
        }
    }

    pub fn is_recording(&self, device_index: usize) -> bool {
        self.active(device_index).is_some()
    }

    /// Time since the recording started, or `None` if not recording
    pub fn recording_duration(&self, device_index: usize) -> Option<Duration> {
        self.active(device_index).map(|r| r.started_at.elapsed())
    }

    /// Frames dropped on a full queue in the current recording
    pub fn dropped_frames(&self, device_index: usize) -> u64 {
        self.active(device_index)
            .map(|r| r.dropped_frames())
            .unwrap_or(0)
    }

    /// Frames waiting to be written in the current recording
    pub fn queued_frames(&self, device_index: usize) -> usize {
        self.active(device_index)
            .map(|r| r.queued_frames())
            .unwrap_or(0)
    }

    /// Devices with an active recording, ascending
    pub fn active_devices(&self) -> Vec<usize> {
        let mut devices: Vec<usize> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, r)| r.is_active())
            .map(|(&index, _)| index)
            .collect();
        devices.sort_unstable();
        devices
    }

    pub fn status(&self, device_index: usize) -> Option<RecordingStatus> {
        self.active(device_index).map(|r| RecordingStatus {
            device_index,
            filename: r.filename.clone(),
            duration_ms: r.started_at.elapsed().as_secs_f64() * 1000.0,
            frames_written: r.frames_written(),
            dropped_frames: r.dropped_frames(),
            queued_frames: r.queued_frames(),
        })
    }

    fn active(&self, device_index: usize) -> Option<Arc<ActiveRecording>> {
        self.sessions
            .lock()
            .get(&device_index)
            .filter(|r| r.is_active())
            .cloned()
    }

    /// Claim `device_index` for a recording that is being opened
    fn reserve(&self, device_index: usize) -> Option<Reservation<'_>> {
        let mut opening = self.opening.lock();
        if opening.contains(&device_index) || self.active(device_index).is_some() {
            return None;
        }
        opening.insert(device_index);
        Some(Reservation {
            opening: &self.opening,
            device_index,
        })
    }

    fn report_error(&self, device_index: usize, message: String) {
        tracing::error!("Recording error for camera {}: {}", device_index, message);
        let _ = self.event_tx.send(RecordingEvent::Error {
            device_index,
            message,
        });
    }
}

/// Released once the recording is installed or its start has failed
struct Reservation<'a> {
    opening: &'a Mutex<HashSet<usize>>,
    device_index: usize,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.opening.lock().remove(&self.device_index);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop_all_recordings();
    }
}

/// True if the worker exited before `deadline`
fn wait_for_worker(recording: &ActiveRecording, deadline: Instant) -> bool {
    let remaining = deadline.saturating_duration_since(Instant::now());
    matches!(
        recording.done_rx.recv_timeout(remaining),
        Err(RecvTimeoutError::Disconnected)
    )
}
