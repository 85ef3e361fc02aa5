//! Per-recording worker thread
//!
//! Each active recording owns a bounded frame queue drained by one worker.
//! The `active` flag decides who tears the session down: whichever side
//! flips it from true to false (the recorder on stop, or the worker on max
//! duration / write failure) closes the encoder and emits `Stopped`.

use crate::capture::frame::{Frame, PixelLayout};
use crate::recorder::encoder::VideoEncoder;
use crate::recorder::state::RecordingEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

pub(crate) type SessionMap = Arc<Mutex<HashMap<usize, Arc<ActiveRecording>>>>;

/// State shared between the recorder and one worker
pub(crate) struct ActiveRecording {
    pub id: Uuid,
    pub device_index: usize,
    pub filename: PathBuf,
    pub started_at: Instant,
    pub frame_tx: Sender<Frame>,
    pub encoder: Mutex<Option<Box<dyn VideoEncoder>>>,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    /// Disconnects when the worker exits
    pub done_rx: Receiver<()>,
    active: AtomicBool,
    dropped: AtomicU64,
    written: AtomicU64,
}

impl ActiveRecording {
    pub fn new(
        device_index: usize,
        filename: PathBuf,
        encoder: Box<dyn VideoEncoder>,
        frame_tx: Sender<Frame>,
        done_rx: Receiver<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_index,
            filename,
            started_at: Instant::now(),
            frame_tx,
            encoder: Mutex::new(Some(encoder)),
            worker: Mutex::new(None),
            done_rx,
            active: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clear the active flag; true for the single caller that cleared it
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn queued_frames(&self) -> usize {
        self.frame_tx.len()
    }

    /// Close the encoder if nobody else holds it before `deadline`
    pub fn close_encoder(&self, deadline: Instant, events: &broadcast::Sender<RecordingEvent>) {
        let Some(mut guard) = self.encoder.try_lock_until(deadline) else {
            tracing::warn!(
                "Encoder for camera {} still busy; it will close when the worker exits",
                self.device_index
            );
            return;
        };
        if let Some(mut encoder) = guard.take() {
            if let Err(e) = encoder.close() {
                tracing::error!("Failed to close recording for camera {}: {}", self.device_index, e);
                let _ = events.send(RecordingEvent::Error {
                    device_index: self.device_index,
                    message: e.to_string(),
                });
            }
        }
    }
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.get_mut().take() {
            if let Err(e) = encoder.close() {
                tracing::warn!("Late encoder close for camera {} failed: {}", self.device_index, e);
            }
        }
    }
}

/// Why the worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    MaxDuration,
    WriteFailed,
}

pub(crate) struct RecordingWorker {
    pub recording: Arc<ActiveRecording>,
    pub frames: Receiver<Frame>,
    pub sessions: SessionMap,
    pub events: broadcast::Sender<RecordingEvent>,
    pub layout: PixelLayout,
    pub dequeue_timeout: Duration,
    pub max_duration: Option<Duration>,
    pub done_tx: Sender<()>,
}

impl RecordingWorker {
    pub fn run(self) {
        let device_index = self.recording.device_index;
        tracing::debug!("Recording worker for camera {} started", device_index);

        let exit = self.drain();
        tracing::debug!("Recording worker for camera {} exiting: {:?}", device_index, exit);

        if exit != Exit::Stopped && self.recording.deactivate() {
            self.finish_on_own();
        }
        drop(self.done_tx);
    }

    fn drain(&self) -> Exit {
        let recording = &self.recording;
        loop {
            if !recording.is_active() {
                return Exit::Stopped;
            }
            if let Some(limit) = self.max_duration {
                if recording.started_at.elapsed() >= limit {
                    tracing::info!(
                        "Recording for camera {} reached max duration {:?}",
                        recording.device_index,
                        limit
                    );
                    return Exit::MaxDuration;
                }
            }

            let frame = match self.frames.recv_timeout(self.dequeue_timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Exit::Stopped,
            };
            if !recording.is_active() {
                return Exit::Stopped;
            }

            let frame = frame.to_layout(self.layout);
            let result = match recording.encoder.lock().as_mut() {
                Some(encoder) => encoder.write(&frame),
                None => return Exit::Stopped,
            };

            match result {
                Ok(()) => {
                    recording.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!("Write failed for camera {}: {}", recording.device_index, e);
                    let _ = self.events.send(RecordingEvent::Error {
                        device_index: recording.device_index,
                        message: e.to_string(),
                    });
                    return Exit::WriteFailed;
                }
            }
        }
    }

    /// Teardown after the worker ended the session itself
    fn finish_on_own(&self) {
        let recording = &self.recording;
        {
            let mut sessions = self.sessions.lock();
            if sessions
                .get(&recording.device_index)
                .is_some_and(|current| current.id == recording.id)
            {
                sessions.remove(&recording.device_index);
            }
        }

        // The encoder lock is only ever held by this thread while writing
        recording.close_encoder(Instant::now() + Duration::from_secs(1), &self.events);
        while self.frames.try_recv().is_ok() {}

        tracing::info!(
            "Recording stopped for camera {}: {} frames written, {} dropped",
            recording.device_index,
            recording.frames_written(),
            recording.dropped_frames()
        );
        let _ = self.events.send(RecordingEvent::Stopped {
            device_index: recording.device_index,
        });
    }
}
