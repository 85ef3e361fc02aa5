//! Capture loop
//!
//! One cooperative [`Orchestrator::tick`] polls every acquiring device in
//! index order: pull a frame, run it through the processor, queue it for
//! recording and hand it to the display. The host drives the ticks, either
//! from its own event loop or through [`Orchestrator::run`].

use crate::capture::fleet::DeviceFleet;
use crate::capture::frame::Frame;
use crate::capture::system::SystemHandle;
use crate::config::{AppConfig, CaptureSettings};
use crate::monitor::performance::PerformanceMonitor;
use crate::pipeline::snapshot::{snapshot_path, write_png};
use crate::processing::frame_processor::{FrameProcessor, ProcessedFrame};
use crate::recorder::coordinator::Recorder;
use crate::recorder::encoder::EncoderFactory;
use crate::utils::error::AppResult;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives every kept frame, typically to put it on screen
pub trait DisplaySink: Send {
    fn show(&mut self, device_index: usize, frame: &Frame);
}

/// Display that discards frames (headless operation)
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _device_index: usize, _frame: &Frame) {}
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Frames received from devices
    pub pulled: usize,
    /// Frames shed by the processor
    pub skipped: usize,
    /// Frames accepted by a recording queue
    pub recorded: usize,
    /// Frames handed to the display
    pub displayed: usize,
}

pub struct Orchestrator {
    fleet: DeviceFleet,
    processor: FrameProcessor,
    recorder: Arc<Recorder>,
    display: Box<dyn DisplaySink>,
    capture: CaptureSettings,
}

impl Orchestrator {
    pub fn new(
        fleet: DeviceFleet,
        processor: FrameProcessor,
        recorder: Arc<Recorder>,
        display: Box<dyn DisplaySink>,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            fleet,
            processor,
            recorder,
            display,
            capture,
        }
    }

    /// Wire up a full pipeline from one config
    pub fn from_config(
        system: SystemHandle,
        config: AppConfig,
        encoders: Arc<dyn EncoderFactory>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor));
        let processor = FrameProcessor::new(monitor, config.processor);
        let recorder = Arc::new(Recorder::new(config.recorder, config.pipeline, encoders));
        Self::new(
            DeviceFleet::new(system),
            processor,
            recorder,
            display,
            config.capture,
        )
    }

    pub fn fleet(&self) -> &DeviceFleet {
        &self.fleet
    }

    pub fn fleet_mut(&mut self) -> &mut DeviceFleet {
        &mut self.fleet
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut FrameProcessor {
        &mut self.processor
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        self.processor.monitor()
    }

    pub fn capture_settings(&self) -> &CaptureSettings {
        &self.capture
    }

    /// Connect, configure and start every device
    ///
    /// Returns how many devices are acquiring afterwards.
    pub fn start_capture(&mut self) -> usize {
        if !self.fleet.connect_all() {
            tracing::warn!("No camera could be connected");
            return 0;
        }
        let resolution = self.capture.resolution.resolution();
        self.fleet.configure_all(resolution, self.capture.frame_rate);
        self.fleet.start_all_acquisition()
    }

    /// Pull, process, record and display one frame per acquiring device
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let timeout = self.capture.frame_timeout();

        for index in self.fleet.acquiring_indices() {
            let Some(frame) = self.fleet.next_frame(index, timeout) else {
                continue;
            };
            report.pulled += 1;

            let target_fps = self
                .fleet
                .session(index)
                .and_then(|s| s.frame_rate())
                .unwrap_or(self.capture.frame_rate);

            let frame = match self.processor.process_frame(index, frame, target_fps) {
                ProcessedFrame::Kept(frame) => frame,
                ProcessedFrame::Skipped => {
                    report.skipped += 1;
                    continue;
                }
            };

            if self.recorder.is_recording(index) && self.recorder.add_frame(index, frame.clone()) {
                report.recorded += 1;
            }

            self.display.show(index, &frame);
            report.displayed += 1;
        }

        report
    }

    /// Tick every `tick_interval` until `running` is cleared
    pub fn run(&mut self, running: &AtomicBool) {
        let interval = self.capture.tick_interval();
        tracing::info!("Capture loop running ({:?} tick)", interval);
        while running.load(Ordering::Relaxed) {
            self.tick();
            std::thread::sleep(interval);
        }
        tracing::info!("Capture loop stopped");
    }

    /// Start recording one device at the size of its next frame
    pub fn start_device_recording(&mut self, device_index: usize) -> bool {
        if self.recorder.is_recording(device_index) {
            return false;
        }
        let Some(frame) = self
            .fleet
            .next_frame(device_index, self.capture.frame_timeout())
        else {
            tracing::warn!("No frame from camera {}, cannot start recording", device_index);
            return false;
        };
        self.recorder.start_recording(device_index, frame.size(), None)
    }

    /// Start recording every acquiring device that is not already recording
    pub fn start_all_recordings(&mut self) -> usize {
        let mut started = 0;
        for index in self.fleet.acquiring_indices() {
            if !self.recorder.is_recording(index) && self.start_device_recording(index) {
                started += 1;
            }
        }
        tracing::info!("Started {} recordings", started);
        started
    }

    pub fn stop_all_recordings(&self) {
        self.recorder.stop_all_recordings();
    }

    /// Save one PNG per acquiring device into `dir`
    pub fn save_snapshots(&mut self, dir: &Path) -> AppResult<usize> {
        std::fs::create_dir_all(dir)?;
        let timestamp = Utc::now().timestamp();
        let timeout = self.capture.frame_timeout();

        let mut saved = 0;
        for index in self.fleet.acquiring_indices() {
            let Some(frame) = self.fleet.next_frame(index, timeout) else {
                tracing::warn!("No frame from camera {} for snapshot", index);
                continue;
            };
            let path = snapshot_path(dir, index, timestamp);
            if let Err(e) = write_png(&path, &frame) {
                tracing::error!("Failed to save snapshot for camera {}: {}", index, e);
                continue;
            }
            tracing::info!("Saved snapshot: {}", path.display());
            saved += 1;
        }
        Ok(saved)
    }

    /// Stop recordings and sampling, then release every device
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down capture pipeline");
        self.recorder.stop_all_recordings();
        self.processor.monitor().stop_sampling();
        self.fleet.disconnect_all();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelLayout;
    use crate::capture::simulated::{SimulatedCameraConfig, SimulatedSystem};
    use crate::capture::traits::Resolution;
    use crate::config::{ProcessorSettings, RecorderSettings, ResolutionPreset};
    use crate::monitor::probe::{FixedProbe, SystemSample};
    use crate::recorder::memory::MemoryEncoderFactory;
    use crate::recorder::state::RecordingEvent;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Counts frames per device and remembers the last size seen
    #[derive(Clone, Default)]
    struct CollectingDisplay {
        seen: Arc<Mutex<BTreeMap<usize, (usize, Resolution)>>>,
    }

    impl DisplaySink for CollectingDisplay {
        fn show(&mut self, device_index: usize, frame: &Frame) {
            let mut seen = self.seen.lock();
            let entry = seen.entry(device_index).or_insert((0, frame.size()));
            entry.0 += 1;
            entry.1 = frame.size();
        }
    }

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.capture.resolution = ResolutionPreset::Vga;
        config.capture.frame_timeout_ms = 50;
        config.capture.tick_interval_ms = 1;
        config.recorder = RecorderSettings {
            save_dir: dir.to_path_buf(),
            dequeue_timeout_ms: 20,
            join_timeout_ms: 500,
            ..Default::default()
        };
        config
    }

    fn orchestrator(
        cameras: Vec<SimulatedCameraConfig>,
        config: AppConfig,
    ) -> (Orchestrator, MemoryEncoderFactory, CollectingDisplay) {
        let factory = MemoryEncoderFactory::new();
        let display = CollectingDisplay::default();
        let orchestrator = Orchestrator::from_config(
            SystemHandle::initialize(SimulatedSystem::new(cameras)),
            config,
            Arc::new(factory.clone()),
            Box::new(display.clone()),
        );
        (orchestrator, factory, display)
    }

    fn cameras(count: usize) -> Vec<SimulatedCameraConfig> {
        (0..count)
            .map(|i| SimulatedCameraConfig::new(format!("SIM-{i}")))
            .collect()
    }

    #[test]
    fn test_tick_polls_every_acquiring_device() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, _factory, display) = orchestrator(cameras(2), config(dir.path()));
        assert_eq!(orchestrator.start_capture(), 2);

        let report = orchestrator.tick();
        assert_eq!(report.pulled, 2);
        assert_eq!(report.displayed, 2);
        assert_eq!(report.recorded, 0);

        let seen = display.seen.lock();
        assert_eq!(seen.get(&0).map(|e| e.1), Some(Resolution::new(640, 480)));
        assert!(seen.contains_key(&1));
    }

    #[test]
    fn test_tick_without_devices_is_empty() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, _factory, _display) = orchestrator(Vec::new(), config(dir.path()));
        assert_eq!(orchestrator.start_capture(), 0);
        assert_eq!(orchestrator.tick(), TickReport::default());
    }

    #[test]
    fn test_failed_device_does_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        let mut devices = cameras(1);
        devices.push(SimulatedCameraConfig::new("BROKEN").failing_start());
        let (mut orchestrator, _factory, display) = orchestrator(devices, config(dir.path()));

        assert_eq!(orchestrator.start_capture(), 1);
        let report = orchestrator.tick();
        assert_eq!(report.displayed, 1);
        assert!(!display.seen.lock().contains_key(&1));
    }

    #[test]
    fn test_skipped_frames_are_not_displayed() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.processor = ProcessorSettings {
            frame_skipping: true,
            ..Default::default()
        };
        let (mut orchestrator, _factory, _display) = orchestrator(cameras(1), config);
        orchestrator.start_capture();

        // No fps measured yet: candidates alternate skip/keep
        let first = orchestrator.tick();
        let second = orchestrator.tick();
        assert_eq!((first.skipped, first.displayed), (1, 0));
        assert_eq!((second.skipped, second.displayed), (0, 1));
        assert_eq!(orchestrator.monitor().snapshot().device(0).unwrap().dropped_frames, 1);
    }

    #[test]
    fn test_recording_through_ticks() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, factory, _display) = orchestrator(cameras(2), config(dir.path()));
        let mut events = orchestrator.recorder().subscribe();
        orchestrator.start_capture();

        assert!(orchestrator.start_device_recording(0));
        assert!(!orchestrator.start_device_recording(0));
        assert_eq!(orchestrator.start_all_recordings(), 1);

        let mut recorded = 0;
        for _ in 0..5 {
            recorded += orchestrator.tick().recorded;
        }
        assert_eq!(recorded, 10);

        let paths = factory.paths();
        assert_eq!(paths.len(), 2);
        let deadline = Instant::now() + Duration::from_secs(5);
        while paths.iter().map(|p| factory.frame_count(p)).sum::<usize>() < 10
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        orchestrator.stop_all_recordings();
        assert!(orchestrator.recorder().active_devices().is_empty());

        for path in &paths {
            let video = factory.video(path).unwrap();
            assert_eq!(video.frame_size, Resolution::new(640, 480));
            assert_eq!(video.frames.len(), 5);
            assert!(video.closed);
        }
        assert!(matches!(events.try_recv(), Ok(RecordingEvent::Started { .. })));
    }

    #[test]
    fn test_adaptive_quality_keeps_recorded_size() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.processor.adaptive_quality = true;
        let (mut orchestrator, factory, display) = orchestrator(cameras(1), config);
        orchestrator.monitor().record_system_sample(SystemSample {
            cpu_percent: 95.0,
            memory_used_mb: 0.0,
        });
        orchestrator.start_capture();
        assert!(orchestrator.start_device_recording(0));

        orchestrator.tick();
        assert_eq!(orchestrator.processor().quality_level(), 0.5);
        assert_eq!(display.seen.lock()[&0].1, Resolution::new(640, 480));
        orchestrator.stop_all_recordings();
        let path = factory.paths().remove(0);
        assert!(factory
            .video(&path)
            .unwrap()
            .frames
            .iter()
            .all(|f| f.size() == Resolution::new(640, 480)));
    }

    #[test]
    fn test_save_snapshots() {
        let dir = TempDir::new().unwrap();
        let shots = dir.path().join("shots");
        let devices = vec![
            SimulatedCameraConfig::new("A"),
            SimulatedCameraConfig::new("B").with_layout(PixelLayout::Mono8),
        ];
        let (mut orchestrator, _factory, _display) = orchestrator(devices, config(dir.path()));
        orchestrator.start_capture();

        assert_eq!(orchestrator.save_snapshots(&shots).unwrap(), 2);
        let mut names: Vec<String> = std::fs::read_dir(&shots)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert!(names[0].starts_with("snapshot_cam0_") && names[0].ends_with(".png"));
        assert!(names[1].starts_with("snapshot_cam1_"));
    }

    #[test]
    fn test_snapshot_failure_skips_only_that_device() {
        let dir = TempDir::new().unwrap();
        let shots = dir.path().join("shots");
        let (mut orchestrator, _factory, _display) = orchestrator(cameras(2), config(dir.path()));
        orchestrator.start_capture();

        // Directories where camera 0's snapshots would go make its writes fail
        let now = Utc::now().timestamp();
        for secs in now..now + 3 {
            std::fs::create_dir_all(snapshot_path(&shots, 0, secs)).unwrap();
        }

        assert_eq!(orchestrator.save_snapshots(&shots).unwrap(), 1);
        let cam1: Vec<_> = std::fs::read_dir(&shots)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .collect();
        assert_eq!(cam1.len(), 1);
        assert!(cam1[0].file_name().unwrap().to_string_lossy().starts_with("snapshot_cam1_"));
    }

    #[test]
    fn test_run_until_cleared() {
        let dir = TempDir::new().unwrap();
        let (mut orchestrator, _factory, display) = orchestrator(cameras(1), config(dir.path()));
        orchestrator.start_capture();

        let running = Arc::new(AtomicBool::new(true));
        let stopper = {
            let running = running.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                running.store(false, Ordering::Relaxed);
            })
        };
        orchestrator.run(&running);
        stopper.join().unwrap();
        assert!(display.seen.lock()[&0].0 > 0);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let dir = TempDir::new().unwrap();
        let system = SimulatedSystem::with_cameras(2);
        let shutdowns: Arc<AtomicUsize> = system.shutdown_counter();
        let factory = MemoryEncoderFactory::new();
        let mut orchestrator = Orchestrator::from_config(
            SystemHandle::initialize(system),
            config(dir.path()),
            Arc::new(factory),
            Box::new(NullDisplay),
        );
        orchestrator.start_capture();
        orchestrator.start_all_recordings();
        assert!(orchestrator
            .monitor()
            .start_sampling(Box::new(FixedProbe::new(10.0, 10.0))));

        orchestrator.shutdown();
        assert!(orchestrator.recorder().active_devices().is_empty());
        assert!(!orchestrator.monitor().is_sampling());
        assert!(orchestrator.fleet().is_empty());

        drop(orchestrator);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
