//! Performance monitor
//!
//! Tracks system load (sampled by a background thread) and per-device
//! throughput (fed by the frame processor), and serves both as a single
//! read-only [`MetricsSnapshot`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let monitor = Arc::new(PerformanceMonitor::new(MonitorSettings::default()));
//! monitor.start_sampling(Box::new(ProcProbe::new()));
//!
//! monitor.record_frame_processed(0, elapsed);
//! let metrics = monitor.snapshot();
//! println!("CPU: {:.1}%, avg FPS: {:.1}", metrics.system_cpu, metrics.average_fps);
//!
//! monitor.stop_sampling();
//! ```

use crate::config::MonitorSettings;
use crate::monitor::probe::{SystemProbe, SystemSample};
use crate::monitor::window::MetricsWindow;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Minimum time between two FPS computations for a device
pub const FPS_CALC_INTERVAL: Duration = Duration::from_secs(1);

/// Throughput of one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetricsSnapshot {
    /// Most recent FPS computation (0 before the first one)
    pub fps: f64,
    /// Mean over the processing-time window, in milliseconds
    pub mean_processing_time_ms: f64,
    /// Total frames dropped since the last reset
    pub dropped_frames: u64,
}

/// Read-only view of all metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system_cpu: f64,
    pub system_memory_mb: f64,
    /// Mean of the latest FPS of every device that has one
    pub average_fps: f64,
    pub devices: BTreeMap<usize, DeviceMetricsSnapshot>,
    /// System readings the probe could not provide since the last reset
    #[serde(default)]
    pub failed_samples: u64,
}

impl MetricsSnapshot {
    pub fn device(&self, index: usize) -> Option<&DeviceMetricsSnapshot> {
        self.devices.get(&index)
    }

    /// Latest FPS of a device, 0 if unknown
    pub fn device_fps(&self, index: usize) -> f64 {
        self.device(index).map(|d| d.fps).unwrap_or(0.0)
    }
}

/// Push notification published once per sampling interval
#[derive(Debug, Clone)]
pub enum MetricsEvent {
    Updated(MetricsSnapshot),
}

struct DeviceMetrics {
    fps: MetricsWindow,
    processing_times: MetricsWindow,
    last_fps_calc: Instant,
    frames_since_calc: u64,
}

impl DeviceMetrics {
    fn new(history_size: usize, now: Instant) -> Self {
        Self {
            fps: MetricsWindow::new(history_size),
            processing_times: MetricsWindow::new(history_size),
            last_fps_calc: now,
            frames_since_calc: 0,
        }
    }
}

struct MonitorState {
    history_size: usize,
    cpu_percent: MetricsWindow,
    memory_mb: MetricsWindow,
    devices: BTreeMap<usize, DeviceMetrics>,
    dropped: BTreeMap<usize, u64>,
    failed_samples: u64,
}

impl MonitorState {
    fn new(history_size: usize) -> Self {
        Self {
            history_size,
            cpu_percent: MetricsWindow::new(history_size),
            memory_mb: MetricsWindow::new(history_size),
            devices: BTreeMap::new(),
            dropped: BTreeMap::new(),
            failed_samples: 0,
        }
    }

    fn record_system(&mut self, sample: SystemSample) {
        self.cpu_percent.push(sample.cpu_percent);
        self.memory_mb.push(sample.memory_used_mb);
    }

    fn record_frame(&mut self, index: usize, processing_time: Duration, now: Instant) {
        let history_size = self.history_size;
        let metrics = self
            .devices
            .entry(index)
            .or_insert_with(|| DeviceMetrics::new(history_size, now));

        metrics.processing_times.push(processing_time.as_secs_f64());
        metrics.frames_since_calc += 1;

        let elapsed = now.saturating_duration_since(metrics.last_fps_calc);
        if elapsed >= FPS_CALC_INTERVAL {
            let fps = metrics.frames_since_calc as f64 / elapsed.as_secs_f64();
            metrics.fps.push(fps);
            metrics.last_fps_calc = now;
            metrics.frames_since_calc = 0;
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut devices = BTreeMap::new();
        for (&index, metrics) in &self.devices {
            devices.insert(
                index,
                DeviceMetricsSnapshot {
                    fps: metrics.fps.latest().unwrap_or(0.0),
                    mean_processing_time_ms: metrics.processing_times.mean().unwrap_or(0.0) * 1000.0,
                    dropped_frames: self.dropped.get(&index).copied().unwrap_or(0),
                },
            );
        }
        for (&index, &dropped) in &self.dropped {
            devices.entry(index).or_insert_with(|| DeviceMetricsSnapshot {
                dropped_frames: dropped,
                ..Default::default()
            });
        }

        let latest_fps: Vec<f64> = self.devices.values().filter_map(|m| m.fps.latest()).collect();
        let average_fps = if latest_fps.is_empty() {
            0.0
        } else {
            latest_fps.iter().sum::<f64>() / latest_fps.len() as f64
        };

        MetricsSnapshot {
            system_cpu: self.cpu_percent.latest().unwrap_or(0.0),
            system_memory_mb: self.memory_mb.latest().unwrap_or(0.0),
            average_fps,
            devices,
            failed_samples: self.failed_samples,
        }
    }

    fn reset(&mut self) {
        let now = Instant::now();
        self.cpu_percent.clear();
        self.memory_mb.clear();
        self.dropped.clear();
        self.failed_samples = 0;
        for metrics in self.devices.values_mut() {
            metrics.fps.clear();
            metrics.processing_times.clear();
            metrics.frames_since_calc = 0;
            metrics.last_fps_calc = now;
        }
    }
}

struct Sampler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Collects system and per-device performance metrics
pub struct PerformanceMonitor {
    state: Arc<Mutex<MonitorState>>,
    settings: MonitorSettings,
    event_tx: broadcast::Sender<MetricsEvent>,
    sampler: Mutex<Option<Sampler>>,
}

impl PerformanceMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MonitorState::new(settings.history_size))),
            settings,
            event_tx,
            sampler: Mutex::new(None),
        }
    }

    /// Subscribe to once-per-interval metric updates
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.event_tx.subscribe()
    }

    /// Start the background sampler; false if it is already running
    pub fn start_sampling(&self, mut probe: Box<dyn SystemProbe>) -> bool {
        let mut sampler = self.sampler.lock();
        if sampler.is_some() {
            return false;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let interval = self.settings.sampling_interval();

        let spawned = std::thread::Builder::new()
            .name("perf-sampler".to_string())
            .spawn(move || {
                loop {
                    match probe.sample() {
                        Some(sample) => state.lock().record_system(sample),
                        None => {
                            let failed = {
                                let mut state = state.lock();
                                state.failed_samples += 1;
                                state.failed_samples
                            };
                            tracing::warn!("System metrics sample failed ({} so far), skipped", failed);
                        }
                    }

                    let snapshot = state.lock().snapshot();
                    // No subscribers is fine
                    let _ = event_tx.send(MetricsEvent::Updated(snapshot));

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Performance sampler stopped");
            });

        match spawned {
            Ok(handle) => {
                *sampler = Some(Sampler { stop_tx, handle });
                tracing::info!("Performance sampling started ({:?} interval)", interval);
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn performance sampler: {}", e);
                false
            }
        }
    }

    /// Stop the sampler; returns once the thread has exited
    pub fn stop_sampling(&self) {
        let Some(sampler) = self.sampler.lock().take() else {
            return;
        };
        let _ = sampler.stop_tx.send(());
        if sampler.handle.join().is_err() {
            tracing::error!("Performance sampler panicked");
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.lock().is_some()
    }

    /// Append a system reading directly (bypassing the sampler)
    pub fn record_system_sample(&self, sample: SystemSample) {
        self.state.lock().record_system(sample);
    }

    /// Record that a frame from `index` was processed in `processing_time`
    pub fn record_frame_processed(&self, index: usize, processing_time: Duration) {
        self.record_frame_processed_at(index, processing_time, Instant::now());
    }

    pub(crate) fn record_frame_processed_at(
        &self,
        index: usize,
        processing_time: Duration,
        now: Instant,
    ) {
        self.state.lock().record_frame(index, processing_time, now);
    }

    pub fn record_dropped_frame(&self, index: usize) {
        *self.state.lock().dropped.entry(index).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().snapshot()
    }

    /// Clear all history and counters; the sampler keeps running
    pub fn reset(&self) {
        self.state.lock().reset();
        tracing::info!("Performance statistics reset");
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.stop_sampling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::probe::FixedProbe;

    fn feed_constant_rate(monitor: &PerformanceMonitor, index: usize, fps: u64, seconds: u64) {
        let start = Instant::now();
        let step_us = 1_000_000 / fps;
        for k in 0..fps * seconds {
            monitor.record_frame_processed_at(
                index,
                Duration::from_millis(2),
                start + Duration::from_micros(k * step_us),
            );
        }
    }

    #[test]
    fn test_fps_converges_to_production_rate() {
        let monitor = PerformanceMonitor::default();
        feed_constant_rate(&monitor, 0, 30, 3);
        let fps = monitor.snapshot().device_fps(0);
        assert!((fps - 30.0).abs() <= 3.0, "fps was {fps}");
    }

    #[test]
    fn test_no_fps_before_one_second() {
        let monitor = PerformanceMonitor::default();
        let start = Instant::now();
        for k in 0..10 {
            monitor.record_frame_processed_at(0, Duration::from_millis(1), start + Duration::from_millis(k * 50));
        }
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.device_fps(0), 0.0);
        assert_eq!(snapshot.average_fps, 0.0);
        assert!((snapshot.device(0).unwrap().mean_processing_time_ms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_fps_across_devices() {
        let monitor = PerformanceMonitor::default();
        feed_constant_rate(&monitor, 0, 20, 2);
        feed_constant_rate(&monitor, 1, 40, 2);
        // Device 2 has frames but no FPS sample yet and must not count
        monitor.record_frame_processed(2, Duration::from_millis(1));

        let snapshot = monitor.snapshot();
        let expected = (snapshot.device_fps(0) + snapshot.device_fps(1)) / 2.0;
        assert!((snapshot.average_fps - expected).abs() < 1e-9);
        assert_eq!(snapshot.devices.len(), 3);
    }

    #[test]
    fn test_dropped_frames_are_monotonic_totals() {
        let monitor = PerformanceMonitor::new(MonitorSettings {
            history_size: 2,
            sampling_interval_ms: 1000,
        });
        for _ in 0..5 {
            monitor.record_dropped_frame(3);
        }
        assert_eq!(monitor.snapshot().device(3).unwrap().dropped_frames, 5);
    }

    #[test]
    fn test_reset_clears_everything() {
        let monitor = PerformanceMonitor::default();
        feed_constant_rate(&monitor, 0, 30, 2);
        monitor.record_dropped_frame(0);
        monitor.record_system_sample(SystemSample {
            cpu_percent: 50.0,
            memory_used_mb: 1024.0,
        });

        monitor.reset();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.system_cpu, 0.0);
        assert_eq!(snapshot.device_fps(0), 0.0);
        assert_eq!(snapshot.device(0).unwrap().dropped_frames, 0);
    }

    #[test]
    fn test_sampler_records_and_publishes() {
        let monitor = PerformanceMonitor::new(MonitorSettings {
            history_size: 10,
            sampling_interval_ms: 20,
        });
        let mut events = monitor.subscribe();
        assert!(monitor.start_sampling(Box::new(FixedProbe::new(42.0, 512.0))));
        assert!(!monitor.start_sampling(Box::new(FixedProbe::new(0.0, 0.0))));

        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.snapshot().system_cpu != 42.0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(monitor.snapshot().system_cpu, 42.0);
        assert_eq!(monitor.snapshot().system_memory_mb, 512.0);

        monitor.stop_sampling();
        assert!(!monitor.is_sampling());
        assert!(matches!(
            events.try_recv(),
            Ok(MetricsEvent::Updated(_)) | Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_stop_sampling_within_one_interval() {
        let monitor = PerformanceMonitor::new(MonitorSettings {
            history_size: 10,
            sampling_interval_ms: 5_000,
        });
        assert!(monitor.start_sampling(Box::new(FixedProbe::unavailable())));
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        monitor.stop_sampling();
        assert!(started.elapsed() < Duration::from_secs(5));
        // Sampler can be restarted after a stop
        assert!(monitor.start_sampling(Box::new(FixedProbe::unavailable())));
    }

    #[test]
    fn test_each_failed_sample_is_skipped_and_counted() {
        let monitor = PerformanceMonitor::new(MonitorSettings {
            history_size: 10,
            sampling_interval_ms: 10,
        });
        assert!(monitor.start_sampling(Box::new(FixedProbe::unavailable())));
        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.snapshot().failed_samples < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        monitor.stop_sampling();

        let snapshot = monitor.snapshot();
        assert!(snapshot.failed_samples >= 3);
        assert_eq!(snapshot.system_cpu, 0.0);
        monitor.reset();
        assert_eq!(monitor.snapshot().failed_samples, 0);
    }

    #[test]
    fn test_reset_keeps_sampler_running() {
        let monitor = PerformanceMonitor::new(MonitorSettings {
            history_size: 10,
            sampling_interval_ms: 10,
        });
        assert!(monitor.start_sampling(Box::new(FixedProbe::new(12.0, 1.0))));
        monitor.reset();
        assert!(monitor.is_sampling());
        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.snapshot().system_cpu != 12.0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(monitor.snapshot().system_cpu, 12.0);
    }
}
