//! Per-frame load shedding
//!
//! Decides whether a frame is skipped under load and, with adaptive quality
//! on, trades resolution detail for CPU by resampling the frame down and
//! back up to its original size.

use crate::capture::frame::Frame;
use crate::config::ProcessorSettings;
use crate::monitor::performance::PerformanceMonitor;
use crate::processing::resample::resize_bilinear;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A device below this fraction of its target rate is considered lagging
const LAGGING_FPS_RATIO: f64 = 0.8;

/// Outcome of [`FrameProcessor::process_frame`]
#[derive(Debug, Clone)]
pub enum ProcessedFrame {
    Kept(Frame),
    Skipped,
}

impl ProcessedFrame {
    pub fn was_skipped(&self) -> bool {
        matches!(self, ProcessedFrame::Skipped)
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            ProcessedFrame::Kept(frame) => Some(frame),
            ProcessedFrame::Skipped => None,
        }
    }

    pub fn into_frame(self) -> Option<Frame> {
        match self {
            ProcessedFrame::Kept(frame) => Some(frame),
            ProcessedFrame::Skipped => None,
        }
    }
}

/// Quality tier for a given system CPU load
pub fn quality_for_cpu(cpu_percent: f64) -> f64 {
    if cpu_percent > 90.0 {
        0.5
    } else if cpu_percent > 70.0 {
        0.75
    } else {
        1.0
    }
}

pub struct FrameProcessor {
    monitor: Arc<PerformanceMonitor>,
    settings: ProcessorSettings,
    skip_counters: HashMap<usize, u64>,
    quality_level: f64,
}

impl FrameProcessor {
    pub fn new(monitor: Arc<PerformanceMonitor>, settings: ProcessorSettings) -> Self {
        Self {
            monitor,
            settings,
            skip_counters: HashMap::new(),
            quality_level: 1.0,
        }
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ProcessorSettings) {
        tracing::debug!(
            "Processor settings: adaptive_quality={}, frame_skipping={}, cpu_limit={} ({}%)",
            settings.adaptive_quality,
            settings.frame_skipping,
            settings.cpu_limit_enabled,
            settings.cpu_limit_threshold
        );
        self.settings = settings;
    }

    /// Quality tier applied to the most recent kept frame
    pub fn quality_level(&self) -> f64 {
        self.quality_level
    }

    pub fn reset_skip_counters(&mut self) {
        self.skip_counters.clear();
    }

    /// Skip or transform one frame from `device_index`
    pub fn process_frame(
        &mut self,
        device_index: usize,
        frame: Frame,
        target_fps: f64,
    ) -> ProcessedFrame {
        let started = Instant::now();

        if self.settings.frame_skipping && self.should_skip(device_index, target_fps) {
            self.monitor.record_dropped_frame(device_index);
            return ProcessedFrame::Skipped;
        }

        let frame = if self.settings.adaptive_quality {
            self.apply_adaptive_quality(frame)
        } else {
            frame
        };

        self.monitor
            .record_frame_processed(device_index, started.elapsed());
        ProcessedFrame::Kept(frame)
    }

    fn should_skip(&mut self, device_index: usize, target_fps: f64) -> bool {
        let metrics = self.monitor.snapshot();

        let cpu_overloaded = self.settings.cpu_limit_enabled
            && metrics.system_cpu > self.settings.cpu_limit_threshold;
        let lagging = metrics.device_fps(device_index) < target_fps * LAGGING_FPS_RATIO;

        if !(cpu_overloaded || lagging) {
            return false;
        }

        // Shed every other candidate so a lagging device still makes progress
        let counter = self.skip_counters.entry(device_index).or_insert(0);
        let skip = *counter % 2 == 0;
        *counter += 1;
        skip
    }

    fn apply_adaptive_quality(&mut self, frame: Frame) -> Frame {
        let quality = quality_for_cpu(self.monitor.snapshot().system_cpu);
        self.quality_level = quality;
        if quality >= 1.0 {
            return frame;
        }

        let (width, height) = (frame.width(), frame.height());
        let small_width = (width as f64 * quality) as u32;
        let small_height = (height as f64 * quality) as u32;
        if small_width == 0 || small_height == 0 {
            return frame;
        }

        let channels = frame.channels();
        let small = resize_bilinear(frame.data(), width, height, channels, small_width, small_height);
        let restored = resize_bilinear(&small, small_width, small_height, channels, width, height);

        match frame.with_pixels(restored) {
            Some(degraded) => degraded,
            None => frame,
        }
    }
}
