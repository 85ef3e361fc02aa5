//! Simulated camera backend
//!
//! Software devices that generate a moving test pattern. Used to run the
//! pipeline without hardware and as the device double in tests. Faults can
//! be injected per device through [`SimulatedCameraConfig`].

use crate::capture::frame::PixelLayout;
use crate::capture::traits::{
    CameraDevice, CameraSystem, DeviceLimits, NodeAccess, ParameterNode, ParameterValue, RawImage,
    Resolution,
};
use crate::utils::error::DeviceError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Behaviour of one simulated device
#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub serial: String,
    pub model: String,
    pub limits: DeviceLimits,
    /// Resolution used until the device is configured
    pub initial_resolution: Resolution,
    pub layout: PixelLayout,
    /// Time between frames; zero delivers frames immediately
    pub frame_interval: Duration,
    /// Flag every Nth image as incomplete
    pub incomplete_every: Option<u64>,
    pub fail_init: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_configure: bool,
    /// Nodes the device does not expose at all
    pub unsupported_nodes: Vec<ParameterNode>,
    /// Nodes that can be read but not written
    pub read_only_nodes: Vec<ParameterNode>,
}

impl SimulatedCameraConfig {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: "Simulated Camera".to_string(),
            limits: DeviceLimits {
                max_resolution: Resolution::new(1920, 1080),
                min_frame_rate: 1.0,
                max_frame_rate: 120.0,
            },
            initial_resolution: Resolution::new(64, 48),
            layout: PixelLayout::Rgb8,
            frame_interval: Duration::ZERO,
            incomplete_every: None,
            fail_init: false,
            fail_start: false,
            fail_stop: false,
            fail_configure: false,
            unsupported_nodes: Vec::new(),
            read_only_nodes: Vec::new(),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.initial_resolution = Resolution::new(width, height);
        self
    }

    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_incomplete_every(mut self, n: u64) -> Self {
        self.incomplete_every = Some(n.max(1));
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn without_node(mut self, node: ParameterNode) -> Self {
        self.unsupported_nodes.push(node);
        self
    }

    pub fn read_only_node(mut self, node: ParameterNode) -> Self {
        self.read_only_nodes.push(node);
        self
    }
}

/// A software camera producing a gradient that shifts every frame
pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    initialized: bool,
    acquiring: bool,
    resolution: Resolution,
    frame_rate: f64,
    frame_number: u64,
    next_due: Option<Instant>,
    nodes: HashMap<ParameterNode, ParameterValue>,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ParameterNode::ExposureTime, ParameterValue::Float(10_000.0));
        nodes.insert(ParameterNode::Gain, ParameterValue::Float(0.0));
        nodes.insert(ParameterNode::ExposureAuto, ParameterValue::Auto(true));
        nodes.insert(ParameterNode::GainAuto, ParameterValue::Auto(true));
        nodes.insert(ParameterNode::WhiteBalanceAuto, ParameterValue::Auto(true));
        nodes.insert(ParameterNode::Gamma, ParameterValue::Float(1.0));
        nodes.insert(ParameterNode::BlackLevel, ParameterValue::Float(0.0));
        for node in &config.unsupported_nodes {
            nodes.remove(node);
        }

        Self {
            resolution: config.initial_resolution,
            frame_rate: 30.0,
            config,
            initialized: false,
            acquiring: false,
            frame_number: 0,
            next_due: None,
            nodes,
        }
    }

    fn render(&self) -> Vec<u8> {
        let Resolution { width, height } = self.resolution;
        let channels = self.config.layout.channels();
        let seed = self.config.serial.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        let shift = self.frame_number as usize;

        let mut data = Vec::with_capacity(self.config.layout.buffer_size(width, height));
        for y in 0..height as usize {
            for x in 0..width as usize {
                let base = (x + y + shift) as u8;
                for c in 0..channels {
                    data.push(base.wrapping_add(seed).wrapping_add((c * 85) as u8));
                }
            }
        }
        data
    }

    fn require_init(&self) -> Result<(), DeviceError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceError::Other(format!("{} is not initialized", self.config.serial)))
        }
    }

    /// Manual exposure/gain writes are rejected while the auto mode runs
    fn auto_mode_for(node: ParameterNode) -> Option<ParameterNode> {
        match node {
            ParameterNode::ExposureTime => Some(ParameterNode::ExposureAuto),
            ParameterNode::Gain => Some(ParameterNode::GainAuto),
            _ => None,
        }
    }
}

impl CameraDevice for SimulatedCamera {
    fn describe(&self) -> (String, String) {
        (self.config.serial.clone(), self.config.model.clone())
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        if self.config.fail_init {
            return Err(DeviceError::Init(format!(
                "simulated init failure on {}",
                self.config.serial
            )));
        }
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), DeviceError> {
        self.acquiring = false;
        self.initialized = false;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn configure(&mut self, width: u32, height: u32, frame_rate: f64) -> Result<(), DeviceError> {
        self.require_init()?;
        if self.config.fail_configure {
            return Err(DeviceError::Other("simulated configure failure".to_string()));
        }
        self.resolution = Resolution::new(width, height);
        self.frame_rate = frame_rate;
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        self.require_init()?;
        if self.config.fail_start {
            return Err(DeviceError::Acquisition("simulated stream start failure".to_string()));
        }
        self.acquiring = true;
        self.next_due = Some(Instant::now());
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        if self.config.fail_stop {
            return Err(DeviceError::Acquisition("simulated stream stop failure".to_string()));
        }
        self.acquiring = false;
        self.next_due = None;
        Ok(())
    }

    fn next_image(&mut self, timeout: Duration) -> Result<Option<RawImage>, DeviceError> {
        if !self.acquiring {
            return Err(DeviceError::Acquisition("stream not started".to_string()));
        }

        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                std::thread::sleep(wait);
            }
            self.next_due = Some(due.max(now) + self.config.frame_interval);
        }

        self.frame_number += 1;
        let incomplete = self
            .config
            .incomplete_every
            .map(|n| self.frame_number % n == 0)
            .unwrap_or(false);

        Ok(Some(RawImage {
            width: self.resolution.width,
            height: self.resolution.height,
            layout: self.config.layout,
            data: self.render(),
            incomplete,
        }))
    }

    fn node_access(&self, node: ParameterNode) -> NodeAccess {
        if !self.nodes.contains_key(&node) {
            NodeAccess::UNSUPPORTED
        } else if self.config.read_only_nodes.contains(&node) {
            NodeAccess::READ_ONLY
        } else {
            NodeAccess::READ_WRITE
        }
    }

    fn read_node(&self, node: ParameterNode) -> Result<ParameterValue, DeviceError> {
        self.require_init()?;
        self.nodes
            .get(&node)
            .copied()
            .ok_or_else(|| DeviceError::Parameter(format!("{node:?} not available")))
    }

    fn write_node(&mut self, node: ParameterNode, value: ParameterValue) -> Result<(), DeviceError> {
        self.require_init()?;
        if !self.node_access(node).writable {
            return Err(DeviceError::Parameter(format!("{node:?} is not writable")));
        }
        if value.as_auto().is_some() != node.is_auto_mode() {
            return Err(DeviceError::Parameter(format!("wrong value type for {node:?}")));
        }
        if let Some(auto) = Self::auto_mode_for(node) {
            if self.nodes.get(&auto) == Some(&ParameterValue::Auto(true)) {
                return Err(DeviceError::Parameter(format!(
                    "{node:?} is locked while {auto:?} is on"
                )));
            }
        }
        self.nodes.insert(node, value);
        Ok(())
    }
}

/// Enumeration backend over a fixed set of simulated devices
pub struct SimulatedSystem {
    cameras: Vec<SimulatedCameraConfig>,
    shutdowns: Arc<AtomicUsize>,
}

impl SimulatedSystem {
    pub fn new(cameras: Vec<SimulatedCameraConfig>) -> Self {
        Self {
            cameras,
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `count` healthy devices with serials SIM-0, SIM-1, ...
    pub fn with_cameras(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| SimulatedCameraConfig::new(format!("SIM-{i}")))
                .collect(),
        )
    }

    /// Counter of how many times the backend has been shut down
    pub fn shutdown_counter(&self) -> Arc<AtomicUsize> {
        self.shutdowns.clone()
    }
}

impl CameraSystem for SimulatedSystem {
    fn enumerate(&self) -> Result<Vec<Box<dyn CameraDevice>>, DeviceError> {
        Ok(self
            .cameras
            .iter()
            .cloned()
            .map(|config| Box::new(SimulatedCamera::new(config)) as Box<dyn CameraDevice>)
            .collect())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Simulated camera system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_changes_between_frames() {
        let mut camera = SimulatedCamera::new(SimulatedCameraConfig::new("A").with_resolution(8, 4));
        camera.init().unwrap();
        camera.begin_acquisition().unwrap();
        let first = camera.next_image(Duration::from_millis(10)).unwrap().unwrap();
        let second = camera.next_image(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first.data.len(), 8 * 4 * 3);
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn test_times_out_before_next_frame() {
        let mut camera = SimulatedCamera::new(
            SimulatedCameraConfig::new("B").with_frame_interval(Duration::from_secs(10)),
        );
        camera.init().unwrap();
        camera.begin_acquisition().unwrap();
        assert!(camera.next_image(Duration::from_millis(5)).unwrap().is_some());
        assert!(camera.next_image(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn test_manual_gain_locked_by_auto() {
        let mut camera = SimulatedCamera::new(SimulatedCameraConfig::new("C"));
        camera.init().unwrap();
        assert!(camera.write_node(ParameterNode::Gain, ParameterValue::Float(3.0)).is_err());
        camera
            .write_node(ParameterNode::GainAuto, ParameterValue::Auto(false))
            .unwrap();
        camera.write_node(ParameterNode::Gain, ParameterValue::Float(3.0)).unwrap();
    }
}
