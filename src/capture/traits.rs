//! Capture trait definitions
//!
//! Backend-agnostic capabilities a camera driver binding must provide.
//! Optional parameters are described by explicit access queries rather
//! than by probing for their existence.

use crate::capture::frame::PixelLayout;
use crate::utils::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity of a discovered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the enumeration order
    pub index: usize,

    /// Serial number reported by the device (or a placeholder)
    pub serial: String,

    /// Model name
    pub model: String,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether this resolution fits inside `max` on both axes
    pub fn fits_within(&self, max: Resolution) -> bool {
        self.width <= max.width && self.height <= max.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Bounds reported by a device for configuration requests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLimits {
    pub max_resolution: Resolution,
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
}

impl DeviceLimits {
    /// Clamp a requested frame rate into the supported range
    pub fn clamp_frame_rate(&self, frame_rate: f64) -> f64 {
        frame_rate.clamp(self.min_frame_rate, self.max_frame_rate)
    }
}

/// A tunable node on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterNode {
    /// Exposure time in microseconds
    ExposureTime,
    /// Gain in dB
    Gain,
    ExposureAuto,
    GainAuto,
    WhiteBalanceAuto,
    Gamma,
    BlackLevel,
}

impl ParameterNode {
    /// Whether the node holds an on/off auto mode rather than a number
    pub fn is_auto_mode(&self) -> bool {
        matches!(
            self,
            ParameterNode::ExposureAuto | ParameterNode::GainAuto | ParameterNode::WhiteBalanceAuto
        )
    }
}

/// Value stored in a parameter node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterValue {
    Float(f64),
    /// Auto mode: true = continuous, false = off
    Auto(bool),
}

impl ParameterValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Auto(_) => None,
        }
    }

    pub fn as_auto(&self) -> Option<bool> {
        match self {
            ParameterValue::Auto(v) => Some(*v),
            ParameterValue::Float(_) => None,
        }
    }
}

/// Read/write capability of a parameter node on the current device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccess {
    pub readable: bool,
    pub writable: bool,
}

impl NodeAccess {
    pub const UNSUPPORTED: NodeAccess = NodeAccess {
        readable: false,
        writable: false,
    };

    pub const READ_WRITE: NodeAccess = NodeAccess {
        readable: true,
        writable: true,
    };

    pub const READ_ONLY: NodeAccess = NodeAccess {
        readable: true,
        writable: false,
    };
}

/// Image handed back by a device
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
    /// The transfer was truncated; the buffer must not be used
    pub incomplete: bool,
}

/// Capability interface of a single imaging device
///
/// Implementations wrap a vendor SDK or OS capture API. Every call may fail
/// with a [`DeviceError`]; the owning session decides how that affects state.
pub trait CameraDevice: Send {
    /// Serial and model, available before initialization
    fn describe(&self) -> (String, String);

    fn init(&mut self) -> Result<(), DeviceError>;

    fn deinit(&mut self) -> Result<(), DeviceError>;

    fn is_initialized(&self) -> bool;

    /// Limits used to validate configuration requests
    fn limits(&self) -> DeviceLimits;

    /// Apply a resolution and frame rate (already validated and clamped)
    fn configure(&mut self, width: u32, height: u32, frame_rate: f64) -> Result<(), DeviceError>;

    fn begin_acquisition(&mut self) -> Result<(), DeviceError>;

    fn end_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Wait up to `timeout` for the next image; `Ok(None)` on timeout
    fn next_image(&mut self, timeout: Duration) -> Result<Option<RawImage>, DeviceError>;

    fn node_access(&self, node: ParameterNode) -> NodeAccess;

    fn read_node(&self, node: ParameterNode) -> Result<ParameterValue, DeviceError>;

    fn write_node(&mut self, node: ParameterNode, value: ParameterValue) -> Result<(), DeviceError>;
}

/// Device enumeration backend shared across the process
pub trait CameraSystem: Send + Sync {
    /// Enumerate attached devices; handles are returned uninitialized
    fn enumerate(&self) -> Result<Vec<Box<dyn CameraDevice>>, DeviceError>;

    /// Release backend resources; called once when the last handle drops
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_fits_within() {
        let max = Resolution::new(1920, 1080);
        assert!(Resolution::new(1280, 720).fits_within(max));
        assert!(Resolution::new(1920, 1080).fits_within(max));
        assert!(!Resolution::new(3840, 2160).fits_within(max));
        assert!(!Resolution::new(1921, 10).fits_within(max));
    }

    #[test]
    fn test_clamp_frame_rate() {
        let limits = DeviceLimits {
            max_resolution: Resolution::new(640, 480),
            min_frame_rate: 1.0,
            max_frame_rate: 60.0,
        };
        assert_eq!(limits.clamp_frame_rate(120.0), 60.0);
        assert_eq!(limits.clamp_frame_rate(0.5), 1.0);
        assert_eq!(limits.clamp_frame_rate(30.0), 30.0);
    }

    #[test]
    fn test_auto_nodes() {
        assert!(ParameterNode::GainAuto.is_auto_mode());
        assert!(!ParameterNode::Gamma.is_auto_mode());
        assert_eq!(ParameterValue::Auto(true).as_float(), None);
        assert_eq!(ParameterValue::Float(2.5).as_float(), Some(2.5));
    }
}
