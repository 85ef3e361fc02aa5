//! Device session state machine
//!
//! One [`DeviceSession`] owns one camera handle. Legal transitions:
//!
//! ```text
//! Disconnected -> Connected -> Acquiring -> Connected -> Disconnected
//!        \____________\____________\______-> Error --cleanup--> Disconnected
//! ```
//!
//! Every operation reports success as a `bool` or an `Option`; device
//! failures are logged, remembered in `last_error`, and never propagate.

use crate::capture::frame::Frame;
use crate::capture::traits::{
    CameraDevice, DeviceInfo, ParameterNode, ParameterValue, Resolution,
};
use crate::utils::error::{ConfigurationError, DeviceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a device session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connected,
    Acquiring,
    Error,
}

/// Parameter defaults restored by [`DeviceSession::reset_parameters`]
pub const DEFAULT_EXPOSURE_US: f64 = 10_000.0;
pub const DEFAULT_GAIN_DB: f64 = 0.0;
pub const DEFAULT_GAMMA: f64 = 1.0;
pub const DEFAULT_BLACK_LEVEL: f64 = 0.0;

/// Point-in-time description of a session for display collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub info: DeviceInfo,
    pub state: DeviceState,
    pub last_error: Option<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
    pub exposure_time_us: Option<f64>,
    pub gain_db: Option<f64>,
    pub auto_exposure: Option<bool>,
}

/// Owns one imaging device and its lifecycle
pub struct DeviceSession {
    info: DeviceInfo,
    device: Box<dyn CameraDevice>,
    state: DeviceState,
    last_error: Option<String>,
    resolution: Option<Resolution>,
    frame_rate: Option<f64>,
}

impl DeviceSession {
    /// Wrap an uninitialized device handle
    pub fn new(index: usize, device: Box<dyn CameraDevice>) -> Self {
        let (mut serial, model) = device.describe();
        if serial.is_empty() {
            serial = format!("UNKNOWN_{index}");
        }
        Self {
            info: DeviceInfo {
                index,
                serial,
                model,
            },
            device,
            state: DeviceState::Disconnected,
            last_error: None,
            resolution: None,
            frame_rate: None,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_acquiring(&self) -> bool {
        self.state == DeviceState::Acquiring
    }

    /// Resolution applied by the last successful `configure`
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Frame rate applied by the last successful `configure` (after clamping)
    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn fail(&mut self, error: DeviceError) {
        tracing::error!("[Cam {}] {}", self.info.index, error);
        self.last_error = Some(error.to_string());
        self.state = DeviceState::Error;
    }

    /// Initialize the device
    ///
    /// Returns true when the session ends up connected. A session in
    /// `Error` must be cleaned up first.
    pub fn connect(&mut self) -> bool {
        match self.state {
            DeviceState::Connected | DeviceState::Acquiring => true,
            DeviceState::Error => {
                tracing::warn!("[Cam {}] Cleanup required before reconnecting", self.info.index);
                false
            }
            DeviceState::Disconnected => match self.device.init() {
                Ok(()) => {
                    self.state = DeviceState::Connected;
                    tracing::info!(
                        "[Cam {}] Connected (SN: {}, model: {})",
                        self.info.index,
                        self.info.serial,
                        self.info.model
                    );
                    true
                }
                Err(e) => {
                    self.fail(e);
                    false
                }
            },
        }
    }

    /// Check a configuration request against state and device limits
    ///
    /// Returns the resolution and the clamped frame rate to apply.
    pub fn validate_configuration(
        &self,
        resolution: Resolution,
        frame_rate: f64,
    ) -> Result<(Resolution, f64), ConfigurationError> {
        if self.state != DeviceState::Connected {
            return Err(ConfigurationError::WrongState(format!("{:?}", self.state)));
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Err(ConfigurationError::EmptyResolution);
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(ConfigurationError::InvalidFrameRate(frame_rate));
        }

        let limits = self.device.limits();
        if !resolution.fits_within(limits.max_resolution) {
            return Err(ConfigurationError::ResolutionTooLarge {
                width: resolution.width,
                height: resolution.height,
                max_width: limits.max_resolution.width,
                max_height: limits.max_resolution.height,
            });
        }

        Ok((resolution, limits.clamp_frame_rate(frame_rate)))
    }

    /// Apply resolution and frame rate; only valid while `Connected`
    pub fn configure(&mut self, resolution: Resolution, frame_rate: f64) -> bool {
        let (resolution, frame_rate) = match self.validate_configuration(resolution, frame_rate) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("[Cam {}] Cannot configure: {}", self.info.index, e);
                return false;
            }
        };

        match self
            .device
            .configure(resolution.width, resolution.height, frame_rate)
        {
            Ok(()) => {
                self.resolution = Some(resolution);
                self.frame_rate = Some(frame_rate);
                tracing::info!(
                    "[Cam {}] Configured to {} @ {}fps",
                    self.info.index,
                    resolution,
                    frame_rate
                );
                true
            }
            Err(e) => {
                tracing::error!("[Cam {}] Configuration failed: {}", self.info.index, e);
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    pub fn start_acquisition(&mut self) -> bool {
        if self.state != DeviceState::Connected {
            tracing::warn!(
                "[Cam {}] Cannot start acquisition from {:?}",
                self.info.index,
                self.state
            );
            return false;
        }

        match self.device.begin_acquisition() {
            Ok(()) => {
                self.state = DeviceState::Acquiring;
                tracing::info!("[Cam {}] Acquisition started", self.info.index);
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    /// Stop the stream; true if already stopped
    pub fn stop_acquisition(&mut self) -> bool {
        match self.state {
            DeviceState::Connected => true,
            DeviceState::Acquiring => match self.device.end_acquisition() {
                Ok(()) => {
                    self.state = DeviceState::Connected;
                    tracing::info!("[Cam {}] Acquisition stopped", self.info.index);
                    true
                }
                Err(e) => {
                    self.fail(e);
                    false
                }
            },
            DeviceState::Disconnected | DeviceState::Error => false,
        }
    }

    /// Pull the next frame, waiting at most `timeout`
    ///
    /// Timeouts, truncated transfers and capture faults are all ordinary
    /// misses; the caller simply tries again on its next tick.
    pub fn get_next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        if self.state != DeviceState::Acquiring {
            return None;
        }

        match self.device.next_image(timeout) {
            Ok(Some(raw)) if raw.incomplete => {
                tracing::debug!("[Cam {}] Incomplete image dropped", self.info.index);
                None
            }
            Ok(Some(raw)) => {
                let frame = Frame::from_raw(self.info.index, raw);
                if frame.is_none() {
                    tracing::debug!("[Cam {}] Image buffer size mismatch", self.info.index);
                }
                frame
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("[Cam {}] Capture miss: {}", self.info.index, e);
                None
            }
        }
    }

    fn has_device_link(&self) -> bool {
        matches!(self.state, DeviceState::Connected | DeviceState::Acquiring)
    }

    fn read_param(&self, node: ParameterNode) -> Option<ParameterValue> {
        if !self.has_device_link() || !self.device.node_access(node).readable {
            return None;
        }
        match self.device.read_node(node) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("[Cam {}] Failed to read {:?}: {}", self.info.index, node, e);
                None
            }
        }
    }

    fn write_param(&mut self, node: ParameterNode, value: ParameterValue) -> bool {
        if !self.has_device_link() || !self.device.node_access(node).writable {
            return false;
        }
        match self.device.write_node(node, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[Cam {}] Failed to set {:?}: {}", self.info.index, node, e);
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Write a manual value after switching its auto mode off
    fn set_manual(&mut self, auto: ParameterNode, node: ParameterNode, value: f64) -> bool {
        if !self.has_device_link() || !self.device.node_access(node).writable {
            return false;
        }
        if self.device.node_access(auto).writable
            && !self.write_param(auto, ParameterValue::Auto(false))
        {
            return false;
        }
        self.write_param(node, ParameterValue::Float(value))
    }

    pub fn exposure_time(&self) -> Option<f64> {
        self.read_param(ParameterNode::ExposureTime)?.as_float()
    }

    /// Set exposure in microseconds; turns auto exposure off
    pub fn set_exposure_time(&mut self, exposure_us: f64) -> bool {
        self.set_manual(ParameterNode::ExposureAuto, ParameterNode::ExposureTime, exposure_us)
    }

    pub fn gain(&self) -> Option<f64> {
        self.read_param(ParameterNode::Gain)?.as_float()
    }

    /// Set gain in dB; turns auto gain off
    pub fn set_gain(&mut self, gain_db: f64) -> bool {
        self.set_manual(ParameterNode::GainAuto, ParameterNode::Gain, gain_db)
    }

    pub fn auto_exposure(&self) -> Option<bool> {
        self.read_param(ParameterNode::ExposureAuto)?.as_auto()
    }

    pub fn set_auto_exposure(&mut self, enabled: bool) -> bool {
        self.write_param(ParameterNode::ExposureAuto, ParameterValue::Auto(enabled))
    }

    pub fn auto_gain(&self) -> Option<bool> {
        self.read_param(ParameterNode::GainAuto)?.as_auto()
    }

    pub fn set_auto_gain(&mut self, enabled: bool) -> bool {
        self.write_param(ParameterNode::GainAuto, ParameterValue::Auto(enabled))
    }

    pub fn auto_white_balance(&self) -> Option<bool> {
        self.read_param(ParameterNode::WhiteBalanceAuto)?.as_auto()
    }

    pub fn set_auto_white_balance(&mut self, enabled: bool) -> bool {
        self.write_param(ParameterNode::WhiteBalanceAuto, ParameterValue::Auto(enabled))
    }

    pub fn gamma(&self) -> Option<f64> {
        self.read_param(ParameterNode::Gamma)?.as_float()
    }

    pub fn set_gamma(&mut self, gamma: f64) -> bool {
        self.write_param(ParameterNode::Gamma, ParameterValue::Float(gamma))
    }

    pub fn black_level(&self) -> Option<f64> {
        self.read_param(ParameterNode::BlackLevel)?.as_float()
    }

    pub fn set_black_level(&mut self, level: f64) -> bool {
        self.write_param(ParameterNode::BlackLevel, ParameterValue::Float(level))
    }

    /// Restore default parameters, ending with auto exposure and gain on
    ///
    /// Returns how many writes succeeded; unsupported nodes are skipped.
    pub fn reset_parameters(&mut self) -> usize {
        [
            self.set_exposure_time(DEFAULT_EXPOSURE_US),
            self.set_gain(DEFAULT_GAIN_DB),
            self.set_gamma(DEFAULT_GAMMA),
            self.set_black_level(DEFAULT_BLACK_LEVEL),
            self.set_auto_exposure(true),
            self.set_auto_gain(true),
        ]
        .into_iter()
        .filter(|ok| *ok)
        .count()
    }

    pub fn details(&self) -> DeviceDetails {
        DeviceDetails {
            info: self.info.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
            resolution: self.resolution,
            frame_rate: self.frame_rate,
            exposure_time_us: self.exposure_time(),
            gain_db: self.gain(),
            auto_exposure: self.auto_exposure(),
        }
    }

    /// Stop, deinitialize and return to `Disconnected`; safe to repeat
    pub fn cleanup(&mut self) {
        if self.state == DeviceState::Acquiring {
            if let Err(e) = self.device.end_acquisition() {
                tracing::warn!("[Cam {}] Error stopping stream during cleanup: {}", self.info.index, e);
            }
        }
        if self.device.is_initialized() {
            if let Err(e) = self.device.deinit() {
                tracing::warn!("[Cam {}] Error deinitializing: {}", self.info.index, e);
            }
        }
        if self.state != DeviceState::Disconnected {
            tracing::info!("[Cam {}] Cleaned up", self.info.index);
        }
        self.state = DeviceState::Disconnected;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
