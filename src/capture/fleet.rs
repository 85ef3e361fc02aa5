//! Device fleet
//!
//! Discovers devices through the process-scoped [`SystemHandle`] and fans
//! bulk operations out to every session. A failing device never stops the
//! others: bulk operations report how many sessions succeeded.

use crate::capture::frame::Frame;
use crate::capture::session::{DeviceSession, DeviceState};
use crate::capture::system::SystemHandle;
use crate::capture::traits::{DeviceInfo, Resolution};
use std::collections::BTreeMap;
use std::time::Duration;

/// Owns every [`DeviceSession`], keyed by enumeration index
pub struct DeviceFleet {
    system: SystemHandle,
    sessions: BTreeMap<usize, DeviceSession>,
}

impl DeviceFleet {
    pub fn new(system: SystemHandle) -> Self {
        Self {
            system,
            sessions: BTreeMap::new(),
        }
    }

    /// List attached devices without connecting to them
    pub fn discover(&self) -> Vec<DeviceInfo> {
        match self.system.enumerate() {
            Ok(devices) => {
                if devices.is_empty() {
                    tracing::warn!("No cameras detected");
                }
                devices
                    .iter()
                    .enumerate()
                    .map(|(index, device)| {
                        let (serial, model) = device.describe();
                        DeviceInfo {
                            index,
                            serial: if serial.is_empty() {
                                format!("UNKNOWN_{index}")
                            } else {
                                serial
                            },
                            model,
                        }
                    })
                    .collect()
            }
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {}", e);
                Vec::new()
            }
        }
    }

    /// Replace all sessions with freshly connected ones
    ///
    /// Returns true if at least one device reached `Connected`. Devices that
    /// failed to initialize stay in the fleet in `Error`.
    pub fn connect_all(&mut self) -> bool {
        self.disconnect_all();

        let devices = match self.system.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!("Failed to enumerate cameras: {}", e);
                return false;
            }
        };
        if devices.is_empty() {
            tracing::warn!("No cameras detected");
            return false;
        }

        for (index, device) in devices.into_iter().enumerate() {
            let mut session = DeviceSession::new(index, device);
            if session.connect() {
                tracing::info!(
                    "Successfully connected to camera {} (SN: {})",
                    index,
                    session.info().serial
                );
            } else {
                tracing::error!("Failed to connect to camera {}", index);
            }
            self.sessions.insert(index, session);
        }

        self.sessions
            .values()
            .any(|s| s.state() == DeviceState::Connected)
    }

    pub fn configure_all(&mut self, resolution: Resolution, frame_rate: f64) -> usize {
        let ok = self
            .sessions
            .values_mut()
            .map(|s| s.configure(resolution, frame_rate))
            .filter(|ok| *ok)
            .count();
        tracing::info!("Configured {}/{} cameras", ok, self.sessions.len());
        ok
    }

    pub fn start_all_acquisition(&mut self) -> usize {
        let ok = self
            .sessions
            .values_mut()
            .map(|s| s.start_acquisition())
            .filter(|ok| *ok)
            .count();
        tracing::info!("Started acquisition on {}/{} cameras", ok, self.sessions.len());
        ok
    }

    pub fn stop_all_acquisition(&mut self) -> usize {
        let ok = self
            .sessions
            .values_mut()
            .map(|s| s.stop_acquisition())
            .filter(|ok| *ok)
            .count();
        tracing::info!("Stopped acquisition on {}/{} cameras", ok, self.sessions.len());
        ok
    }

    /// Stop everything, clean up and discard all sessions
    pub fn disconnect_all(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        self.stop_all_acquisition();
        for session in self.sessions.values_mut() {
            session.cleanup();
        }
        self.sessions.clear();
        tracing::info!("All cameras disconnected");
    }

    /// Pull one frame from a device, if it is acquiring
    pub fn next_frame(&mut self, index: usize, timeout: Duration) -> Option<Frame> {
        self.sessions.get_mut(&index)?.get_next_frame(timeout)
    }

    pub fn session(&self, index: usize) -> Option<&DeviceSession> {
        self.sessions.get(&index)
    }

    pub fn session_mut(&mut self, index: usize) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(&index)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.values()
    }

    /// Indices of sessions currently streaming, in ascending order
    pub fn acquiring_indices(&self) -> Vec<usize> {
        self.sessions
            .values()
            .filter(|s| s.is_acquiring())
            .map(|s| s.index())
            .collect()
    }

    pub fn is_any_acquiring(&self) -> bool {
        self.sessions.values().any(|s| s.is_acquiring())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn system(&self) -> &SystemHandle {
        &self.system
    }
}

impl Drop for DeviceFleet {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimulatedCameraConfig, SimulatedSystem};

    fn fleet(cameras: Vec<SimulatedCameraConfig>) -> DeviceFleet {
        DeviceFleet::new(SystemHandle::initialize(SimulatedSystem::new(cameras)))
    }

    #[test]
    fn test_discover_lists_devices() {
        let fleet = fleet(vec![
            SimulatedCameraConfig::new("A1"),
            SimulatedCameraConfig::new(""),
        ]);
        let found = fleet.discover();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].serial, "A1");
        assert_eq!(found[1].serial, "UNKNOWN_1");
        assert!(fleet.is_empty());
    }

    #[test]
    fn test_connect_all_with_no_devices() {
        let mut fleet = fleet(vec![]);
        assert!(!fleet.connect_all());
        assert!(fleet.is_empty());
    }

    #[test]
    fn test_partial_failures_are_counted_not_fatal() {
        let mut fleet = fleet(vec![
            SimulatedCameraConfig::new("OK-0"),
            SimulatedCameraConfig::new("BAD-INIT").failing_init(),
            SimulatedCameraConfig::new("BAD-START").failing_start(),
        ]);
        assert!(fleet.connect_all());
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.session(1).unwrap().state(), DeviceState::Error);

        assert_eq!(fleet.configure_all(Resolution::new(320, 240), 30.0), 2);
        assert_eq!(fleet.start_all_acquisition(), 1);
        assert_eq!(fleet.acquiring_indices(), vec![0]);
        assert_eq!(fleet.session(2).unwrap().state(), DeviceState::Error);

        assert_eq!(fleet.stop_all_acquisition(), 1);
        assert!(!fleet.is_any_acquiring());
    }

    #[test]
    fn test_connect_all_replaces_sessions() {
        let mut fleet = fleet(vec![SimulatedCameraConfig::new("X")]);
        assert!(fleet.connect_all());
        assert_eq!(fleet.start_all_acquisition(), 1);
        assert!(fleet.connect_all());
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet.session(0).unwrap().state(), DeviceState::Connected);
    }

    #[test]
    fn test_disconnect_all_discards_sessions() {
        let mut fleet = fleet(vec![
            SimulatedCameraConfig::new("A"),
            SimulatedCameraConfig::new("B"),
        ]);
        assert!(fleet.connect_all());
        fleet.start_all_acquisition();
        assert!(fleet.next_frame(1, Duration::from_millis(10)).is_some());
        fleet.disconnect_all();
        assert!(fleet.is_empty());
        assert!(fleet.next_frame(1, Duration::from_millis(10)).is_none());
    }
}
