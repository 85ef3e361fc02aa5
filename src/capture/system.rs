//! Process-scoped camera system handle
//!
//! Vendor SDKs usually expose one system object per process. Instead of a
//! global, the host calls [`SystemHandle::initialize`] once at startup and
//! hands clones to whichever subsystems need enumeration. The backend is
//! shut down exactly once, when the last clone is released.

use crate::capture::traits::{CameraDevice, CameraSystem};
use crate::utils::error::DeviceError;
use std::sync::Arc;

struct SystemInner {
    backend: Box<dyn CameraSystem>,
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        tracing::info!("Releasing camera system");
        self.backend.shutdown();
    }
}

/// Shared, reference-counted access to the camera backend
#[derive(Clone)]
pub struct SystemHandle {
    inner: Arc<SystemInner>,
}

impl SystemHandle {
    /// Take ownership of the backend for the rest of the process
    pub fn initialize(backend: impl CameraSystem + 'static) -> Self {
        tracing::info!("Camera system initialized");
        Self {
            inner: Arc::new(SystemInner {
                backend: Box::new(backend),
            }),
        }
    }

    /// Enumerate attached devices
    pub fn enumerate(&self) -> Result<Vec<Box<dyn CameraDevice>>, DeviceError> {
        self.inner.backend.enumerate()
    }

    /// Number of live handles sharing the backend
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Drop this handle; the backend shuts down if it was the last one
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedSystem;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_shutdown_runs_once_after_last_release() {
        let backend = SimulatedSystem::with_cameras(2);
        let shutdowns = backend.shutdown_counter();

        let handle = SystemHandle::initialize(backend);
        let second = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        assert_eq!(second.enumerate().unwrap().len(), 2);

        handle.release();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(second.ref_count(), 1);

        second.release();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
