//! Camera capture
//!
//! Device capability traits, per-device sessions, the fleet that owns them,
//! and the available backends (simulated always, webcam behind a feature).

pub mod fleet;
pub mod frame;
pub mod session;
pub mod simulated;
pub mod system;
pub mod traits;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use fleet::DeviceFleet;
pub use frame::{Frame, PixelLayout};
pub use session::{DeviceDetails, DeviceSession, DeviceState};
pub use system::SystemHandle;
pub use traits::{
    CameraDevice, CameraSystem, DeviceInfo, DeviceLimits, NodeAccess, ParameterNode,
    ParameterValue, RawImage, Resolution,
};
