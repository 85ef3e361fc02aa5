//! Performance monitoring
//!
//! System load sampling plus per-device throughput statistics.

pub mod performance;
pub mod probe;
pub mod window;

pub use performance::{DeviceMetricsSnapshot, MetricsEvent, MetricsSnapshot, PerformanceMonitor};
pub use probe::{FixedProbe, ProcProbe, SystemProbe, SystemSample};
pub use window::MetricsWindow;
