//! camfleet - multi-camera capture, processing and recording.
//!
//! A fleet of cameras is polled by a cooperative capture loop; every frame
//! passes through a load-aware processor and is optionally queued to a
//! per-device recorder with its own encoder thread.
//!
//! ## Architecture
//!
//! - [`capture`]: camera capabilities, per-device sessions and the fleet
//! - [`monitor`]: system load sampling and per-device throughput
//! - [`processing`]: frame skipping and adaptive quality
//! - [`recorder`]: bounded queues feeding encoder workers
//! - [`pipeline`]: the orchestrator tying it together
//! - [`config`]: serde-backed settings with sensible defaults

pub mod capture;
pub mod config;
pub mod monitor;
pub mod pipeline;
pub mod processing;
pub mod recorder;
pub mod utils;

pub use config::AppConfig;
pub use pipeline::Orchestrator;
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// Honours `RUST_LOG`, defaulting to `camfleet=debug`. Calling it more than
/// once is harmless; later calls leave the first subscriber in place.
pub fn init_logging() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camfleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting camfleet v{}", env!("CARGO_PKG_VERSION"));
    }
}
