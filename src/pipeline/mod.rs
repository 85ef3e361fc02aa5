//! Capture-process-record pipeline driver

pub mod orchestrator;
pub mod snapshot;

pub use orchestrator::{DisplaySink, NullDisplay, Orchestrator, TickReport};
pub use snapshot::{snapshot_path, write_png};
