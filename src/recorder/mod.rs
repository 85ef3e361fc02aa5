//! Recording system module
//!
//! Per-device recordings, each with:
//! - a bounded frame queue that never blocks the capture loop
//! - a dedicated worker thread writing frames in FIFO order
//! - an encoder opened through an [`EncoderFactory`]

pub mod coordinator;
pub mod encoder;
pub mod ffmpeg;
pub mod memory;
pub mod state;
mod worker;

pub use coordinator::Recorder;
pub use encoder::{EncoderFactory, VideoEncoder};
pub use ffmpeg::FfmpegEncoderFactory;
pub use memory::{MemoryEncoderFactory, RecordedVideo};
pub use state::{recording_path, RecordingEvent, RecordingStatus};
