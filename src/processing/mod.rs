//! Frame processing
//!
//! Load-dependent frame skipping and quality reduction between capture and
//! the recording/display consumers.

pub mod frame_processor;
pub mod resample;

pub use frame_processor::{quality_for_cpu, FrameProcessor, ProcessedFrame};
