//! Video encoder capability
//!
//! The recorder opens one [`VideoEncoder`] per recording through an
//! [`EncoderFactory`]; the factory decides the container and how frames
//! reach disk.

use crate::capture::frame::{Frame, PixelLayout};
use crate::capture::traits::Resolution;
use crate::config::PipelineConfig;
use crate::utils::error::EncoderError;
use std::path::Path;

/// An open video file accepting frames of one fixed size
pub trait VideoEncoder: Send {
    /// Append one frame; it is already in the factory's pixel layout
    fn write(&mut self, frame: &Frame) -> Result<(), EncoderError>;

    /// Flush and finalize the container. Further writes fail.
    fn close(&mut self) -> Result<(), EncoderError>;
}

/// Opens encoders for new recordings
pub trait EncoderFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        config: &PipelineConfig,
        frame_size: Resolution,
    ) -> Result<Box<dyn VideoEncoder>, EncoderError>;

    /// Layout frames are converted to before `write`
    fn pixel_layout(&self) -> PixelLayout {
        PixelLayout::Bgr8
    }
}

/// Reject frames whose dimensions differ from what the encoder was opened with
pub(crate) fn check_frame_size(expected: Resolution, frame: &Frame) -> Result<(), EncoderError> {
    if frame.size() == expected {
        return Ok(());
    }
    Err(EncoderError::FrameSize {
        width: expected.width,
        height: expected.height,
        actual_width: frame.width(),
        actual_height: frame.height(),
    })
}
