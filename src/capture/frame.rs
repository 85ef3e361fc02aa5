//! Frame types
//!
//! A [`Frame`] is an immutable pixel buffer tagged with the device it came
//! from and its capture time. Cloning a frame never gives anyone write
//! access to the pixels; transformations always build a new buffer.

use crate::capture::traits::{RawImage, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Memory layout of frame pixels (8 bits per channel, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Single-channel grayscale
    Mono8,
    Rgb8,
    Bgr8,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Mono8 => 1,
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
        }
    }

    /// Buffer length needed for a frame of this layout
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels()
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelLayout::Mono8 => write!(f, "Mono8"),
            PixelLayout::Rgb8 => write!(f, "RGB8"),
            PixelLayout::Bgr8 => write!(f, "BGR8"),
        }
    }
}

/// A captured image
#[derive(Clone)]
pub struct Frame {
    device_index: usize,
    captured_at: DateTime<Utc>,
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Arc<[u8]>,
}

impl Frame {
    /// Build a frame, returning `None` if `data` does not match the dimensions
    pub fn new(
        device_index: usize,
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Option<Self> {
        Self::with_timestamp(device_index, Utc::now(), width, height, layout, data)
    }

    pub fn with_timestamp(
        device_index: usize,
        captured_at: DateTime<Utc>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != layout.buffer_size(width, height) {
            return None;
        }
        Some(Self {
            device_index,
            captured_at,
            width,
            height,
            layout,
            data: data.into(),
        })
    }

    /// Convert a device image; incomplete or mis-sized buffers yield `None`
    pub fn from_raw(device_index: usize, raw: RawImage) -> Option<Self> {
        if raw.incomplete {
            return None;
        }
        Self::new(device_index, raw.width, raw.height, raw.layout, raw.data)
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }


    /// Same metadata, new pixels (must be the same size and layout)
    pub(crate) fn with_pixels(&self, data: Vec<u8>) -> Option<Self> {
        Self::with_timestamp(
            self.device_index,
            self.captured_at,
            self.width,
            self.height,
            self.layout,
            data,
        )
    }

    /// Convert to another pixel layout
    pub fn to_layout(&self, target: PixelLayout) -> Frame {
        if target == self.layout {
            return self.clone();
        }

        let pixels = self.width as usize * self.height as usize;
        let mut out = Vec::with_capacity(target.buffer_size(self.width, self.height));

        match (self.layout, target) {
            (PixelLayout::Rgb8, PixelLayout::Bgr8) | (PixelLayout::Bgr8, PixelLayout::Rgb8) => {
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            (PixelLayout::Mono8, _) => {
                for &v in self.data.iter() {
                    out.extend_from_slice(&[v, v, v]);
                }
            }
            (source, PixelLayout::Mono8) => {
                for px in self.data.chunks_exact(3) {
                    let (r, g, b) = match source {
                        PixelLayout::Bgr8 => (px[2], px[1], px[0]),
                        _ => (px[0], px[1], px[2]),
                    };
                    out.push(luma(r, g, b));
                }
            }
            _ => unreachable!("identical layouts handled above"),
        }

        debug_assert_eq!(out.len(), pixels * target.channels());

        Frame {
            device_index: self.device_index,
            captured_at: self.captured_at,
            width: self.width,
            height: self.height,
            layout: target,
            data: out.into(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("device_index", &self.device_index)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ITU-R BT.601 weights
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}
