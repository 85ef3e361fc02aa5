//! PNG snapshots of single frames

use crate::capture::frame::{Frame, PixelLayout};
use crate::utils::error::{AppError, AppResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// `snapshot_cam<idx>_<unix seconds>.png` inside `dir`
pub fn snapshot_path(dir: &Path, device_index: usize, unix_secs: i64) -> PathBuf {
    dir.join(format!("snapshot_cam{}_{}.png", device_index, unix_secs))
}

/// Write a frame as an 8-bit PNG (grayscale or RGB)
pub fn write_png(path: &Path, frame: &Frame) -> AppResult<()> {
    let (color, frame) = match frame.layout() {
        PixelLayout::Mono8 => (png::ColorType::Grayscale, frame.clone()),
        PixelLayout::Rgb8 => (png::ColorType::Rgb, frame.clone()),
        PixelLayout::Bgr8 => (png::ColorType::Rgb, frame.to_layout(PixelLayout::Rgb8)),
    };

    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width(), frame.height());
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| AppError::Snapshot(format!("PNG header error: {}", e)))?;
    writer
        .write_image_data(frame.data())
        .map_err(|e| AppError::Snapshot(format!("PNG write error: {}", e)))?;
    writer
        .finish()
        .map_err(|e| AppError::Snapshot(format!("PNG finish error: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_png(path: &Path) -> (png::ColorType, u32, u32, Vec<u8>) {
        let decoder = png::Decoder::new(File::open(path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        buf.truncate(info.buffer_size());
        (info.color_type, info.width, info.height, buf)
    }

    #[test]
    fn test_bgr_frame_is_stored_as_rgb() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path(), 3, 1_700_000_000);
        assert!(path.ends_with("snapshot_cam3_1700000000.png"));

        let frame = Frame::new(3, 2, 1, PixelLayout::Bgr8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        write_png(&path, &frame).unwrap();

        let (color, width, height, data) = read_png(&path);
        assert_eq!(color, png::ColorType::Rgb);
        assert_eq!((width, height), (2, 1));
        assert_eq!(data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_mono_frame_is_grayscale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mono.png");
        let frame = Frame::new(0, 2, 2, PixelLayout::Mono8, vec![0, 64, 128, 255]).unwrap();
        write_png(&path, &frame).unwrap();

        let (color, _, _, data) = read_png(&path);
        assert_eq!(color, png::ColorType::Grayscale);
        assert_eq!(data, vec![0, 64, 128, 255]);
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let frame = Frame::new(0, 1, 1, PixelLayout::Mono8, vec![0]).unwrap();
        let result = write_png(&dir.path().join("missing").join("x.png"), &frame);
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
