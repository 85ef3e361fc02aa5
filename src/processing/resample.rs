//! Bilinear resampling of interleaved 8-bit images

/// Resize an interleaved `channels`-per-pixel image with bilinear
/// interpolation, sampling at pixel centres
pub fn resize_bilinear(
    src: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    new_width: u32,
    new_height: u32,
) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = (new_width as usize, new_height as usize);
    let mut out = vec![0u8; nw * nh * channels];
    if w == 0 || h == 0 || nw == 0 || nh == 0 || src.len() < w * h * channels {
        return out;
    }

    let scale_x = w as f32 / nw as f32;
    let scale_y = h as f32 / nh as f32;
    let x_taps: Vec<(usize, usize, f32)> = (0..nw).map(|x| taps(x, w, scale_x)).collect();

    for y in 0..nh {
        let (y0, y1, fy) = taps(y, h, scale_y);
        let row0 = &src[y0 * w * channels..(y0 + 1) * w * channels];
        let row1 = &src[y1 * w * channels..(y1 + 1) * w * channels];
        let dst_row = &mut out[y * nw * channels..(y + 1) * nw * channels];

        for (x, &(x0, x1, fx)) in x_taps.iter().enumerate() {
            for c in 0..channels {
                let p00 = row0[x0 * channels + c] as f32;
                let p01 = row0[x1 * channels + c] as f32;
                let p10 = row1[x0 * channels + c] as f32;
                let p11 = row1[x1 * channels + c] as f32;
                let top = p00 + (p01 - p00) * fx;
                let bottom = p10 + (p11 - p10) * fx;
                let value = top + (bottom - top) * fy;
                dst_row[x * channels + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

fn taps(dst: usize, src_len: usize, scale: f32) -> (usize, usize, f32) {
    let pos = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (pos.floor() as usize).min(src_len - 1);
    let i1 = (i0 + 1).min(src_len - 1);
    (i0, i1, pos - i0 as f32)
}
