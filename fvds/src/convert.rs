//! Colour conversion into 5-bit frames.
//!
//! 8-bit components are reduced to 5 bits with an ordered 4x4 dither whose
//! threshold is applied in linear light (gamma 2.2), following
//! <http://www.thetenthplanet.de/archives/5367>.

use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::frame::Frame;

const DITHER_MATRIX: [[u8; 4]; 4] = [[0, 12, 3, 15], [8, 4, 11, 7], [2, 14, 1, 13], [10, 6, 9, 5]];

const GAMMA: f64 = 2.2;

struct LinearTables {
    from8: [f64; 256],
    from5: [f64; 32],
}

static LINEAR: LazyLock<LinearTables> = LazyLock::new(|| LinearTables {
    from8: std::array::from_fn(|i| (i as f64 / 255.0).powf(GAMMA)),
    from5: std::array::from_fn(|i| (i as f64 / 31.0).powf(GAMMA)),
});

/// Reduces one 8-bit component to 5 bits. `noise` is in `[0, 1)`.
pub fn dither_component(color: u8, noise: f64) -> u8 {
    let c0 = (color as usize * 31) / 255;
    let c1 = (c0 + 1).min(31);
    let tables = &*LINEAR;
    let threshold = tables.from5[c0] * (1.0 - noise) + tables.from5[c1] * noise;
    if threshold < tables.from8[color as usize] { c1 as u8 } else { c0 as u8 }
}

/// Dithers RGBA8888 rows into `frame`. `stride` is in bytes.
pub fn dither_rgba(rgba: &[u8], stride: usize, frame: &mut Frame) -> Result<()> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if stride < width * 4 || rgba.len() < stride * height.saturating_sub(1) + width * 4 {
        return Err(Error::InvalidDimensions {
            width: frame.width,
            height: frame.height,
        });
    }

    for y in 0..height {
        let row = &rgba[y * stride..][..width * 4];
        for (x, px) in row.chunks_exact(4).enumerate() {
            let noise = DITHER_MATRIX[y & 3][x & 3] as f64 / 16.0;
            let i = y * width + x;
            frame.r[i] = dither_component(px[0], noise) << 3;
            frame.g[i] = dither_component(px[1], noise) << 3;
            frame.b[i] = dither_component(px[2], noise) << 3;
        }
    }
    Ok(())
}

#[inline]
fn clamp8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YUV 4:2:0 to RGBA8888 with opaque alpha.
///
/// `rgba` must hold `width * height * 4` bytes. Chroma planes are
/// `ceil(width / 2) x ceil(height / 2)`.
pub fn yuv420_to_rgba(y_plane: &[u8], u_plane: &[u8], v_plane: &[u8], width: usize, height: usize, rgba: &mut [u8]) {
    let chroma_width = width.div_ceil(2);
    for y in 0..height {
        for x in 0..width {
            let c = y_plane[y * width + x] as i32 - 16;
            let ci = (y / 2) * chroma_width + x / 2;
            let d = u_plane[ci] as i32 - 128;
            let e = v_plane[ci] as i32 - 128;

            let out = &mut rgba[(y * width + x) * 4..][..4];
            out[0] = clamp8((298 * c + 409 * e + 128) >> 8);
            out[1] = clamp8((298 * c - 100 * d - 208 * e + 128) >> 8);
            out[2] = clamp8((298 * c + 516 * d + 128) >> 8);
            out[3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_are_exact() {
        for noise in [0.0, 0.5, 15.0 / 16.0] {
            assert_eq!(dither_component(0, noise), 0);
            assert_eq!(dither_component(255, noise), 31);
        }
    }

    #[test]
    fn zero_noise_rounds_up_only_past_the_level() {
        // 4 * 31 / 255 = 0, and 4/255 is brighter in linear light than 0/31
        assert_eq!(dither_component(4, 0.0), 1);
        assert_eq!(dither_component(4, 15.0 / 16.0), 0);
    }

    #[test]
    fn mid_grey_dithers_between_two_levels() {
        let mut frame = Frame::new(8, 8);
        let rgba = vec![128u8; 8 * 8 * 4];
        dither_rgba(&rgba, 8 * 4, &mut frame).unwrap();
        let levels: std::collections::BTreeSet<u8> = frame.g.iter().map(|&v| v >> 3).collect();
        assert!(levels.len() <= 2);
        assert!(levels.iter().all(|&l| l == 15 || l == 16));
        assert_eq!(frame.r, frame.g);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut frame = Frame::new(8, 8);
        assert!(dither_rgba(&[0; 16], 32, &mut frame).is_err());
    }

    #[test]
    fn yuv_black_and_white() {
        let mut rgba = [0u8; 2 * 2 * 4];
        yuv420_to_rgba(&[16, 16, 235, 235], &[128], &[128], 2, 2, &mut rgba);
        assert_eq!(rgba[..4], [0, 0, 0, 255]);
        assert_eq!(rgba[8..12], [255, 255, 255, 255]);
    }

    #[test]
    fn yuv_red() {
        let mut rgba = [0u8; 4];
        yuv420_to_rgba(&[81], &[90], &[240], 1, 1, &mut rgba);
        assert!(rgba[0] > 250 && rgba[1] < 5 && rgba[2] < 5, "{rgba:?}");
    }
}
