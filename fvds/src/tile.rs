//! 8x8 tile access on frame planes.

/// Samples of a 5-bit-in-8 tile, row-major with stride 8.
pub type Tile = [u8; 64];

pub fn get_tile8(plane: &[u8], stride: usize, x: usize, y: usize, out: &mut Tile) {
    for (row, dst) in out.chunks_exact_mut(8).enumerate() {
        let start = (y + row) * stride + x;
        dst.copy_from_slice(&plane[start..start + 8]);
    }
}

pub fn set_tile8(plane: &mut [u8], stride: usize, x: usize, y: usize, tile: &Tile) {
    for (row, src) in tile.chunks_exact(8).enumerate() {
        let start = (y + row) * stride + x;
        plane[start..start + 8].copy_from_slice(src);
    }
}

/// The four samples of a step-2 sub-block: `(x, y)`, `(x+2, y)`, `(x, y+2)`, `(x+2, y+2)`.
pub fn get_tile_2x2_step2(buf: &[u8], stride: usize, x: usize, y: usize) -> [u8; 4] {
    let top = y * stride + x;
    let bottom = top + 2 * stride;
    [buf[top], buf[top + 2], buf[bottom], buf[bottom + 2]]
}

pub fn set_tile_2x2_step2(buf: &mut [u8], stride: usize, x: usize, y: usize, v: &[u8; 4]) {
    let top = y * stride + x;
    let bottom = top + 2 * stride;
    buf[top] = v[0];
    buf[top + 2] = v[1];
    buf[bottom] = v[2];
    buf[bottom + 2] = v[3];
}

pub fn sad64(a: &Tile, b: &Tile) -> u32 {
    a.iter().zip(b).map(|(&x, &y)| x.abs_diff(y) as u32).sum()
}

#[inline]
fn tap(v: u8) -> u32 {
    if v == 0 { 0 } else { (((v >> 3) as u32) << 1) + 1 }
}

#[inline]
fn average(a: u8, b: u8) -> u8 {
    (((tap(a) + tap(b)) >> 2) << 3) as u8
}

/// Offset of the second tap of a half-pel sample relative to the first.
#[inline]
fn second_tap(odd_x: bool, odd_y: bool) -> (usize, usize) {
    (odd_x as usize, odd_y as usize)
}

/// Fetches the 8x8 tile at half-pel position `(hx, hy)`.
///
/// Taps that fall outside the plane are clamped to its edge.
pub fn get_tile_half8(plane: &[u8], width: usize, height: usize, hx: i32, hy: i32, out: &mut Tile) {
    let x = hx >> 1;
    let y = hy >> 1;
    let odd_x = hx & 1 != 0;
    let odd_y = hy & 1 != 0;
    let (dx, dy) = second_tap(odd_x, odd_y);

    let inside = x >= 0
        && y >= 0
        && x as usize + 8 + dx <= width
        && y as usize + 8 + dy <= height;
    if inside {
        half8_inside(plane, width, x as usize, y as usize, dx, dy, out);
    } else {
        half8_clamped(plane, width, height, x, y, dx, dy, out);
    }
}

fn half8_inside(plane: &[u8], width: usize, x: usize, y: usize, dx: usize, dy: usize, out: &mut Tile) {
    if dx == 0 && dy == 0 {
        get_tile8(plane, width, x, y, out);
        return;
    }
    for (row, dst) in out.chunks_exact_mut(8).enumerate() {
        let a = (y + row) * width + x;
        let b = a + dy * width + dx;
        let first = &plane[a..a + 8];
        let second = &plane[b..b + 8];
        for ((d, &p), &q) in dst.iter_mut().zip(first).zip(second) {
            *d = average(p, q);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn half8_clamped(
    plane: &[u8],
    width: usize,
    height: usize,
    x: i32,
    y: i32,
    dx: usize,
    dy: usize,
    out: &mut Tile,
) {
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let sample = |sx: i32, sy: i32| plane[sy.clamp(0, max_y) as usize * width + sx.clamp(0, max_x) as usize];

    for row in 0..8 {
        for col in 0..8 {
            let sx = x + col as i32;
            let sy = y + row as i32;
            let p = sample(sx, sy);
            out[row * 8 + col] = if dx == 0 && dy == 0 {
                p
            } else {
                average(p, sample(sx + dx as i32, sy + dy as i32))
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_plane(width: usize, height: usize) -> Vec<u8> {
        let mut state = 7u32;
        (0..width * height)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                ((state >> 27) as u8) << 3
            })
            .collect()
    }

    #[test]
    fn tile_copy_round_trip() {
        let plane = textured_plane(24, 16);
        let mut tile = [0; 64];
        get_tile8(&plane, 24, 8, 8, &mut tile);
        assert_eq!(tile[0], plane[8 * 24 + 8]);
        assert_eq!(tile[63], plane[15 * 24 + 15]);

        let mut copy = vec![0; 24 * 16];
        set_tile8(&mut copy, 24, 8, 8, &tile);
        assert_eq!(copy[9 * 24 + 10], plane[9 * 24 + 10]);
        assert_eq!(copy[0], 0);
    }

    #[test]
    fn step2_positions() {
        let tile: Tile = std::array::from_fn(|i| i as u8);
        assert_eq!(get_tile_2x2_step2(&tile, 8, 1, 4), [33, 35, 49, 51]);

        let mut buf = [0u8; 64];
        set_tile_2x2_step2(&mut buf, 8, 5, 5, &[1, 2, 3, 4]);
        assert_eq!((buf[45], buf[47], buf[61], buf[63]), (1, 2, 3, 4));
        assert_eq!(buf.iter().filter(|&&v| v != 0).count(), 4);
    }

    #[test]
    fn sad_of_identical_tiles_is_zero() {
        let a = [128u8; 64];
        let mut b = a;
        assert_eq!(sad64(&a, &b), 0);
        b[3] = 120;
        b[9] = 144;
        assert_eq!(sad64(&a, &b), 24);
    }

    #[test]
    fn half_pel_average_of_flat_area() {
        let plane = vec![80u8; 16 * 16];
        let mut out = [0; 64];
        for (hx, hy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            get_tile_half8(&plane, 16, 16, hx, hy, &mut out);
            assert!(out.iter().all(|&v| v == 80), "offset ({hx}, {hy})");
        }
    }

    #[test]
    fn half_pel_zero_tap_weighs_nothing() {
        let mut plane = vec![0u8; 16 * 16];
        for y in 0..16 {
            plane[y * 16 + 1] = 248;
        }
        let mut out = [0; 64];
        get_tile_half8(&plane, 16, 16, 1, 0, &mut out);
        // (0 + 63) >> 2 = 15
        assert_eq!(out[0], 15 << 3);
        // (63 + 0) >> 2 = 15
        assert_eq!(out[1], 15 << 3);
        assert_eq!(out[2], 0);
    }

    #[test]
    fn fast_path_matches_clamped_path() {
        let (w, h) = (32usize, 24usize);
        let plane = textured_plane(w, h);
        for hy in 0..=2 * (h as i32 - 9) {
            for hx in 0..=2 * (w as i32 - 9) {
                let (dx, dy) = second_tap(hx & 1 != 0, hy & 1 != 0);
                let mut fast = [0; 64];
                let mut slow = [0; 64];
                half8_inside(&plane, w, (hx >> 1) as usize, (hy >> 1) as usize, dx, dy, &mut fast);
                half8_clamped(&plane, w, h, hx >> 1, hy >> 1, dx, dy, &mut slow);
                assert_eq!(fast, slow, "at ({hx}, {hy})");
            }
        }
    }

    #[test]
    fn out_of_frame_taps_clamp_to_edge() {
        let plane = textured_plane(16, 16);
        let mut out = [0; 64];
        get_tile_half8(&plane, 16, 16, -40, -40, &mut out);
        assert!(out.iter().all(|&v| v == plane[0]));

        get_tile_half8(&plane, 16, 16, 100, 0, &mut out);
        for row in 0..8 {
            assert!(out[row * 8..row * 8 + 8].iter().all(|&v| v == plane[row * 16 + 15]));
        }
    }
}
