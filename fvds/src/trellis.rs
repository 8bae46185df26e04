//! Rate-distortion optimal quantization of a combined 64-coefficient block.
//!
//! A dynamic program over coefficient positions in the style of ffmpeg's
//! `dct_quantize_trellis`: every position keeps up to two candidate levels,
//! each candidate is joined to the cheapest surviving predecessor, and the
//! block ends at whichever "last" transition has the lowest total cost.

use crate::dct::{DEQUANT_TABLE, QUANT_TABLE};
use crate::vlc::{coefficient_bits, dct_bit_count_to};

const LAMBDA: i64 = 200;
const THRESHOLD1: i32 = (1 << 18) - 1;
const THRESHOLD2: u32 = (THRESHOLD1 as u32) << 1;
const SCORE_CEILING: i64 = 256 * 256 * 256 * 120;

#[inline]
fn is_significant(scaled: i32) -> bool {
    scaled.wrapping_add(THRESHOLD1) as u32 > THRESHOLD2
}

#[inline]
fn rate(last: bool, run: usize, level: i32) -> i64 {
    coefficient_bits(last, run, level) as i64 * LAMBDA
}

/// Quantizes `dct` into `out`, returning the index of the last coded
/// coefficient, or `None` when the cheapest choice is an all-zero block.
pub fn trellis_quantize(dct: &[i32; 64], out: &mut [i32; 64]) -> Option<usize> {
    out.fill(0);
    let last_significant =
        (0..64).rev().find(|&i| is_significant(dct[i] * QUANT_TABLE[i >> 4]))?;

    let mut candidates = [[0i32; 2]; 64];
    let mut candidate_count = [0usize; 64];
    for i in 0..=last_significant {
        let scaled = dct[i] * QUANT_TABLE[i >> 4];
        if is_significant(scaled) {
            let magnitude = scaled.abs() >> 18;
            let sign = scaled.signum();
            candidates[i] = [sign * magnitude, sign * (magnitude - 1)];
            candidate_count[i] = magnitude.min(2) as usize;
        } else {
            candidates[i][0] = if scaled < 0 { -1 } else { 1 };
            candidate_count[i] = 1;
        }
    }

    let mut score = [0i64; 65];
    let mut run_at = [0usize; 65];
    let mut level_at = [0i32; 65];
    let mut survivor = [0usize; 65];
    let mut survivors = 1;

    let mut last_score = 0i64;
    let mut last_run = 0usize;
    let mut last_level = 0i32;
    let mut last_end = 0usize;

    for i in 0..=last_significant {
        let target = dct[i].abs() as i64;
        let zero_distortion = target * target;
        let mut best = SCORE_CEILING;

        for &level in &candidates[i][..candidate_count[i]] {
            let unquantized = level.abs() as i64 * DEQUANT_TABLE[i >> 4] as i64;
            let distortion = (unquantized - target).pow(2) - zero_distortion;

            for &start in survivor[..survivors].iter().rev() {
                let run = i - start;
                let s = distortion + rate(false, run, level) + score[start];
                if s < best {
                    best = s;
                    run_at[i + 1] = run;
                    level_at[i + 1] = level;
                }
            }
            for &start in survivor[..survivors].iter().rev() {
                let run = i - start;
                let s = distortion + rate(true, run, level) + score[start];
                if s < last_score {
                    last_score = s;
                    last_run = run;
                    last_level = level;
                    last_end = i + 1;
                }
            }
        }

        score[i + 1] = best;
        let bound = if last_significant <= 27 { best } else { best + LAMBDA };
        while survivors > 0 && score[survivor[survivors - 1]] > bound {
            survivors -= 1;
        }
        survivor[survivors] = i + 1;
        survivors += 1;
    }

    if last_end == 0 {
        return None;
    }
    let last = last_end - 1;

    if last == 0 {
        // A lone DC is re-scored in the reconstructed DC domain.
        let target = dct[0].abs() as i64;
        let mut best_level = 0;
        let mut best_score = target * target;
        for &level in &candidates[0][..candidate_count[0]] {
            let dc = ((((level.abs() * DEQUANT_TABLE[0]) >> 3) + 4) >> 3) << 6;
            let distortion = (dc as i64 - target).pow(2);
            let s = if level == 0 {
                distortion
            } else {
                distortion + rate(true, 0, level)
            };
            if s < best_score {
                best_score = s;
                best_level = level;
            }
        }
        if best_level == 0 {
            return None;
        }
        out[0] = best_level;
        return Some(0);
    }

    out[last] = last_level;
    let mut i = last_end - (last_run + 1);
    while i > 0 {
        out[i - 1] = level_at[i];
        i -= run_at[i] + 1;
    }
    Some(last)
}

/// Trellis-quantizes `dct`, writing levels to `comb` and dequantized values
/// to `recon`. Returns the block's cost in bits, including its coded flag.
pub fn quantize_comb_rd(dct: &[i32; 64], comb: &mut [i32; 64], recon: &mut [i32; 64]) -> u32 {
    let bits = trellis_quantize(dct, comb).map_or(0, |last| dct_bit_count_to(comb, last));
    for (k, r) in recon.iter_mut().enumerate() {
        *r = comb[k] * DEQUANT_TABLE[k >> 4];
    }
    1 + bits
}
