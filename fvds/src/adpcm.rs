//! 4-bit IMA-style ADPCM with a one-sample look-ahead encoder.
//!
//! A block is an optional 4-byte header (`i16` last sample, `u16` step
//! index) followed by one little-endian `u32` per 8 samples, sample `j`
//! in bits `4j..4j+4`.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

const INDEX_TABLE: [i32; 16] = [-3, -3, -2, -1, 2, 4, 6, 8, -3, -3, -2, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66, 73, 80, 88, 97,
    107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408, 449, 494, 544, 598, 658, 724, 796,
    876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066, 2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871,
    5358, 5894, 6484, 7132, 7845, 8630, 9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623,
    27086, 29794, 32767,
];

const MAX_INDEX: i32 = 88;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdpcmState {
    pub last_sample: i16,
    pub step_index: u8,
}

impl AdpcmState {
    /// Picks a starting state from the first two samples.
    fn fresh(samples: &[i16]) -> Self {
        let first = samples.first().copied().unwrap_or(0) as i32;
        let second = samples.get(1).copied().unwrap_or(0) as i32;
        let index = (best_step_index(second - first) + 3).min(MAX_INDEX as usize);
        let last = (first - STEP_TABLE[index] / 8).max(-0x7FFF);
        Self {
            last_sample: last as i16,
            step_index: index as u8,
        }
    }

    fn advance(&mut self, code: u32) -> i16 {
        let sample = reconstruct(self.last_sample as i32, STEP_TABLE[self.step_index as usize], code);
        self.last_sample = sample as i16;
        self.step_index = next_index(self.step_index as i32, code) as u8;
        self.last_sample
    }
}

/// First index whose step is closest to `|diff|`.
fn best_step_index(diff: i32) -> usize {
    let target = diff.abs();
    let mut best = 0;
    for (i, &step) in STEP_TABLE.iter().enumerate() {
        if (target - step).abs() < (target - STEP_TABLE[best]).abs() {
            best = i;
        }
    }
    best
}

#[inline]
fn reconstruct(last: i32, step: i32, code: u32) -> i32 {
    let diff = (step * ((code & 7) as i32 * 2 + 1)) >> 3;
    let sample = if code & 8 != 0 { last - diff } else { last + diff };
    sample.clamp(-0x7FFF, 0x7FFF)
}

#[inline]
fn next_index(index: i32, code: u32) -> i32 {
    (index + INDEX_TABLE[code as usize]).clamp(0, MAX_INDEX)
}

/// Code for `sample` that minimises its own error plus the best error
/// reachable for `next`.
fn choose_code(state: &AdpcmState, sample: i32, next: Option<i32>) -> u32 {
    let last = state.last_sample as i32;
    let step = STEP_TABLE[state.step_index as usize];

    let mut best = 0;
    let mut best_score = i32::MAX;
    for k in 0..16u32 {
        let rec = reconstruct(last, step, k);
        let mut score = (rec - sample).abs();
        if let Some(next) = next {
            let step2 = STEP_TABLE[next_index(state.step_index as i32, k) as usize];
            score += (0..16u32)
                .map(|l| (reconstruct(rec, step2, l) - next).abs())
                .min()
                .unwrap_or(0);
        }
        if score < best_score {
            best_score = score;
            best = k;
        }
    }
    best
}

/// Encodes `samples` into a header-prefixed block starting from a fresh state.
pub fn encode(samples: &[i16]) -> Result<Vec<u8>> {
    encode_with_state(samples, None, true).map(|(data, _)| data)
}

/// Encodes `samples`, continuing from `state` when given.
///
/// A fresh state can only be communicated through a header, so
/// `state == None` requires `emit_header`.
pub fn encode_with_state(
    samples: &[i16],
    state: Option<AdpcmState>,
    emit_header: bool,
) -> Result<(Vec<u8>, AdpcmState)> {
    if samples.len() % 8 != 0 {
        return Err(Error::AdpcmLength(samples.len()));
    }
    let mut state = match state {
        Some(s) => s,
        None if emit_header => AdpcmState::fresh(samples),
        None => return Err(Error::AdpcmMissingState),
    };

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() / 2);
    if emit_header {
        out.write_i16::<LittleEndian>(state.last_sample)?;
        out.write_u16::<LittleEndian>(state.step_index as u16)?;
    }

    for (group, chunk) in samples.chunks_exact(8).enumerate() {
        let mut nibbles = 0u32;
        for (j, &sample) in chunk.iter().enumerate() {
            let next = samples.get(group * 8 + j + 1).map(|&s| s as i32);
            let code = choose_code(&state, sample as i32, next);
            nibbles |= code << (j * 4);
            state.advance(code);
        }
        out.write_u32::<LittleEndian>(nibbles)?;
    }
    Ok((out, state))
}

/// Decodes a header-prefixed block.
pub fn decode_block(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() < HEADER_LEN {
        return Err(Error::Bitstream(format!("ADPCM block of {} bytes has no header", data.len())));
    }
    let index = LittleEndian::read_u16(&data[2..4]);
    if index > MAX_INDEX as u16 {
        return Err(Error::Bitstream(format!("ADPCM step index {index} out of range")));
    }
    let state = AdpcmState {
        last_sample: LittleEndian::read_i16(&data[..2]),
        step_index: index as u8,
    };
    decode_with_state(&data[HEADER_LEN..], state).map(|(samples, _)| samples)
}

/// Decodes header-less nibble words starting from `state`.
pub fn decode_with_state(data: &[u8], mut state: AdpcmState) -> Result<(Vec<i16>, AdpcmState)> {
    if data.len() % 4 != 0 {
        return Err(Error::Bitstream(format!("ADPCM data of {} bytes is not whole words", data.len())));
    }
    if state.step_index as i32 > MAX_INDEX {
        return Err(Error::Bitstream(format!("ADPCM step index {} out of range", state.step_index)));
    }
    let mut samples = Vec::with_capacity(data.len() * 2);
    for word in data.chunks_exact(4) {
        let nibbles = LittleEndian::read_u32(word);
        for j in 0..8 {
            samples.push(state.advance((nibbles >> (j * 4)) & 0xF));
        }
    }
    Ok((samples, state))
}
