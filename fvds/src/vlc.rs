//! Run/level variable-length coding of the 64 combined coefficients of a block.
//!
//! The code table is the MPEG-4 inter TCOEF table. Each code is followed by a
//! sign bit (1 = negative). Pairs the table cannot express go through one of
//! three escape modes, all introduced by [`ESCAPE`].

use std::sync::LazyLock;

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};

pub const ESCAPE: u32 = 0b0000011;
pub const ESCAPE_LEN: u32 = 7;
/// Cost of a fixed-length escape: escape, mode `11`, last, 6-bit run, 12-bit level.
pub const FIXED_ESCAPE_BITS: u32 = 28;

const LOOKUP_BITS: u32 = 12;
const MAX_TABLE_LEVEL: usize = 31;

#[derive(Debug, Clone, Copy)]
struct Code {
    last: bool,
    run: u8,
    level: u8,
    bits: u16,
    len: u8,
}

impl Code {
    const fn new(last: u8, run: u8, level: u8, bits: u16, len: u8) -> Self {
        Self {
            last: last != 0,
            run,
            level,
            bits,
            len,
        }
    }
}

#[rustfmt::skip]
const TCOEF: [Code; 102] = [
    Code::new(0, 0, 1, 0b10, 2),
    Code::new(0, 0, 2, 0b1111, 4),
    Code::new(0, 0, 3, 0b010101, 6),
    Code::new(0, 0, 4, 0b0010111, 7),
    Code::new(0, 0, 5, 0b00011111, 8),
    Code::new(0, 0, 6, 0b000100101, 9),
    Code::new(0, 0, 7, 0b000100100, 9),
    Code::new(0, 0, 8, 0b0000100001, 10),
    Code::new(0, 0, 9, 0b0000100000, 10),
    Code::new(0, 0, 10, 0b00000000111, 11),
    Code::new(0, 0, 11, 0b00000000110, 11),
    Code::new(0, 0, 12, 0b00000100000, 11),
    Code::new(0, 1, 1, 0b110, 3),
    Code::new(0, 1, 2, 0b010100, 6),
    Code::new(0, 1, 3, 0b00011110, 8),
    Code::new(0, 1, 4, 0b0000001111, 10),
    Code::new(0, 1, 5, 0b00000100001, 11),
    Code::new(0, 1, 6, 0b000001010000, 12),
    Code::new(0, 2, 1, 0b1110, 4),
    Code::new(0, 2, 2, 0b00011101, 8),
    Code::new(0, 2, 3, 0b0000001110, 10),
    Code::new(0, 2, 4, 0b000001010001, 12),
    Code::new(0, 3, 1, 0b01101, 5),
    Code::new(0, 3, 2, 0b000100011, 9),
    Code::new(0, 3, 3, 0b0000001101, 10),
    Code::new(0, 4, 1, 0b01100, 5),
    Code::new(0, 4, 2, 0b000100010, 9),
    Code::new(0, 4, 3, 0b000001010010, 12),
    Code::new(0, 5, 1, 0b01011, 5),
    Code::new(0, 5, 2, 0b0000001100, 10),
    Code::new(0, 5, 3, 0b000001010011, 12),
    Code::new(0, 6, 1, 0b010011, 6),
    Code::new(0, 6, 2, 0b0000001011, 10),
    Code::new(0, 6, 3, 0b000001010100, 12),
    Code::new(0, 7, 1, 0b010010, 6),
    Code::new(0, 7, 2, 0b0000001010, 10),
    Code::new(0, 8, 1, 0b010001, 6),
    Code::new(0, 8, 2, 0b0000001001, 10),
    Code::new(0, 9, 1, 0b010000, 6),
    Code::new(0, 9, 2, 0b0000001000, 10),
    Code::new(0, 10, 1, 0b0010110, 7),
    Code::new(0, 10, 2, 0b000001010101, 12),
    Code::new(0, 11, 1, 0b0010101, 7),
    Code::new(0, 12, 1, 0b0010100, 7),
    Code::new(0, 13, 1, 0b00011100, 8),
    Code::new(0, 14, 1, 0b00011011, 8),
    Code::new(0, 15, 1, 0b000100001, 9),
    Code::new(0, 16, 1, 0b000100000, 9),
    Code::new(0, 17, 1, 0b000011111, 9),
    Code::new(0, 18, 1, 0b000011110, 9),
    Code::new(0, 19, 1, 0b000011101, 9),
    Code::new(0, 20, 1, 0b000011100, 9),
    Code::new(0, 21, 1, 0b000011011, 9),
    Code::new(0, 22, 1, 0b000011010, 9),
    Code::new(0, 23, 1, 0b00000100010, 11),
    Code::new(0, 24, 1, 0b00000100011, 11),
    Code::new(0, 25, 1, 0b000001010110, 12),
    Code::new(0, 26, 1, 0b000001010111, 12),
    Code::new(1, 0, 1, 0b0111, 4),
    Code::new(1, 0, 2, 0b000011001, 9),
    Code::new(1, 0, 3, 0b00000000101, 11),
    Code::new(1, 1, 1, 0b001111, 6),
    Code::new(1, 1, 2, 0b00000000100, 11),
    Code::new(1, 2, 1, 0b001110, 6),
    Code::new(1, 3, 1, 0b001101, 6),
    Code::new(1, 4, 1, 0b001100, 6),
    Code::new(1, 5, 1, 0b0010011, 7),
    Code::new(1, 6, 1, 0b0010010, 7),
    Code::new(1, 7, 1, 0b0010001, 7),
    Code::new(1, 8, 1, 0b0010000, 7),
    Code::new(1, 9, 1, 0b00011010, 8),
    Code::new(1, 10, 1, 0b00011001, 8),
    Code::new(1, 11, 1, 0b00011000, 8),
    Code::new(1, 12, 1, 0b00010111, 8),
    Code::new(1, 13, 1, 0b00010110, 8),
    Code::new(1, 14, 1, 0b00010101, 8),
    Code::new(1, 15, 1, 0b00010100, 8),
    Code::new(1, 16, 1, 0b00010011, 8),
    Code::new(1, 17, 1, 0b000011000, 9),
    Code::new(1, 18, 1, 0b000010111, 9),
    Code::new(1, 19, 1, 0b000010110, 9),
    Code::new(1, 20, 1, 0b000010101, 9),
    Code::new(1, 21, 1, 0b000010100, 9),
    Code::new(1, 22, 1, 0b000010011, 9),
    Code::new(1, 23, 1, 0b000010010, 9),
    Code::new(1, 24, 1, 0b000010001, 9),
    Code::new(1, 25, 1, 0b0000000111, 10),
    Code::new(1, 26, 1, 0b0000000110, 10),
    Code::new(1, 27, 1, 0b0000000101, 10),
    Code::new(1, 28, 1, 0b0000000100, 10),
    Code::new(1, 29, 1, 0b00000100100, 11),
    Code::new(1, 30, 1, 0b00000100101, 11),
    Code::new(1, 31, 1, 0b00000100110, 11),
    Code::new(1, 32, 1, 0b00000100111, 11),
    Code::new(1, 33, 1, 0b000001011000, 12),
    Code::new(1, 34, 1, 0b000001011001, 12),
    Code::new(1, 35, 1, 0b000001011010, 12),
    Code::new(1, 36, 1, 0b000001011011, 12),
    Code::new(1, 37, 1, 0b000001011100, 12),
    Code::new(1, 38, 1, 0b000001011101, 12),
    Code::new(1, 39, 1, 0b000001011110, 12),
    Code::new(1, 40, 1, 0b000001011111, 12),
];

#[derive(Debug, Clone, Copy, Default)]
enum Symbol {
    #[default]
    Invalid,
    Escape,
    Code(Code),
}

struct Tables {
    codes: Vec<Option<Code>>,
    level_max: [[u8; 64]; 2],
    run_max1: [[u8; MAX_TABLE_LEVEL + 1]; 2],
    bit_length: Vec<u8>,
    lookup: Vec<Symbol>,
}

#[inline]
fn code_slot(last: bool, run: usize, level: usize) -> usize {
    ((last as usize) * 64 + run) * (MAX_TABLE_LEVEL + 1) + level
}

#[inline]
fn length_slot(last: bool, run: usize, level: i32) -> usize {
    ((last as usize) * 64 + run) * 128 + (level + 64) as usize
}

impl Tables {
    fn build() -> Self {
        let mut codes = vec![None; 2 * 64 * (MAX_TABLE_LEVEL + 1)];
        let mut level_max = [[0u8; 64]; 2];
        let mut run_max1 = [[0u8; MAX_TABLE_LEVEL + 1]; 2];
        let mut lookup = vec![Symbol::Invalid; 1 << LOOKUP_BITS];

        for code in TCOEF {
            let last = code.last as usize;
            codes[code_slot(code.last, code.run as usize, code.level as usize)] = Some(code);
            level_max[last][code.run as usize] = level_max[last][code.run as usize].max(code.level);
            let rm = &mut run_max1[last][code.level as usize];
            *rm = (*rm).max(code.run + 1);

            let shift = LOOKUP_BITS - code.len as u32;
            let base = (code.bits as usize) << shift;
            lookup[base..base + (1 << shift)].fill(Symbol::Code(code));
        }
        let shift = LOOKUP_BITS - ESCAPE_LEN;
        let base = (ESCAPE as usize) << shift;
        lookup[base..base + (1 << shift)].fill(Symbol::Escape);

        let mut tables = Self {
            codes,
            level_max,
            run_max1,
            bit_length: Vec::new(),
            lookup,
        };
        let mut bit_length = vec![0u8; 2 * 64 * 128];
        for last in [false, true] {
            for run in 0..64 {
                for level in -64..64 {
                    bit_length[length_slot(last, run, level)] =
                        tables.emission(last, run, level).bits() as u8;
                }
            }
        }
        tables.bit_length = bit_length;
        tables
    }

    fn code(&self, last: bool, run: usize, level: usize) -> Option<Code> {
        if run >= 64 || level > MAX_TABLE_LEVEL {
            return None;
        }
        self.codes[code_slot(last, run, level)]
    }

    fn level_max(&self, last: bool, run: usize) -> usize {
        self.level_max[last as usize][run] as usize
    }

    fn run_max1(&self, last: bool, level: usize) -> usize {
        self.run_max1[last as usize][level] as usize
    }

    fn emission(&self, last: bool, run: usize, level: i32) -> Emission {
        let abs = level.unsigned_abs() as usize;
        if abs <= MAX_TABLE_LEVEL {
            if let Some(code) = self.code(last, run, abs) {
                return Emission::Direct(code);
            }
            let shortened = run.checked_sub(self.run_max1(last, abs));
            if let Some(code) = shortened.and_then(|r| self.code(last, r, abs)) {
                return Emission::RunEscape(code);
            }
        }
        let reduced = abs.checked_sub(self.level_max(last, run));
        if let Some(code) = reduced.and_then(|l| self.code(last, run, l)) {
            return Emission::LevelEscape(code);
        }
        Emission::Fixed
    }
}

static TABLES: LazyLock<Tables> = LazyLock::new(Tables::build);

#[derive(Debug, Clone, Copy)]
enum Emission {
    Direct(Code),
    RunEscape(Code),
    LevelEscape(Code),
    Fixed,
}

impl Emission {
    fn bits(self) -> u32 {
        match self {
            Emission::Direct(c) => c.len as u32 + 1,
            Emission::RunEscape(c) => ESCAPE_LEN + 2 + c.len as u32 + 1,
            Emission::LevelEscape(c) => ESCAPE_LEN + 1 + c.len as u32 + 1,
            Emission::Fixed => FIXED_ESCAPE_BITS,
        }
    }
}

fn write_coefficient(w: &mut BitWriter, last: bool, run: usize, level: i32) {
    let sign = (level < 0) as u32;
    match TABLES.emission(last, run, level) {
        Emission::Direct(c) => {
            w.write_bits(c.bits as u32, c.len as u32);
            w.write_bits(sign, 1);
        }
        Emission::RunEscape(c) => {
            w.write_bits(ESCAPE, ESCAPE_LEN);
            w.write_bits(0b10, 2);
            w.write_bits(c.bits as u32, c.len as u32);
            w.write_bits(sign, 1);
        }
        Emission::LevelEscape(c) => {
            w.write_bits(ESCAPE, ESCAPE_LEN);
            w.write_bits(0, 1);
            w.write_bits(c.bits as u32, c.len as u32);
            w.write_bits(sign, 1);
        }
        Emission::Fixed => {
            w.write_bits(ESCAPE, ESCAPE_LEN);
            w.write_bits(0b11, 2);
            w.write_bit(last);
            w.write_bits(run as u32, 6);
            w.write_bits(level as u32 & 0xFFF, 12);
        }
    }
}

/// Bits needed for one (last, run, level) triple, sign included.
#[inline]
pub fn coefficient_bits(last: bool, run: usize, level: i32) -> u32 {
    if (-64..64).contains(&level) {
        TABLES.bit_length[length_slot(last, run, level)] as u32
    } else {
        FIXED_ESCAPE_BITS
    }
}

fn last_nonzero(comb: &[i32; 64]) -> Option<usize> {
    comb.iter().rposition(|&c| c != 0)
}

pub fn encode_dct(comb: &[i32; 64], w: &mut BitWriter) {
    let Some(last) = last_nonzero(comb) else {
        write_coefficient(w, true, 0, 0);
        return;
    };
    let mut run = 0;
    for (i, &level) in comb[..=last].iter().enumerate() {
        if level == 0 {
            run += 1;
            continue;
        }
        write_coefficient(w, i == last, run, level);
        run = 0;
    }
}

pub fn dct_bit_count(comb: &[i32; 64]) -> u32 {
    dct_bit_count_to(comb, last_nonzero(comb).unwrap_or(0))
}

/// Like [`dct_bit_count`] with the final coded index already known.
pub fn dct_bit_count_to(comb: &[i32; 64], last: usize) -> u32 {
    let mut bits = 0;
    let mut run = 0;
    for &level in &comb[..last] {
        if level == 0 {
            run += 1;
            continue;
        }
        bits += coefficient_bits(false, run, level);
        run = 0;
    }
    bits + coefficient_bits(true, run, comb[last])
}

fn read_code(r: &mut BitReader) -> Result<Code> {
    match TABLES.lookup[r.peek_bits(LOOKUP_BITS) as usize] {
        Symbol::Code(c) => {
            r.skip_bits(c.len as u32);
            Ok(c)
        }
        Symbol::Escape => Err(Error::Bitstream("nested escape in coefficient".into())),
        Symbol::Invalid => Err(Error::Bitstream("invalid coefficient code".into())),
    }
}

#[inline]
fn signed(level: usize, r: &mut BitReader) -> i32 {
    if r.read_bit() { -(level as i32) } else { level as i32 }
}

fn read_coefficient(r: &mut BitReader) -> Result<(bool, usize, i32)> {
    let symbol = TABLES.lookup[r.peek_bits(LOOKUP_BITS) as usize];
    match symbol {
        Symbol::Code(c) => {
            r.skip_bits(c.len as u32);
            Ok((c.last, c.run as usize, signed(c.level as usize, r)))
        }
        Symbol::Invalid => Err(Error::Bitstream("invalid coefficient code".into())),
        Symbol::Escape => {
            r.skip_bits(ESCAPE_LEN);
            if !r.read_bit() {
                let c = read_code(r)?;
                let level = c.level as usize + TABLES.level_max(c.last, c.run as usize);
                return Ok((c.last, c.run as usize, signed(level, r)));
            }
            if !r.read_bit() {
                let c = read_code(r)?;
                let run = c.run as usize + TABLES.run_max1(c.last, c.level as usize);
                return Ok((c.last, run, signed(c.level as usize, r)));
            }
            let last = r.read_bit();
            let run = r.read_bits(6) as usize;
            let level = ((r.read_bits(12) << 20) as i32) >> 20;
            Ok((last, run, level))
        }
    }
}

/// Inverse of [`encode_dct`]. `comb` is fully overwritten.
pub fn decode_dct(r: &mut BitReader, comb: &mut [i32; 64]) -> Result<()> {
    comb.fill(0);
    let mut index = 0usize;
    loop {
        let (last, run, level) = read_coefficient(r)?;
        index += run;
        if index > 63 {
            return Err(Error::Bitstream(format!("coefficient index {index} out of block")));
        }
        comb[index] = level;
        if last {
            return Ok(());
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn emitted_bits(comb: &[i32; 64]) -> usize {
        let mut w = BitWriter::new();
        encode_dct(comb, &mut w);
        w.bit_len()
    }

    fn round_trip(comb: &[i32; 64]) -> [i32; 64] {
        let mut w = BitWriter::new();
        encode_dct(comb, &mut w);
        let data = w.finalize();
        let mut r = BitReader::new(&data);
        let mut out = [0; 64];
        decode_dct(&mut r, &mut out).unwrap();
        out
    }

    #[test]
    fn code_table_is_prefix_free() {
        let mut all: Vec<(u32, u32)> = TCOEF.iter().map(|c| (c.bits as u32, c.len as u32)).collect();
        all.push((ESCAPE, ESCAPE_LEN));
        for (i, &(a, la)) in all.iter().enumerate() {
            for (j, &(b, lb)) in all.iter().enumerate() {
                if i != j && la <= lb {
                    assert_ne!(b >> (lb - la), a, "code {i} is a prefix of code {j}");
                }
            }
        }
    }

    #[test]
    fn escape_thresholds() {
        assert_eq!(TABLES.level_max(false, 0), 12);
        assert_eq!(TABLES.level_max(true, 0), 3);
        assert_eq!(TABLES.run_max1(false, 1), 27);
        assert_eq!(TABLES.run_max1(true, 1), 41);
        assert_eq!(TABLES.level_max(false, 63), 0);
    }

    #[test]
    fn bit_lengths_per_tier() {
        assert_eq!(coefficient_bits(false, 0, 1), 3);
        assert_eq!(coefficient_bits(false, 0, -1), 3);
        assert_eq!(coefficient_bits(true, 0, 1), 5);
        // level escape: 13 - 12 = 1
        assert_eq!(coefficient_bits(false, 0, 13), 11);
        // run escape: 30 - 27 = 3
        assert_eq!(coefficient_bits(false, 30, 1), 15);
        assert_eq!(coefficient_bits(true, 45, 1), 16);
        assert_eq!(coefficient_bits(false, 0, 40), 28);
        assert_eq!(coefficient_bits(false, 63, 1), 28);
        assert_eq!(coefficient_bits(false, 0, 100), 28);
        assert_eq!(coefficient_bits(true, 0, 0), 28);
    }

    #[test]
    fn all_zero_block_costs_a_fixed_escape() {
        let comb = [0; 64];
        assert_eq!(dct_bit_count(&comb), 28);
        assert_eq!(emitted_bits(&comb), 28);
        assert_eq!(round_trip(&comb), comb);
    }

    #[test]
    fn dc_only_block() {
        let mut comb = [0; 64];
        comb[0] = -1;
        assert_eq!(dct_bit_count(&comb), 5);
        assert_eq!(emitted_bits(&comb), 5);
        assert_eq!(round_trip(&comb), comb);
    }

    #[test]
    fn sparse_block() {
        let mut comb = [0; 64];
        comb[0] = 5;
        comb[3] = -1;
        comb[17] = 2;
        comb[63] = 1;
        assert_eq!(dct_bit_count(&comb), 48);
        assert_eq!(emitted_bits(&comb), 48);
        assert_eq!(round_trip(&comb), comb);
    }

    #[test]
    fn dense_block_with_escapes() {
        let comb: [i32; 64] = std::array::from_fn(|i| match i % 5 {
            0 => 70,
            1 => -13,
            2 => 0,
            3 => 1,
            _ => -2000,
        });
        assert_eq!(dct_bit_count(&comb) as usize, emitted_bits(&comb));
        assert_eq!(round_trip(&comb), comb);
    }

    #[test]
    fn count_to_explicit_last() {
        let mut comb = [0; 64];
        comb[2] = 3;
        comb[9] = -4;
        assert_eq!(dct_bit_count_to(&comb, 9), dct_bit_count(&comb));
    }

    #[test]
    fn invalid_code_is_an_error() {
        let mut r = BitReader::new(&[0, 0]);
        let mut comb = [0; 64];
        assert!(decode_dct(&mut r, &mut comb).is_err());
    }

    fn sparse_block_strategy() -> impl Strategy<Value = [i32; 64]> {
        proptest::collection::vec((0usize..64, -2047i32..=2047), 0..24).prop_map(|entries| {
            let mut comb = [0; 64];
            for (i, v) in entries {
                comb[i] = v;
            }
            comb
        })
    }

    proptest! {
        #[test]
        fn bit_count_matches_emission(comb in sparse_block_strategy()) {
            prop_assert_eq!(dct_bit_count(&comb) as usize, emitted_bits(&comb));
        }

        #[test]
        fn decode_inverts_encode(comb in sparse_block_strategy()) {
            prop_assert_eq!(round_trip(&comb), comb);
        }
    }
}
