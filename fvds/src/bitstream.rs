//! Halfword-oriented bit writer and reader.
//!
//! Bits are packed MSB-first into a 32-bit register and leave it as
//! little-endian 16-bit halfwords, which is the unit the handheld decoder
//! refills its own bit window with. Variable-length integers use an
//! Elias-gamma layout: `n` zero bits, a one stop bit, then an `n`-bit
//! remainder.

use crate::error::{Error, Result};

#[inline]
fn bit_length(value: u64) -> u32 {
    64 - value.leading_zeros()
}

#[inline]
fn zigzag(value: i32) -> u64 {
    let v = value as i64;
    if v <= 0 { (1 - 2 * v) as u64 } else { (2 * v) as u64 }
}

#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bits: u32,
    count: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_chunk(bit as u32, 1);
    }

    /// Writes the low `n` bits of `value`, most significant first. `n` may be up to 32.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        if n > 16 {
            self.write_chunk(value >> 16, n - 16);
            self.write_chunk(value & 0xFFFF, 16);
        } else {
            self.write_chunk(value, n);
        }
    }

    fn write_chunk(&mut self, value: u32, n: u32) {
        if n == 0 {
            return;
        }
        let mask = (1u32 << n) - 1;
        self.bits |= (value & mask) << (32 - n - self.count);
        self.count += n;
        if self.count >= 16 {
            self.emit_halfword();
        }
    }

    fn emit_halfword(&mut self) {
        self.buf.push((self.bits >> 16) as u8);
        self.buf.push((self.bits >> 24) as u8);
        self.bits <<= 16;
        self.count = self.count.saturating_sub(16);
    }

    pub fn write_unsigned_varint(&mut self, value: u32) {
        let v = value as u64;
        let n = bit_length((v + 1) / 2);
        self.write_bits(0, n);
        self.write_bit(true);
        self.write_bits((v - ((1u64 << n) - 1)) as u32, n);
    }

    pub fn write_signed_varint(&mut self, value: i32) {
        let v = zigzag(value);
        let n = bit_length(v / 2);
        self.write_bits(0, n);
        self.write_bit(true);
        self.write_bits((v - (1u64 << n)) as u32, n);
    }

    /// Number of bits written so far, including those still in the register.
    pub fn bit_len(&self) -> usize {
        self.buf.len() * 8 + self.count as usize
    }

    /// Pads the pending bits with zeros up to a halfword and emits them.
    pub fn flush(&mut self) {
        if self.count > 0 {
            self.emit_halfword();
        }
    }

    pub fn finalize(mut self) -> Vec<u8> {
        self.flush();
        self.buf
    }
}

pub fn unsigned_varint_bits(value: u32) -> u32 {
    2 * bit_length((value as u64 + 1) / 2) + 1
}

pub fn signed_varint_bits(value: i32) -> u32 {
    2 * bit_length(zigzag(value) / 2) + 1
}

/// Reads what [`BitWriter`] produced.
///
/// Reading past the end of the data yields zero bits; only var-int decoding
/// reports an error, when a code runs longer than any `u32`/`i32` can need.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    window: u64,
    avail: u32,
    consumed: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut reader = Self {
            data,
            pos: 0,
            window: 0,
            avail: 0,
            consumed: 0,
        };
        reader.refill();
        reader
    }

    fn refill(&mut self) {
        while self.avail <= 48 {
            let lo = self.data.get(self.pos).copied().unwrap_or(0) as u64;
            let hi = self.data.get(self.pos + 1).copied().unwrap_or(0) as u64;
            self.pos += 2;
            self.window |= (lo | (hi << 8)) << (48 - self.avail);
            self.avail += 16;
        }
    }

    pub fn peek_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        if n == 0 {
            return 0;
        }
        self.refill();
        (self.window >> (64 - n)) as u32
    }

    pub fn skip_bits(&mut self, n: u32) {
        debug_assert!(n <= 32);
        self.refill();
        self.window <<= n;
        self.avail -= n;
        self.consumed += n as u64;
    }

    pub fn read_bits(&mut self, n: u32) -> u32 {
        let value = self.peek_bits(n);
        self.skip_bits(n);
        value
    }

    pub fn read_bit(&mut self) -> bool {
        self.read_bits(1) == 1
    }

    fn read_gamma(&mut self) -> Result<u64> {
        let mut zeros = 0u32;
        while !self.read_bit() {
            zeros += 1;
            if zeros > 32 {
                return Err(Error::Bitstream("var-int prefix longer than 32 bits".into()));
            }
        }
        let rem = self.read_bits(zeros) as u64;
        Ok((1u64 << zeros) + rem)
    }

    pub fn read_unsigned_varint(&mut self) -> Result<u32> {
        let value = self.read_gamma()? - 1;
        u32::try_from(value).map_err(|_| Error::Bitstream("unsigned var-int overflow".into()))
    }

    pub fn read_signed_varint(&mut self) -> Result<i32> {
        let coded = self.read_gamma()?;
        let value = if coded & 1 == 1 {
            -(((coded - 1) >> 1) as i64)
        } else {
            (coded >> 1) as i64
        };
        i32::try_from(value).map_err(|_| Error::Bitstream("signed var-int overflow".into()))
    }

    pub fn bits_consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes consumed, rounded up to the halfword the writer flushed to.
    pub fn consumed_halfword_bytes(&self) -> usize {
        (self.consumed.div_ceil(16) * 2) as usize
    }
}
