/// Reciprocal quantizer per coefficient position, in 2^18 fixed point.
pub const QUANT_TABLE: [i32; 4] = [262144 / 32, 262144 / 23, 262144 / 23, 262144 / 64];
pub const DEQUANT_TABLE: [i32; 4] = [32, 23, 23, 64];

/// Samples are 5-bit values stored `<< 3`.
pub const MAX_LEVEL5: i32 = 31;

pub fn forward_dct4(p: &[i32; 4]) -> [i32; 4] {
    let t0 = p[0] + p[1];
    let t1 = p[0] - p[1];
    let t2 = p[2] + p[3];
    let t3 = p[2] - p[3];
    [t0 + t2, t0 - t2, t1 + t3, t1 - t3]
}

/// Reconstructs four samples from dequantized coefficients `d` added onto `pred`.
pub fn inverse_dct4(d: &[i32; 4], pred: &[u8; 4]) -> [u8; 4] {
    let r0 = d[0] + 16;
    let t0 = r0 + d[1];
    let t2 = r0 - d[1];
    let t1 = d[2] + d[3];
    let t3 = d[2] - d[3];
    let s = [t0 + t1, t0 - t1, t2 + t3, t2 - t3];

    let mut out = [0u8; 4];
    for k in 0..4 {
        let v = ((pred[k] >> 3) as i32 + (s[k] >> 5)).clamp(0, MAX_LEVEL5);
        out[k] = (v << 3) as u8;
    }
    out
}

#[inline]
fn rounding_offset(q: i32) -> i32 {
    let half = q >> 1;
    (((1 << 17) + half) / q).min((((32 - 11) << 12) + half) / q)
}

/// Flat quantization of one sub-block. Returns `true` when every level is zero.
pub fn quantize4(dct: &[i32; 4], levels: &mut [i32; 4]) -> bool {
    let mut all_zero = true;
    for i in 0..4 {
        let q = QUANT_TABLE[i];
        let f = rounding_offset(q);
        levels[i] = if dct[i] < 0 {
            -(((f - dct[i]) * q) >> 18)
        } else {
            ((f + dct[i]) * q) >> 18
        };
        all_zero &= levels[i] == 0;
    }
    all_zero
}

pub fn dequantize4(levels: &[i32; 4]) -> [i32; 4] {
    std::array::from_fn(|i| levels[i] * DEQUANT_TABLE[i])
}

/// One 2x2 step-2 sub-block inside an 8x8 block.
///
/// Its four samples sit at `(x, y)`, `(x+2, y)`, `(x, y+2)` and `(x+2, y+2)`
/// relative to `x = x3 + x2`, `y = y3 + y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBlock {
    pub x3: usize,
    pub y3: usize,
    pub x2: usize,
    pub y2: usize,
}

impl SubBlock {
    pub const fn origin(&self) -> (usize, usize) {
        (self.x3 + self.x2, self.y3 + self.y2)
    }
}

const fn sub_block_order() -> [SubBlock; 16] {
    let mut out = [SubBlock { x3: 0, y3: 0, x2: 0, y2: 0 }; 16];
    let mut i = 0;
    while i < 16 {
        out[i] = SubBlock {
            y3: ((i >> 3) & 1) * 4,
            x3: ((i >> 2) & 1) * 4,
            y2: (i >> 1) & 1,
            x2: i & 1,
        };
        i += 1;
    }
    out
}

/// Coding order of the 16 sub-blocks; coefficient `j` of sub-block `i`
/// lands at `comb[j * 16 + i]`.
pub const SUB_BLOCKS: [SubBlock; 16] = sub_block_order();
