//! Coding of one 8x8 RGB block.
//!
//! A block is coded per channel as 16 step-2 sub-blocks (see
//! [`SUB_BLOCKS`]). Intra sub-blocks predict from already reconstructed
//! samples of the same block; inter sub-blocks predict from the
//! motion-compensated reference tile. All work happens on stride-8 tiles.

use crate::dct::{DEQUANT_TABLE, SUB_BLOCKS, SubBlock, dequantize4, forward_dct4, inverse_dct4, quantize4};
use crate::frame::{Channel, Frame};
use crate::tile::{Tile, get_tile8, get_tile_2x2_step2, set_tile8, set_tile_2x2_step2};
use crate::trellis::quantize_comb_rd;
use crate::vlc::dct_bit_count;

/// Coefficients of one channel in combined order: `comb[j * 16 + i]` is
/// coefficient `j` of sub-block `i`.
pub type Comb = [i32; 64];

const STRIDE: usize = 8;

#[inline]
fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::R => 0,
        Channel::G => 1,
        Channel::B => 2,
    }
}

/// Per-channel state for one candidate coding of a block, indexed R, G, B.
#[derive(Debug, Clone)]
pub struct BlockCoding {
    pub levels: [Comb; 3],
    pub recon: [Tile; 3],
    dcts: [Comb; 3],
    dequant: [Comb; 3],
}

impl Default for BlockCoding {
    fn default() -> Self {
        Self {
            levels: [[0; 64]; 3],
            recon: [[0; 64]; 3],
            dcts: [[0; 64]; 3],
            dequant: [[0; 64]; 3],
        }
    }
}

impl BlockCoding {
    pub fn levels(&self, channel: Channel) -> &Comb {
        &self.levels[channel_index(channel)]
    }

    pub fn levels_mut(&mut self, channel: Channel) -> &mut Comb {
        &mut self.levels[channel_index(channel)]
    }

    pub fn recon(&self, channel: Channel) -> &Tile {
        &self.recon[channel_index(channel)]
    }

    pub fn channel_is_zero(&self, channel: Channel) -> bool {
        self.levels(channel).iter().all(|&l| l == 0)
    }

    /// Intra-codes `source` (indexed R, G, B) with flat quantization. Returns
    /// the coefficient bits of all three channels.
    pub fn intra_encode(&mut self, source: &[Tile; 3]) -> u32 {
        let mut bits = 0;
        for channel in Channel::CODING_ORDER {
            let c = channel_index(channel);
            let [r, g, b] = &mut self.recon;
            let (recon, luma) = match channel {
                Channel::G => (g, None),
                Channel::R => (r, Some(&*g)),
                Channel::B => (b, Some(&*g)),
            };
            intra_encode_channel(&source[c], luma, &mut self.levels[c], recon);
            bits += dct_bit_count(&self.levels[c]);
        }
        bits
    }

    /// Rebuilds the intra reconstruction from decoded `levels`.
    pub fn intra_decode(&mut self) {
        for channel in Channel::CODING_ORDER {
            let c = channel_index(channel);
            let [r, g, b] = &mut self.recon;
            let (recon, luma) = match channel {
                Channel::G => (g, None),
                Channel::R => (r, Some(&*g)),
                Channel::B => (b, Some(&*g)),
            };
            intra_decode_channel(&self.levels[c], luma, recon);
        }
    }

    /// Inter-codes `source` against the motion-compensated `pred` tiles using
    /// trellis quantization. Returns the coefficient bits including the three
    /// coded flags.
    pub fn inter_encode(&mut self, source: &[Tile; 3], pred: &[Tile; 3]) -> u32 {
        let mut bits = 0;
        for c in 0..3 {
            residual_dct(&source[c], &pred[c], &mut self.dcts[c]);
            bits += quantize_comb_rd(&self.dcts[c], &mut self.levels[c], &mut self.dequant[c]);
            reconstruct_inter(&self.dequant[c], &pred[c], &mut self.recon[c]);
        }
        bits
    }

    /// Rebuilds the inter reconstruction from decoded `levels`.
    pub fn inter_decode(&mut self, pred: &[Tile; 3]) {
        for c in 0..3 {
            for (k, d) in self.dequant[c].iter_mut().enumerate() {
                *d = self.levels[c][k] * DEQUANT_TABLE[k >> 4];
            }
            reconstruct_inter(&self.dequant[c], &pred[c], &mut self.recon[c]);
        }
    }
}

/// Scratch buffers reused for every block an encoder codes.
#[derive(Debug, Clone)]
pub struct BlockWorkspace {
    pub source: [Tile; 3],
    pub pred: [Tile; 3],
    pub intra: BlockCoding,
    pub inter: BlockCoding,
}

impl Default for BlockWorkspace {
    fn default() -> Self {
        Self {
            source: [[0; 64]; 3],
            pred: [[0; 64]; 3],
            intra: BlockCoding::default(),
            inter: BlockCoding::default(),
        }
    }
}

/// Pixel origins of the 8x8 blocks of a frame, in raster order.
pub fn block_origins(width: u32, height: u32) -> impl Iterator<Item = (usize, usize)> {
    let columns = width as usize / 8;
    let rows = height as usize / 8;
    (0..rows).flat_map(move |by| (0..columns).map(move |bx| (bx * 8, by * 8)))
}

/// Copies the block at `(x, y)` of every plane into `tiles` (R, G, B).
pub fn load_block(frame: &Frame, x: usize, y: usize, tiles: &mut [Tile; 3]) {
    let stride = frame.width as usize;
    get_tile8(&frame.r, stride, x, y, &mut tiles[0]);
    get_tile8(&frame.g, stride, x, y, &mut tiles[1]);
    get_tile8(&frame.b, stride, x, y, &mut tiles[2]);
}

pub fn store_block(frame: &mut Frame, x: usize, y: usize, tiles: &[Tile; 3]) {
    let stride = frame.width as usize;
    set_tile8(&mut frame.r, stride, x, y, &tiles[0]);
    set_tile8(&mut frame.g, stride, x, y, &tiles[1]);
    set_tile8(&mut frame.b, stride, x, y, &tiles[2]);
}

fn intra_predictor(recon: &Tile, luma: Option<&Tile>, sb: SubBlock) -> [u8; 4] {
    let SubBlock { x3, y3, x2, y2 } = sb;
    if x3 + x2 == 0 && y3 + y2 == 0 {
        return match luma {
            Some(g) => get_tile_2x2_step2(g, STRIDE, 0, 0),
            None => [0; 4],
        };
    }
    let (x, y) = if x2 == 0 && y2 != 0 {
        (x3, y3 + y2 - 1)
    } else if x2 == 0 && x3 != 0 {
        (x3 - 4, y3 + y2)
    } else if x2 == 0 && y2 == 0 && y3 != 0 {
        (x3, y3 - 4)
    } else {
        (x2 + x3 - 1, y2 + y3)
    };
    get_tile_2x2_step2(recon, STRIDE, x, y)
}

#[inline]
fn difference(a: &[u8; 4], b: &[u8; 4]) -> [i32; 4] {
    std::array::from_fn(|k| a[k] as i32 - b[k] as i32)
}

fn intra_encode_channel(source: &Tile, luma: Option<&Tile>, comb: &mut Comb, recon: &mut Tile) {
    for (i, &sb) in SUB_BLOCKS.iter().enumerate() {
        let (x, y) = sb.origin();
        let data = get_tile_2x2_step2(source, STRIDE, x, y);
        let pred = intra_predictor(recon, luma, sb);
        let mut levels = [0; 4];
        quantize4(&forward_dct4(&difference(&data, &pred)), &mut levels);
        for (j, &level) in levels.iter().enumerate() {
            comb[j * 16 + i] = level;
        }
        set_tile_2x2_step2(recon, STRIDE, x, y, &inverse_dct4(&dequantize4(&levels), &pred));
    }
}

fn intra_decode_channel(comb: &Comb, luma: Option<&Tile>, recon: &mut Tile) {
    for (i, &sb) in SUB_BLOCKS.iter().enumerate() {
        let (x, y) = sb.origin();
        let pred = intra_predictor(recon, luma, sb);
        let levels = [comb[i], comb[16 + i], comb[32 + i], comb[48 + i]];
        set_tile_2x2_step2(recon, STRIDE, x, y, &inverse_dct4(&dequantize4(&levels), &pred));
    }
}

fn residual_dct(source: &Tile, pred: &Tile, dcts: &mut Comb) {
    for (i, &sb) in SUB_BLOCKS.iter().enumerate() {
        let (x, y) = sb.origin();
        let data = get_tile_2x2_step2(source, STRIDE, x, y);
        let p = get_tile_2x2_step2(pred, STRIDE, x, y);
        let d = forward_dct4(&difference(&data, &p));
        for (j, &v) in d.iter().enumerate() {
            dcts[j * 16 + i] = v;
        }
    }
}

fn reconstruct_inter(dequant: &Comb, pred: &Tile, recon: &mut Tile) {
    for (i, &sb) in SUB_BLOCKS.iter().enumerate() {
        let (x, y) = sb.origin();
        let p = get_tile_2x2_step2(pred, STRIDE, x, y);
        let d = [dequant[i], dequant[16 + i], dequant[32 + i], dequant[48 + i]];
        set_tile_2x2_step2(recon, STRIDE, x, y, &inverse_dct4(&d, &p));
    }
}
