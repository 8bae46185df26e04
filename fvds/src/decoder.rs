//! Frame decoder, the inverse of [`crate::encoder`].
//!
//! P-frames carry two streams back to back. The vector stream is parsed in
//! full first; the coefficient stream starts at the halfword after it.

use log::debug;

use crate::bitstream::BitReader;
use crate::block::{BlockCoding, block_origins, store_block};
use crate::error::{Error, Result};
use crate::frame::{Channel, Frame};
use crate::motion::{MotionVector, VectorPredictor};
use crate::packet::FrameType;
use crate::pool::{FramePool, RefFrame};
use crate::tile::{Tile, get_tile_half8};
use crate::vlc::decode_dct;

pub struct Decoder {
    width: u32,
    height: u32,
    pool: FramePool,
    reference: Option<RefFrame>,
    quantizer: Option<u8>,
    coding: Box<BlockCoding>,
    vectors: Vec<MotionVector>,
}

impl Decoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pool = FramePool::new(width, height)?;
        Ok(Self {
            width,
            height,
            pool,
            reference: None,
            quantizer: None,
            coding: Box::default(),
            vectors: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Quantizer of the most recent I-frame.
    pub fn quantizer(&self) -> Option<u8> {
        self.quantizer
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Decodes one payload. The returned frame also becomes the reference
    /// for the next P-frame.
    pub fn decode(&mut self, data: &[u8]) -> Result<RefFrame> {
        let frame_type = FrameType::from_payload(data)
            .ok_or_else(|| Error::Bitstream(format!("payload of {} bytes is too short", data.len())))?;

        let mut output = self.pool.acquire();
        let target = output.frame_mut()?;
        match frame_type {
            FrameType::P => {
                let reference = self
                    .reference
                    .clone()
                    .ok_or_else(|| Error::Bitstream("P-frame without a reference".into()))?;
                self.decode_p_frame(data, &reference, target)?;
            }
            _ => self.decode_i_frame(data, target)?,
        }
        debug!("decoded {:?} frame of {} bytes", frame_type, data.len());

        self.reference = Some(output.clone());
        Ok(output)
    }

    /// Forgets the reference frame, as after a seek.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    fn decode_i_frame(&mut self, data: &[u8], target: &mut Frame) -> Result<()> {
        let mut reader = BitReader::new(data);
        reader.skip_bits(1);
        self.quantizer = Some(reader.read_bits(6) as u8);

        let mut last_g_dc = 0;
        for (x, y) in block_origins(self.width, self.height) {
            let coding = &mut self.coding;
            for channel in Channel::CODING_ORDER {
                decode_dct(&mut reader, coding.levels_mut(channel))?;
            }
            let g = coding.levels_mut(Channel::G);
            g[0] += last_g_dc;
            last_g_dc = g[0];

            coding.intra_decode();
            store_block(target, x, y, &coding.recon);
        }
        Ok(())
    }

    fn decode_p_frame(&mut self, data: &[u8], reference: &Frame, target: &mut Frame) -> Result<()> {
        let columns = (self.width / 8) as usize;
        let mut reader = BitReader::new(data);
        reader.skip_bits(1);

        self.vectors.clear();
        let mut predictor = VectorPredictor::new(columns);
        for (i, _) in block_origins(self.width, self.height).enumerate() {
            let column = i % columns;
            if column == 0 && i > 0 {
                predictor.next_row();
            }
            let pred = predictor.predict(column);
            let vector = if reader.read_bit() {
                pred
            } else {
                let dx = reader.read_signed_varint()?;
                let dy = reader.read_signed_varint()?;
                pred + MotionVector::new(dx, dy)
            };
            predictor.store(column, vector);
            self.vectors.push(vector);
        }

        let start = reader.consumed_halfword_bytes().min(data.len());
        let mut reader = BitReader::new(&data[start..]);
        let (width, height) = (self.width as usize, self.height as usize);
        let mut pred: [Tile; 3] = [[0; 64]; 3];
        for ((x, y), &vector) in block_origins(self.width, self.height).zip(&self.vectors) {
            let coding = &mut self.coding;
            if reader.read_bit() {
                for channel in Channel::CODING_ORDER {
                    decode_dct(&mut reader, coding.levels_mut(channel))?;
                }
                coding.intra_decode();
            } else {
                let absolute = vector + MotionVector::new(2 * x as i32, 2 * y as i32);
                let planes = [&reference.r, &reference.g, &reference.b];
                for (plane, tile) in planes.into_iter().zip(&mut pred) {
                    get_tile_half8(plane, width, height, absolute.x, absolute.y, tile);
                }
                for channel in Channel::CODING_ORDER {
                    let levels = coding.levels_mut(channel);
                    if reader.read_bit() {
                        decode_dct(&mut reader, levels)?;
                    } else {
                        levels.fill(0);
                    }
                }
                coding.inter_decode(&pred);
            }
            store_block(target, x, y, &coding.recon);
        }
        Ok(())
    }
}
