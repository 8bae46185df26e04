use std::collections::VecDeque;

use log::{debug, warn};

use crate::bitstream::BitWriter;
use crate::block::{BlockWorkspace, block_origins, load_block, store_block};
use crate::error::{Error, Result};
use crate::frame::{Channel, Frame, validate_dimensions};
use crate::motion::{MotionVector, VectorPredictor, find_motion_vector};
use crate::packet::{FrameType, Packet};
use crate::pool::{FramePool, RefFrame};
use crate::rdo::{intra_block_threshold, prefer_intra};
use crate::tile::{get_tile_half8, sad64};
use crate::vlc::encode_dct;

pub const DEFAULT_QUANTIZER: u8 = 30;
pub const DEFAULT_MAX_GOP_LENGTH: u32 = 250;
const MAX_QUANTIZER: u8 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Written into every I-frame header. Quantization itself is fixed.
    pub quantizer: u8,
    /// Frames per GOP, counting the I-frame that opens it.
    pub max_gop_length: u32,
    /// Must be 0.
    pub max_b_length: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quantizer: DEFAULT_QUANTIZER,
            max_gop_length: DEFAULT_MAX_GOP_LENGTH,
            max_b_length: 0,
        }
    }
}

/// One encoded frame together with its reconstruction.
///
/// `reconstructed` is the same buffer the encoder keeps as its next
/// reference, so holding on to it keeps that buffer out of the pool.
#[derive(Debug)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub reconstructed: RefFrame,
    pub frame_type: FrameType,
    pub frame_number: u64,
}

impl EncodedFrame {
    /// Drops the reconstruction and keeps what a muxer needs.
    pub fn into_packet(self) -> Packet {
        Packet {
            data: self.data,
            frame_type: self.frame_type,
            frame_number: self.frame_number,
        }
    }
}

struct Queued {
    frame: RefFrame,
    force_i: bool,
}

/// Pull-based I/P frame encoder.
///
/// Frames go in through [`Encoder::send_frame`] and come out of
/// [`Encoder::receive_frame`] in the same order.
pub struct Encoder {
    config: EncoderConfig,
    width: u32,
    height: u32,
    pool: FramePool,
    queue: VecDeque<Queued>,
    reference: Option<RefFrame>,
    gop: u32,
    frame_number: u64,
    flushing: bool,
    intra_threshold: u32,
    workspace: Box<BlockWorkspace>,
}

impl Encoder {
    pub fn new(width: u32, height: u32, config: EncoderConfig) -> Result<Self> {
        validate_dimensions(width, height)?;
        if config.max_b_length > 0 {
            return Err(Error::BFramesUnsupported(config.max_b_length));
        }
        if config.quantizer > MAX_QUANTIZER {
            return Err(Error::InvalidQuantizer(config.quantizer));
        }

        Ok(Self {
            config,
            width,
            height,
            pool: FramePool::new(width, height)?,
            queue: VecDeque::new(),
            reference: None,
            gop: 0,
            frame_number: 0,
            flushing: false,
            intra_threshold: intra_block_threshold(width, height),
            workspace: Box::default(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Pool that input frames should be acquired from.
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn send_frame(&mut self, frame: RefFrame) -> Result<()> {
        self.send_frame_forced(frame, false)
    }

    /// Queues `frame`, optionally forcing it to be coded as an I-frame.
    pub fn send_frame_forced(&mut self, frame: RefFrame, force_i: bool) -> Result<()> {
        if self.flushing {
            return Err(Error::SendAfterFlush);
        }
        frame.check_size(self.width, self.height)?;
        self.queue.push_back(Queued { frame, force_i });
        Ok(())
    }

    pub fn flush(&mut self) {
        self.flushing = true;
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Encodes the oldest queued frame. Returns `Ok(None)` when nothing is queued.
    pub fn receive_frame(&mut self) -> Result<Option<EncodedFrame>> {
        let Some(Queued { frame: input, force_i }) = self.queue.pop_front() else {
            return Ok(None);
        };

        let mut recon = self.pool.acquire();
        let target = recon.frame_mut()?;
        let ws = &mut self.workspace;

        let reference = match &self.reference {
            Some(r) if !force_i && self.gop + 1 < self.config.max_gop_length => Some(r.clone()),
            _ => None,
        };

        let mut coded = None;
        if let Some(reference) = reference {
            let (payload, intra_blocks) = encode_p_frame(ws, &input, &reference, target);
            if intra_blocks > self.intra_threshold {
                warn!(
                    "frame {}: {intra_blocks} intra blocks exceed {}, coding an I-frame",
                    self.frame_number, self.intra_threshold
                );
            } else {
                coded = Some((payload, FrameType::P, intra_blocks));
            }
        }

        let (data, frame_type, intra_blocks) = match coded {
            Some(p) => {
                self.gop += 1;
                p
            }
            None => {
                self.gop = 0;
                let payload = encode_i_frame(ws, self.config.quantizer, &input, target);
                (payload, FrameType::I, self.block_count())
            }
        };
        input.release();

        debug!(
            "frame {}: {:?}, {} bytes, {intra_blocks} intra blocks",
            self.frame_number,
            frame_type,
            data.len()
        );

        self.reference = Some(recon.clone());
        let frame_number = self.frame_number;
        self.frame_number += 1;

        Ok(Some(EncodedFrame {
            data,
            reconstructed: recon,
            frame_type,
            frame_number,
        }))
    }

    fn block_count(&self) -> u32 {
        (self.width / 8) * (self.height / 8)
    }
}

fn encode_i_frame(ws: &mut BlockWorkspace, quantizer: u8, input: &Frame, recon: &mut Frame) -> Vec<u8> {
    let mut out = BitWriter::new();
    out.write_bit(false);
    out.write_bits(quantizer as u32, 6);

    let mut last_g_dc = 0;
    for (x, y) in block_origins(input.width, input.height) {
        load_block(input, x, y, &mut ws.source);
        ws.intra.intra_encode(&ws.source);

        let mut g = *ws.intra.levels(Channel::G);
        let dc = g[0];
        g[0] -= last_g_dc;
        last_g_dc = dc;
        encode_dct(&g, &mut out);
        encode_dct(ws.intra.levels(Channel::R), &mut out);
        encode_dct(ws.intra.levels(Channel::B), &mut out);

        store_block(recon, x, y, &ws.intra.recon);
    }
    out.finalize()
}

/// Returns the payload and the number of intra-coded blocks.
fn encode_p_frame(ws: &mut BlockWorkspace, input: &Frame, reference: &Frame, recon: &mut Frame) -> (Vec<u8>, u32) {
    let width = reference.width as usize;
    let height = reference.height as usize;
    let mut vectors = BitWriter::new();
    let mut coefficients = BitWriter::new();
    vectors.write_bit(true);

    let mut predictor = VectorPredictor::new(width / 8);
    let mut intra_blocks = 0;
    for (x, y) in block_origins(input.width, input.height) {
        let bx = x / 8;
        if bx == 0 && y > 0 {
            predictor.next_row();
        }
        load_block(input, x, y, &mut ws.source);

        let pred = predictor.predict(bx);
        let center = MotionVector::new(2 * x as i32, 2 * y as i32);
        let search = find_motion_vector(&ws.source, reference, center, pred + center);
        let absolute = search.vector;
        let planes = [&reference.r, &reference.g, &reference.b];
        for (plane, tile) in planes.into_iter().zip(&mut ws.pred) {
            get_tile_half8(plane, width, height, absolute.x, absolute.y, tile);
        }
        let vector = absolute - center;

        let intra_bits = 1 + ws.intra.intra_encode(&ws.source);
        let mut inter_bits = 1 + ws.inter.inter_encode(&ws.source, &ws.pred);
        if vector != pred {
            inter_bits += vector.delta_bits(pred);
        }
        let intra_sad: u32 = (0..3).map(|c| sad64(&ws.intra.recon[c], &ws.source[c])).sum();
        let inter_sad: u32 = (0..3).map(|c| sad64(&ws.inter.recon[c], &ws.source[c])).sum();

        if prefer_intra(intra_bits, intra_sad, inter_bits, inter_sad) {
            intra_blocks += 1;
            vectors.write_bit(true);
            predictor.store(bx, pred);

            coefficients.write_bit(true);
            for channel in Channel::CODING_ORDER {
                encode_dct(ws.intra.levels(channel), &mut coefficients);
            }
            store_block(recon, x, y, &ws.intra.recon);
        } else {
            if vector == pred {
                vectors.write_bit(true);
            } else {
                vectors.write_bit(false);
                vectors.write_signed_varint(vector.x - pred.x);
                vectors.write_signed_varint(vector.y - pred.y);
            }
            predictor.store(bx, vector);

            coefficients.write_bit(false);
            for channel in Channel::CODING_ORDER {
                if ws.inter.channel_is_zero(channel) {
                    coefficients.write_bit(false);
                } else {
                    coefficients.write_bit(true);
                    encode_dct(ws.inter.levels(channel), &mut coefficients);
                }
            }
            store_block(recon, x, y, &ws.inter.recon);
        }
    }

    let mut payload = vectors.finalize();
    payload.extend_from_slice(&coefficients.finalize());
    (payload, intra_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(enc: &Encoder, r: u8, g: u8, b: u8) -> RefFrame {
        let mut frame = enc.pool().acquire();
        *frame.frame_mut().unwrap() = Frame::solid(enc.width(), enc.height(), r, g, b);
        frame
    }

    fn encode_one(enc: &mut Encoder, frame: RefFrame) -> EncodedFrame {
        enc.send_frame(frame).unwrap();
        enc.receive_frame().unwrap().unwrap()
    }

    #[test]
    fn new_valid_dimensions() {
        let enc = Encoder::new(64, 48, EncoderConfig::default()).unwrap();
        assert_eq!(enc.width(), 64);
        assert_eq!(enc.height(), 48);
        assert_eq!(enc.config().quantizer, 30);
        assert_eq!(enc.config().max_gop_length, 250);
    }

    #[test]
    fn new_invalid_width_zero() {
        match Encoder::new(0, 64, EncoderConfig::default()) {
            Err(Error::InvalidDimensions { width, height }) => {
                assert_eq!(width, 0);
                assert_eq!(height, 64);
            }
            _ => panic!("expected InvalidDimensions"),
        }
    }

    #[test]
    fn new_invalid_height_not_multiple_of_eight() {
        assert!(Encoder::new(64, 60, EncoderConfig::default()).is_err());
    }

    #[test]
    fn b_frames_are_rejected() {
        let config = EncoderConfig {
            max_b_length: 2,
            ..Default::default()
        };
        assert!(matches!(Encoder::new(64, 64, config), Err(Error::BFramesUnsupported(2))));
    }

    #[test]
    fn quantizer_must_fit_header() {
        let config = EncoderConfig {
            quantizer: 64,
            ..Default::default()
        };
        assert!(matches!(Encoder::new(64, 64, config), Err(Error::InvalidQuantizer(64))));
    }

    #[test]
    fn send_frame_receive_frame_lifecycle() {
        let mut enc = Encoder::new(64, 64, EncoderConfig::default()).unwrap();
        assert!(enc.receive_frame().unwrap().is_none());

        let frame = solid(&enc, 128, 128, 128);
        enc.send_frame(frame).unwrap();
        assert!(!enc.is_queue_empty());
        let encoded = enc.receive_frame().unwrap().unwrap();

        assert_eq!(encoded.frame_type, FrameType::I);
        assert_eq!(encoded.frame_number, 0);
        assert!(!encoded.data.is_empty());
        assert!(enc.is_queue_empty());
        assert!(enc.receive_frame().unwrap().is_none());
    }

    #[test]
    fn i_frame_header() {
        let config = EncoderConfig {
            quantizer: 45,
            ..Default::default()
        };
        let mut enc = Encoder::new(16, 16, config).unwrap();
        let frame = solid(&enc, 0, 0, 0);
        let encoded = encode_one(&mut enc, frame);
        let first = u16::from_le_bytes([encoded.data[0], encoded.data[1]]);
        assert_eq!(first >> 15, 0);
        assert_eq!((first >> 9) & 0x3F, 45);
    }

    #[test]
    fn solid_i_frame_reconstructs_exactly() {
        let mut enc = Encoder::new(32, 16, EncoderConfig::default()).unwrap();
        let frame = solid(&enc, 200, 40, 248);
        let expected = frame.frame().clone();
        let encoded = encode_one(&mut enc, frame);
        assert_eq!(*encoded.reconstructed.frame(), expected);
    }

    #[test]
    fn second_frame_is_inter() {
        let mut enc = Encoder::new(64, 64, EncoderConfig::default()).unwrap();
        let first = solid(&enc, 128, 128, 128);
        encode_one(&mut enc, first);

        let second = solid(&enc, 128, 128, 128);
        let encoded = encode_one(&mut enc, second);
        assert_eq!(encoded.frame_type, FrameType::P);
        assert_eq!(encoded.frame_number, 1);
    }

    #[test]
    fn identical_frames_code_only_mode_bits() {
        let mut enc = Encoder::new(16, 16, EncoderConfig::default()).unwrap();
        let first = solid(&enc, 80, 160, 24);
        encode_one(&mut enc, first);

        let second = solid(&enc, 80, 160, 24);
        let encoded = encode_one(&mut enc, second);
        // vectors: P bit + four "predicted" bits; coefficients: four "0000" blocks
        assert_eq!(encoded.data, vec![0x00, 0xF8, 0x00, 0x00]);
        assert_eq!(FrameType::from_payload(&encoded.data), Some(FrameType::P));
    }

    #[test]
    fn max_gop_length_counts_the_i_frame() {
        let config = EncoderConfig {
            max_gop_length: 3,
            ..Default::default()
        };
        let mut enc = Encoder::new(64, 64, config).unwrap();
        let expected = [
            FrameType::I,
            FrameType::P,
            FrameType::P,
            FrameType::I,
            FrameType::P,
        ];
        for want in expected {
            let frame = solid(&enc, 128, 128, 128);
            assert_eq!(encode_one(&mut enc, frame).frame_type, want);
        }
    }

    #[test]
    fn gop_of_one_is_all_i_frames() {
        let config = EncoderConfig {
            max_gop_length: 1,
            ..Default::default()
        };
        let mut enc = Encoder::new(256, 16, config).unwrap();
        for _ in 0..4 {
            let frame = solid(&enc, 8, 64, 200);
            let encoded = encode_one(&mut enc, frame);
            assert_eq!(encoded.frame_type, FrameType::I);
            assert_eq!(encoded.data[1] & 0x80, 0);
        }
    }

    #[test]
    fn forced_i_frame() {
        let mut enc = Encoder::new(32, 32, EncoderConfig::default()).unwrap();
        let a = solid(&enc, 10, 20, 30);
        let b = solid(&enc, 10, 20, 30);
        let c = solid(&enc, 10, 20, 30);
        enc.send_frame(a).unwrap();
        enc.send_frame_forced(b, true).unwrap();
        enc.send_frame(c).unwrap();
        let types: Vec<_> = std::iter::from_fn(|| enc.receive_frame().unwrap())
            .map(|f| f.frame_type)
            .collect();
        assert_eq!(types, [FrameType::I, FrameType::I, FrameType::P]);
    }

    #[test]
    fn scene_change_falls_back_to_i_frame() {
        let mut enc = Encoder::new(64, 64, EncoderConfig::default()).unwrap();
        let black = solid(&enc, 0, 0, 0);
        encode_one(&mut enc, black);

        let white = solid(&enc, 248, 248, 248);
        let encoded = encode_one(&mut enc, white);
        assert_eq!(encoded.frame_type, FrameType::I);
        assert_eq!(encoded.frame_number, 1);

        // the fallback opens a new GOP
        let white = solid(&enc, 248, 248, 248);
        assert_eq!(encode_one(&mut enc, white).frame_type, FrameType::P);
    }

    #[test]
    fn dimension_mismatch_error() {
        let mut enc = Encoder::new(64, 64, EncoderConfig::default()).unwrap();
        let wrong = RefFrame::detached(Frame::solid(128, 128, 128, 128, 128));
        match enc.send_frame(wrong) {
            Err(Error::DimensionMismatch {
                expected_w,
                expected_h,
                got_w,
                got_h,
            }) => {
                assert_eq!((expected_w, expected_h), (64, 64));
                assert_eq!((got_w, got_h), (128, 128));
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn send_after_flush_fails() {
        let mut enc = Encoder::new(16, 16, EncoderConfig::default()).unwrap();
        let a = solid(&enc, 0, 0, 0);
        enc.send_frame(a).unwrap();
        enc.flush();
        let b = solid(&enc, 0, 0, 0);
        assert!(matches!(enc.send_frame(b), Err(Error::SendAfterFlush)));
        // queued frames still drain
        assert!(enc.receive_frame().unwrap().is_some());
        assert!(enc.receive_frame().unwrap().is_none());
    }

    #[test]
    fn frame_numbers_increment() {
        let mut enc = Encoder::new(32, 32, EncoderConfig::default()).unwrap();
        for i in 0..5u64 {
            let frame = solid(&enc, 64, 64, 64);
            assert_eq!(encode_one(&mut enc, frame).frame_number, i);
        }
    }

    #[test]
    fn pool_balances_after_encoding() {
        let mut enc = Encoder::new(32, 32, EncoderConfig::default()).unwrap();
        for _ in 0..6 {
            let frame = solid(&enc, 64, 32, 16);
            encode_one(&mut enc, frame);
        }
        // only the reference stays out
        assert_eq!(enc.pool().outstanding(), 1);
        assert!(enc.pool().allocated() <= 3);
    }

    #[test]
    fn reconstruction_is_the_reference() {
        let mut enc = Encoder::new(16, 16, EncoderConfig::default()).unwrap();
        let frame = solid(&enc, 8, 8, 8);
        let encoded = encode_one(&mut enc, frame);
        assert_eq!(encoded.reconstructed.ref_count(), 2);
        let packet = encoded.into_packet();
        assert_eq!(packet.frame_type, FrameType::I);
        assert_eq!(enc.pool().outstanding(), 1);
    }
}
