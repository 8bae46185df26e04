#![forbid(unsafe_code)]

pub mod adpcm;
pub mod bitstream;
pub mod block;
pub mod convert;
pub mod dct;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod motion;
pub mod mux;
pub mod packet;
pub mod pipeline;
pub mod pool;
pub mod rdo;
pub mod source;
pub mod tile;
pub mod trellis;
pub mod vlc;
pub mod wav;
pub mod y4m;

pub use decoder::Decoder;
pub use encoder::{EncodedFrame, Encoder, EncoderConfig};
pub use error::{Error, Result};
pub use frame::Frame;
pub use mux::{ContainerHeader, ContainerReader, FrameRate};
pub use packet::{FrameType, Packet};
pub use pipeline::{PipelineConfig, encode_container};
pub use pool::{FramePool, RefFrame};
pub use source::{AudioSource, VideoSource};

/// Encodes `frames` in order with a single encoder.
pub fn encode_frames(frames: &[Frame], config: EncoderConfig) -> Result<Vec<Packet>> {
    let Some(first) = frames.first() else {
        return Ok(Vec::new());
    };

    let mut enc = Encoder::new(first.width, first.height, config)?;
    let mut packets = Vec::with_capacity(frames.len());
    for frame in frames {
        let mut input = enc.pool().acquire();
        frame.check_size(first.width, first.height)?;
        input.frame_mut()?.copy_from(frame);
        enc.send_frame(input)?;
        while let Some(encoded) = enc.receive_frame()? {
            packets.push(encoded.into_packet());
        }
    }

    enc.flush();
    while let Some(encoded) = enc.receive_frame()? {
        packets.push(encoded.into_packet());
    }
    Ok(packets)
}

/// Payload of a single I-frame filled with one colour.
pub fn encode_solid(width: u32, height: u32, r: u8, g: u8, b: u8) -> Result<Vec<u8>> {
    let frame = Frame::solid(width, height, r, g, b);
    let mut packets = encode_frames(std::slice::from_ref(&frame), EncoderConfig::default())?;
    Ok(packets.pop().map(|p| p.data).unwrap_or_default())
}
