#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    /// Reserved. Encoders refuse to produce it.
    B,
}

impl FrameType {
    /// Reads the type bit at the top of the first little-endian halfword.
    pub fn from_payload(data: &[u8]) -> Option<FrameType> {
        let high = *data.get(1)?;
        Some(if high & 0x80 == 0 { FrameType::I } else { FrameType::P })
    }

    pub fn is_key(self) -> bool {
        self == FrameType::I
    }
}

/// An encoded frame detached from the encoder's reference frames.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub frame_type: FrameType,
    pub frame_number: u64,
}
