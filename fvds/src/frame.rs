use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
}

impl Channel {
    /// Order in which block coefficients are written. R and B predict from G.
    pub const CODING_ORDER: [Channel; 3] = [Channel::G, Channel::R, Channel::B];
}

/// Planar RGB frame holding 5-bit samples stored `<< 3`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub r: Vec<u8>,
    pub g: Vec<u8>,
    pub b: Vec<u8>,
}

pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    Ok(())
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self::solid(width, height, 0, 0, 0)
    }

    /// A frame filled with one colour. Components are truncated to 5 bits.
    pub fn solid(width: u32, height: u32, r: u8, g: u8, b: u8) -> Self {
        let size = (width * height) as usize;
        Self {
            width,
            height,
            r: vec![r & 0xF8; size],
            g: vec![g & 0xF8; size],
            b: vec![b & 0xF8; size],
        }
    }

    pub fn plane(&self, channel: Channel) -> &[u8] {
        match channel {
            Channel::R => &self.r,
            Channel::G => &self.g,
            Channel::B => &self.b,
        }
    }

    pub fn plane_mut(&mut self, channel: Channel) -> &mut [u8] {
        match channel {
            Channel::R => &mut self.r,
            Channel::G => &mut self.g,
            Channel::B => &mut self.b,
        }
    }

    pub fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if self.width != width || self.height != height {
            return Err(Error::DimensionMismatch {
                expected_w: width,
                expected_h: height,
                got_w: self.width,
                got_h: self.height,
            });
        }
        Ok(())
    }

    pub fn copy_from(&mut self, other: &Frame) {
        self.width = other.width;
        self.height = other.height;
        self.r.clone_from(&other.r);
        self.g.clone_from(&other.g);
        self.b.clone_from(&other.b);
    }

    /// Packs the frame into native RGB555 words (`0bBBBBBGGGGGRRRRR`).
    pub fn to_rgb555(&self) -> Vec<u16> {
        self.r
            .iter()
            .zip(&self.g)
            .zip(&self.b)
            .map(|((&r, &g), &b)| (r >> 3) as u16 | ((g >> 3) as u16) << 5 | ((b >> 3) as u16) << 10)
            .collect()
    }
}
