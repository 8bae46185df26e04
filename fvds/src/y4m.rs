use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use log::warn;

use crate::convert::{dither_rgba, yuv420_to_rgba};
use crate::error::{Error, Result};
use crate::frame::validate_dimensions;
use crate::mux::FrameRate;
use crate::pool::{FramePool, RefFrame};
use crate::source::VideoSource;

const MAGIC: &str = "YUV4MPEG2";
const FRAME_MARKER: &[u8] = b"FRAME";
const NATIVE_WIDTH: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

impl Y4mHeader {
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(MAGIC) {
            return Err(Error::InvalidY4m("not a YUV4MPEG2 stream".into()));
        }

        let mut width = 0u32;
        let mut height = 0u32;
        let mut frame_rate = FrameRate::new(25, 1);
        for token in tokens {
            let Some((key, val)) = token.split_at_checked(1) else {
                continue;
            };
            match key {
                "W" => width = parse_number(val, "width")?,
                "H" => height = parse_number(val, "height")?,
                "F" => {
                    let (num, den) = val
                        .split_once(':')
                        .ok_or_else(|| Error::InvalidY4m(format!("bad frame rate {val:?}")))?;
                    frame_rate = FrameRate::new(parse_number(num, "frame rate")?, parse_number(den, "frame rate")?);
                    if frame_rate.num == 0 || frame_rate.den == 0 {
                        return Err(Error::InvalidY4m(format!("bad frame rate {val:?}")));
                    }
                }
                "C" => {
                    if !matches!(val, "420" | "420jpeg" | "420paldv" | "420mpeg2") {
                        return Err(Error::InvalidY4m(format!("unsupported colorspace C{val}")));
                    }
                }
                _ => {}
            }
        }

        if width == 0 || height == 0 {
            return Err(Error::InvalidY4m("missing W/H in header".into()));
        }
        Ok(Self {
            width,
            height,
            frame_rate,
        })
    }

    pub fn luma_size(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn chroma_size(&self) -> usize {
        (self.width.div_ceil(2) * self.height.div_ceil(2)) as usize
    }

    /// Bytes of pixel data per frame.
    pub fn frame_size(&self) -> usize {
        self.luma_size() + 2 * self.chroma_size()
    }
}

fn parse_number(val: &str, what: &str) -> Result<u32> {
    val.parse()
        .map_err(|_| Error::InvalidY4m(format!("invalid {what} {val:?}")))
}

/// YUV 4:2:0 planes of one frame.
#[derive(Debug, Clone)]
pub struct FramePixels {
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FramePixels {
    pub fn new(width: u32, height: u32) -> Self {
        Self::solid(width, height, 16, 128, 128)
    }

    pub fn solid(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let y_size = (width * height) as usize;
        let uv_size = (width.div_ceil(2) * height.div_ceil(2)) as usize;
        Self {
            y: vec![y; y_size],
            u: vec![u; uv_size],
            v: vec![v; uv_size],
            width,
            height,
        }
    }

    /// Converts to RGBA8888 in `rgba`, resizing it as needed.
    pub fn to_rgba(&self, rgba: &mut Vec<u8>) {
        let (w, h) = (self.width as usize, self.height as usize);
        rgba.resize(w * h * 4, 0);
        yuv420_to_rgba(&self.y, &self.u, &self.v, w, h, rgba);
    }
}

/// Header plus the byte offset of every frame's pixel data.
#[derive(Debug, Clone)]
pub struct Y4mIndex {
    pub header: Y4mHeader,
    pub frame_offsets: Vec<u64>,
}

impl Y4mIndex {
    pub fn scan<R: BufRead + Seek>(reader: &mut R) -> Result<Self> {
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            return Err(Error::InvalidY4m("no header line".into()));
        }
        let text = std::str::from_utf8(&line[..line.len() - 1])
            .map_err(|_| Error::InvalidY4m("header is not UTF-8".into()))?;
        let header = Y4mHeader::parse(text)?;

        let frame_size = header.frame_size() as u64;
        let mut position = line.len() as u64;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(position))?;

        let mut frame_offsets = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if !line.starts_with(FRAME_MARKER) || line.last() != Some(&b'\n') {
                return Err(Error::InvalidY4m(format!("expected FRAME at byte {position}")));
            }
            let start = position + n as u64;
            if start + frame_size > end {
                warn!("dropping truncated Y4M frame {}", frame_offsets.len());
                break;
            }
            frame_offsets.push(start);
            position = start + frame_size;
            reader.seek(SeekFrom::Start(position))?;
        }

        Ok(Self {
            header,
            frame_offsets,
        })
    }

    pub fn scan_file(path: &Path) -> Result<Self> {
        Self::scan(&mut BufReader::new(File::open(path)?))
    }

    pub fn frame_count(&self) -> usize {
        self.frame_offsets.len()
    }
}

/// Serves the frames of one index range, dithered to 5 bits.
pub struct Y4mSource<R> {
    reader: R,
    header: Y4mHeader,
    offsets: Vec<u64>,
    next: usize,
    pixels: FramePixels,
    rgba: Vec<u8>,
}

impl<R: Read + Seek> Y4mSource<R> {
    pub fn new(reader: R, index: &Y4mIndex, range: Range<usize>) -> Result<Self> {
        let header = index.header.clone();
        validate_dimensions(header.width, header.height)?;
        if header.width != NATIVE_WIDTH {
            warn!(
                "video is {} pixels wide; the handheld player expects {NATIVE_WIDTH}",
                header.width
            );
        }
        let offsets = index
            .frame_offsets
            .get(range.clone())
            .ok_or_else(|| Error::InvalidY4m(format!("frame range {range:?} out of bounds")))?
            .to_vec();
        Ok(Self {
            reader,
            pixels: FramePixels::new(header.width, header.height),
            header,
            offsets,
            next: 0,
            rgba: Vec::new(),
        })
    }

    pub fn header(&self) -> &Y4mHeader {
        &self.header
    }

    fn read_pixels(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(&mut self.pixels.y)?;
        self.reader.read_exact(&mut self.pixels.u)?;
        self.reader.read_exact(&mut self.pixels.v)?;
        Ok(())
    }
}

impl Y4mSource<BufReader<File>> {
    pub fn open(path: &Path, index: &Y4mIndex, range: Range<usize>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?), index, range)
    }
}

impl<R: Read + Seek> VideoSource for Y4mSource<R> {
    fn next_video_frame(&mut self, pool: &FramePool) -> Result<Option<RefFrame>> {
        let Some(&offset) = self.offsets.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        self.read_pixels(offset)?;
        self.pixels.to_rgba(&mut self.rgba);

        let mut frame = pool.acquire();
        let stride = self.header.width as usize * 4;
        dither_rgba(&self.rgba, stride, frame.frame_mut()?)?;
        Ok(Some(frame))
    }
}
