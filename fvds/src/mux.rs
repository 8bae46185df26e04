//! FVDS container: header, frame records and interleaved audio.
//!
//! Layout:
//!
//! ```text
//! 0x00  "FVDS"
//! 0x04  u16 width, u16 height
//! 0x08  u32 fps numerator, u32 fps denominator
//! 0x10  u16 audio rate, u16 audio channels
//! 0x14  u32 frame count, u32 key-frame count
//! 0x1C  key-frame count x (u32 frame, u32 record offset)
//! ```
//!
//! Each record is a `u32` size field (`padded payload length | audio blocks << 17`),
//! the payload padded to 4 bytes, then one left and one right ADPCM block per
//! audio block.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::adpcm::{self, AdpcmState};
use crate::error::{Error, Result};
use crate::packet::{FrameType, Packet};
use crate::source::AudioSource;

pub const MAGIC: [u8; 4] = *b"FVDS";
pub const HEADER_SIZE: usize = 0x1C;
pub const KEY_FRAME_ENTRY_SIZE: usize = 8;
pub const AUDIO_CHANNELS: u16 = 2;
/// Samples per channel in one audio block.
pub const AUDIO_BLOCK_SAMPLES: usize = 256;
/// Bytes of one channel's ADPCM block, header included.
pub const AUDIO_BLOCK_BYTES: usize = 4 + AUDIO_BLOCK_SAMPLES / 2;

const SIZE_MASK: u32 = 0x1FFFF;
const AUDIO_SHIFT: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFrame {
    pub frame: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub width: u16,
    pub height: u16,
    pub frame_rate: FrameRate,
    /// 0 when the stream carries no audio.
    pub audio_rate: u16,
    pub audio_channels: u16,
    pub frame_count: u32,
    pub key_frames: Vec<KeyFrame>,
}

impl ContainerHeader {
    /// Byte size of the header, which is also the offset of the first record.
    pub fn size(&self) -> usize {
        HEADER_SIZE + KEY_FRAME_ENTRY_SIZE * self.key_frames.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u16::<LittleEndian>(self.width)?;
        w.write_u16::<LittleEndian>(self.height)?;
        w.write_u32::<LittleEndian>(self.frame_rate.num)?;
        w.write_u32::<LittleEndian>(self.frame_rate.den)?;
        w.write_u16::<LittleEndian>(self.audio_rate)?;
        w.write_u16::<LittleEndian>(self.audio_channels)?;
        w.write_u32::<LittleEndian>(self.frame_count)?;
        w.write_u32::<LittleEndian>(self.key_frames.len() as u32)?;
        for key in &self.key_frames {
            w.write_u32::<LittleEndian>(key.frame)?;
            w.write_u32::<LittleEndian>(key.offset)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidContainer(format!("bad magic {magic:02X?}")));
        }
        let width = r.read_u16::<LittleEndian>()?;
        let height = r.read_u16::<LittleEndian>()?;
        let num = r.read_u32::<LittleEndian>()?;
        let den = r.read_u32::<LittleEndian>()?;
        if num == 0 || den == 0 {
            return Err(Error::InvalidContainer(format!("frame rate {num}/{den}")));
        }
        let audio_rate = r.read_u16::<LittleEndian>()?;
        let audio_channels = r.read_u16::<LittleEndian>()?;
        let frame_count = r.read_u32::<LittleEndian>()?;
        let key_count = r.read_u32::<LittleEndian>()?;
        if key_count > frame_count {
            return Err(Error::InvalidContainer(format!(
                "{key_count} key frames in {frame_count} frames"
            )));
        }
        let key_frames = (0..key_count)
            .map(|_| {
                Ok(KeyFrame {
                    frame: r.read_u32::<LittleEndian>()?,
                    offset: r.read_u32::<LittleEndian>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            width,
            height,
            frame_rate: FrameRate::new(num, den),
            audio_rate,
            audio_channels,
            frame_count,
            key_frames,
        })
    }
}

/// Audio blocks that belong to output frame `frame`.
///
/// Blocks are handed out so that the audio written up to a frame never
/// runs ahead of that frame's end time.
pub fn audio_blocks_for_frame(audio_rate: u32, frame_rate: FrameRate, frame: u64) -> u32 {
    let rate = audio_rate as i64;
    let (num, den) = (frame_rate.num as i64, frame_rate.den as i64);
    if num == 0 {
        return 0;
    }
    let block = AUDIO_BLOCK_SAMPLES as i64;
    let n = frame as i64;
    let expected = rate * (n + 1) * den / num;
    let written = (rate * n * den / num) / block * block;
    ((expected - written).max(0) / block) as u32
}

/// Writes frame records, leaving audio blocks zeroed for [`fill_audio`].
pub struct RecordWriter<W: Write> {
    inner: W,
    position: u64,
    next_frame: u64,
    audio_rate: u32,
    frame_rate: FrameRate,
    key_frames: Vec<KeyFrame>,
}

impl<W: Write> RecordWriter<W> {
    /// `first_frame` is the stream-wide number of the first record written.
    pub fn new(inner: W, audio_rate: u32, frame_rate: FrameRate, first_frame: u64) -> Self {
        Self {
            inner,
            position: 0,
            next_frame: first_frame,
            audio_rate,
            frame_rate,
            key_frames: Vec::new(),
        }
    }

    /// Appends one record and returns its audio block count.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<u32> {
        let padded = (packet.data.len() + 3) & !3;
        if padded > SIZE_MASK as usize {
            return Err(Error::InvalidContainer(format!("frame of {padded} bytes does not fit a record")));
        }
        let audio_blocks = audio_blocks_for_frame(self.audio_rate, self.frame_rate, self.next_frame);
        if packet.frame_type.is_key() {
            self.key_frames.push(KeyFrame {
                frame: self.next_frame as u32,
                offset: self.position as u32,
            });
        }

        let size_field = (padded as u32 & SIZE_MASK) | (audio_blocks << AUDIO_SHIFT);
        self.inner.write_u32::<LittleEndian>(size_field)?;
        self.inner.write_all(&packet.data)?;
        self.inner.write_all(&[0; 3][..padded - packet.data.len()])?;
        let audio_bytes = audio_blocks as usize * 2 * AUDIO_BLOCK_BYTES;
        self.inner.write_all(&vec![0; audio_bytes])?;

        self.position += (4 + padded + audio_bytes) as u64;
        self.next_frame += 1;
        Ok(audio_blocks)
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the sink and the key frames, with offsets relative to the
    /// first record this writer produced.
    pub fn finish(self) -> (W, Vec<KeyFrame>) {
        (self.inner, self.key_frames)
    }
}

/// Encodes audio into the zeroed blocks of `frame_count` records starting at
/// the current position of `stream`.
///
/// Both channels thread their ADPCM state through the whole stream and every
/// block repeats it in a header.
pub fn fill_audio<S, A>(stream: &mut S, frame_count: u32, audio: &mut A) -> Result<()>
where
    S: Read + Write + Seek,
    A: AudioSource + ?Sized,
{
    let mut left = [0i16; AUDIO_BLOCK_SAMPLES];
    let mut right = [0i16; AUDIO_BLOCK_SAMPLES];
    let mut left_state: Option<AdpcmState> = None;
    let mut right_state: Option<AdpcmState> = None;
    let mut total_blocks = 0u64;

    for _ in 0..frame_count {
        let size_field = stream.read_u32::<LittleEndian>()?;
        stream.seek(SeekFrom::Current((size_field & SIZE_MASK) as i64))?;
        for _ in 0..size_field >> AUDIO_SHIFT {
            left.fill(0);
            right.fill(0);
            audio.next_audio_samples(&mut left, &mut right)?;

            let (data, state) = adpcm::encode_with_state(&left, left_state, true)?;
            stream.write_all(&data)?;
            left_state = Some(state);
            let (data, state) = adpcm::encode_with_state(&right, right_state, true)?;
            stream.write_all(&data)?;
            right_state = Some(state);
            total_blocks += 1;
        }
    }
    debug!("encoded {total_blocks} audio blocks");
    Ok(())
}

/// One frame record as stored in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub index: u32,
    pub offset: u64,
    pub frame_type: FrameType,
    /// Payload length including padding.
    pub size: u32,
    pub audio_blocks: u32,
    pub payload: Vec<u8>,
    /// Left and right ADPCM blocks, interleaved per block.
    pub audio: Vec<u8>,
}

impl FrameRecord {
    /// Decodes the record's audio into left and right samples.
    pub fn decode_audio(&self) -> Result<(Vec<i16>, Vec<i16>)> {
        let mut left = Vec::with_capacity(self.audio_blocks as usize * AUDIO_BLOCK_SAMPLES);
        let mut right = Vec::with_capacity(left.capacity());
        for pair in self.audio.chunks_exact(2 * AUDIO_BLOCK_BYTES) {
            let (l, r) = pair.split_at(AUDIO_BLOCK_BYTES);
            left.extend(adpcm::decode_block(l)?);
            right.extend(adpcm::decode_block(r)?);
        }
        Ok((left, right))
    }
}

/// Reads a container header and then iterates its frame records.
pub struct ContainerReader<R> {
    inner: R,
    header: ContainerHeader,
    next_index: u32,
    position: u64,
}

impl<R: Read> ContainerReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let header = ContainerHeader::read_from(&mut inner)?;
        let position = header.size() as u64;
        Ok(Self {
            inner,
            header,
            next_index: 0,
            position,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn read_record(&mut self) -> Result<FrameRecord> {
        let index = self.next_index;
        let offset = self.position;
        let size_field = self.inner.read_u32::<LittleEndian>().map_err(|e| truncated(index, e))?;
        let size = size_field & SIZE_MASK;
        let audio_blocks = size_field >> AUDIO_SHIFT;

        let mut payload = vec![0; size as usize];
        self.inner.read_exact(&mut payload).map_err(|e| truncated(index, e))?;
        let frame_type = FrameType::from_payload(&payload)
            .ok_or_else(|| Error::InvalidContainer(format!("frame {index} has an empty payload")))?;

        let mut audio = vec![0; audio_blocks as usize * 2 * AUDIO_BLOCK_BYTES];
        self.inner.read_exact(&mut audio).map_err(|e| truncated(index, e))?;

        self.next_index += 1;
        self.position += 4 + payload.len() as u64 + audio.len() as u64;
        Ok(FrameRecord {
            index,
            offset,
            frame_type,
            size,
            audio_blocks,
            payload,
            audio,
        })
    }
}

fn truncated(index: u32, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidContainer(format!("record {index} is truncated"))
    } else {
        Error::Io(e)
    }
}

impl<R: Read> Iterator for ContainerReader<R> {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.header.frame_count {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            // stop after the first malformed record
            self.next_index = self.header.frame_count;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::source::SampleBuffer;

    fn packet(frame_type: FrameType, data: Vec<u8>) -> Packet {
        Packet {
            data,
            frame_type,
            frame_number: 0,
        }
    }

    fn header(key_frames: Vec<KeyFrame>) -> ContainerHeader {
        ContainerHeader {
            width: 256,
            height: 192,
            frame_rate: FrameRate::new(30, 1),
            audio_rate: 32000,
            audio_channels: AUDIO_CHANNELS,
            frame_count: 2,
            key_frames,
        }
    }

    #[test]
    fn header_layout() {
        let h = header(vec![KeyFrame { frame: 0, offset: 0x24 }]);
        let mut out = Vec::new();
        h.write_to(&mut out).unwrap();
        assert_eq!(out.len(), h.size());
        assert_eq!(out.len(), 0x24);
        assert_eq!(&out[..4], b"FVDS");
        assert_eq!(out[4..8], [0x00, 0x01, 0xC0, 0x00]);
        assert_eq!(out[0x10..0x14], [0x00, 0x7D, 0x02, 0x00]);
        assert_eq!(out[0x20..0x24], [0x24, 0, 0, 0]);

        let parsed = ContainerHeader::read_from(&mut Cursor::new(&out)).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut out = Vec::new();
        header(vec![]).write_to(&mut out).unwrap();
        out[0] = b'X';
        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(&out)),
            Err(Error::InvalidContainer(_))
        ));
    }

    #[test]
    fn audio_schedule_at_30_fps() {
        let rate = FrameRate::new(30, 1);
        // 32000 / 30 = 1066.67 samples per frame
        assert_eq!(audio_blocks_for_frame(32000, rate, 0), 4);
        assert_eq!(audio_blocks_for_frame(32000, rate, 1), 4);
        assert_eq!(audio_blocks_for_frame(32000, rate, 5), 5);
        assert_eq!(audio_blocks_for_frame(0, rate, 5), 0);

        let total: u32 = (0..30).map(|n| audio_blocks_for_frame(32000, rate, n)).sum();
        assert_eq!(total as usize * AUDIO_BLOCK_SAMPLES, 32000);
    }

    #[test]
    fn record_layout() {
        let mut writer = RecordWriter::new(Vec::new(), 0, FrameRate::new(30, 1), 0);
        assert_eq!(writer.write_packet(&packet(FrameType::I, vec![1, 2, 3, 4, 5])).unwrap(), 0);
        writer.write_packet(&packet(FrameType::P, vec![0, 0x80])).unwrap();
        writer.write_packet(&packet(FrameType::I, vec![0, 0])).unwrap();
        assert_eq!(writer.position(), 12 + 8 + 8);
        let (bytes, keys) = writer.finish();

        assert_eq!(bytes[..12], [8, 0, 0, 0, 1, 2, 3, 4, 5, 0, 0, 0]);
        assert_eq!(bytes[12..20], [4, 0, 0, 0, 0, 0x80, 0, 0]);
        assert_eq!(
            keys,
            [KeyFrame { frame: 0, offset: 0 }, KeyFrame { frame: 2, offset: 20 }]
        );
    }

    #[test]
    fn audio_blocks_land_in_size_field() {
        let mut writer = RecordWriter::new(Vec::new(), 32000, FrameRate::new(30, 1), 5);
        let blocks = writer.write_packet(&packet(FrameType::I, vec![0; 6])).unwrap();
        assert_eq!(blocks, 5);
        let (bytes, _) = writer.finish();
        assert_eq!(bytes.len(), 4 + 8 + 5 * 2 * AUDIO_BLOCK_BYTES);
        assert_eq!(bytes[..4], [8, 0, 0x0A, 0]);
    }

    #[test]
    fn fill_and_read_back() {
        let h = ContainerHeader {
            frame_count: 3,
            key_frames: vec![KeyFrame { frame: 0, offset: 0x24 }],
            ..header(vec![])
        };
        let mut writer = RecordWriter::new(Vec::new(), 32000, h.frame_rate, 0);
        writer.write_packet(&packet(FrameType::I, vec![0x00, 0x00, 0xAA])).unwrap();
        writer.write_packet(&packet(FrameType::P, vec![0x00, 0x80])).unwrap();
        writer.write_packet(&packet(FrameType::P, vec![0x00, 0xC0])).unwrap();
        let (records, _) = writer.finish();

        let mut file = Vec::new();
        h.write_to(&mut file).unwrap();
        file.extend_from_slice(&records);

        let samples: Vec<i16> = (0..4096).map(|i| (8000.0 * (i as f64 * 0.05).sin()) as i16).collect();
        let mut audio = SampleBuffer::new(32000, samples.clone(), vec![0; 4096]);
        let mut cursor = Cursor::new(file);
        cursor.set_position(h.size() as u64);
        fill_audio(&mut cursor, 3, &mut audio).unwrap();

        cursor.set_position(0);
        let reader = ContainerReader::new(cursor).unwrap();
        assert_eq!(reader.header().frame_count, 3);
        let records: Vec<FrameRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].frame_type, FrameType::I);
        assert_eq!(records[0].offset, 0x24);
        assert_eq!(records[0].size, 4);
        assert_eq!(records[1].frame_type, FrameType::P);
        assert_eq!(
            records.iter().map(|r| r.audio_blocks).collect::<Vec<_>>(),
            [4, 4, 4]
        );

        let (left, right) = records[0].decode_audio().unwrap();
        assert_eq!(left.len(), 4 * AUDIO_BLOCK_SAMPLES);
        assert!(right.iter().all(|&s| s.abs() <= 8));
        let error = left.iter().zip(&samples).map(|(a, b)| (*a as i32 - *b as i32).abs()).max();
        assert!(error.unwrap() < 1024);

        // the state runs on across records: the second record's header
        // continues where the first record's last block ended
        let last_left = &records[0].audio[3 * 2 * AUDIO_BLOCK_BYTES..][..AUDIO_BLOCK_BYTES];
        let decoded = adpcm::decode_block(last_left).unwrap();
        let next_header = i16::from_le_bytes([records[1].audio[0], records[1].audio[1]]);
        assert_eq!(*decoded.last().unwrap(), next_header);
    }

    #[test]
    fn truncated_record_is_reported() {
        let mut file = Vec::new();
        header(vec![]).write_to(&mut file).unwrap();
        file.extend_from_slice(&[8, 0, 0, 0, 1, 2]);
        let mut reader = ContainerReader::new(Cursor::new(file)).unwrap();
        assert!(matches!(reader.next(), Some(Err(Error::InvalidContainer(_)))));
        assert!(reader.next().is_none());
    }
}
