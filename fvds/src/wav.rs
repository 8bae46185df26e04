//! WAV input decoded through symphonia, 16-bit PCM only.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::Path;

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::{Error, Result};
use crate::source::AudioSource;

const DEFAULT_RING_CAPACITY: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Fixed-capacity queue of stereo sample pairs.
#[derive(Debug)]
pub struct AudioRing {
    samples: VecDeque<(i16, i16)>,
    capacity: usize,
}

impl AudioRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn free(&self) -> usize {
        self.capacity - self.samples.len()
    }

    pub fn push(&mut self, left: i16, right: i16) -> Result<()> {
        if self.samples.len() == self.capacity {
            return Err(Error::AudioOverrun {
                requested: self.samples.len() + 1,
                capacity: self.capacity,
            });
        }
        self.samples.push_back((left, right));
        Ok(())
    }

    /// Moves up to `left.len()` pairs out. A request larger than the ring
    /// could ever hold is an overrun.
    pub fn pop_into(&mut self, left: &mut [i16], right: &mut [i16]) -> Result<usize> {
        let requested = left.len().min(right.len());
        if requested > self.capacity {
            return Err(Error::AudioOverrun {
                requested,
                capacity: self.capacity,
            });
        }
        let n = requested.min(self.samples.len());
        for (i, (l, r)) in self.samples.drain(..n).enumerate() {
            left[i] = l;
            right[i] = r;
        }
        Ok(n)
    }
}

/// Streams the PCM track of a WAV file. Mono input is duplicated onto both
/// channels.
///
/// Decoded packets are staged whole and moved into the ring only as far as it
/// has room, so the ring never grows past its capacity.
pub struct WavSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: WavFormat,
    staged: Option<SampleBuffer<i16>>,
    staged_pos: usize,
    finished: bool,
    ring: AudioRing,
}

impl WavSource {
    pub fn new<S: MediaSource + 'static>(source: S) -> Result<Self> {
        Self::with_ring_capacity(source, DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity<S: MediaSource + 'static>(source: S, capacity: usize) -> Result<Self> {
        let mut hint = Hint::new();
        hint.with_extension("wav");

        let mss = MediaSourceStream::new(Box::new(source), Default::default());
        let probed = get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(header_error)?;
        let format_reader = probed.format;

        let track = format_reader
            .default_track()
            .ok_or_else(|| Error::InvalidWav("no audio track".into()))?;
        let track_id = track.id;
        let params = &track.codec_params;
        let format = WavFormat {
            channels: params.channels.map_or(0, |c| c.count()) as u16,
            sample_rate: params.sample_rate.unwrap_or(0),
            bits_per_sample: params.bits_per_sample.unwrap_or(0) as u16,
        };
        check_format(&format)?;

        let decoder = get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(header_error)?;
        debug!(
            "WAV {} Hz, {} channel(s), {} frames",
            format.sample_rate,
            format.channels,
            params.n_frames.map_or_else(|| "unknown".to_owned(), |n| n.to_string())
        );

        Ok(Self {
            track_id,
            format_reader,
            decoder,
            format,
            staged: None,
            staged_pos: 0,
            finished: false,
            ring: AudioRing::with_capacity(capacity),
        })
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    fn refill(&mut self, wanted: usize) -> Result<()> {
        while self.ring.len() < wanted {
            if !self.drain_staged()? && !self.decode_packet()? {
                break;
            }
        }
        Ok(())
    }

    /// Moves staged frames into the ring. Returns false once nothing is left
    /// to move.
    fn drain_staged(&mut self) -> Result<bool> {
        let Some(buffer) = &self.staged else {
            return Ok(false);
        };
        let channels = self.format.channels as usize;
        let samples = buffer.samples();
        if self.staged_pos >= samples.len() {
            return Ok(false);
        }
        let frames = ((samples.len() - self.staged_pos) / channels).min(self.ring.free());
        for frame in samples[self.staged_pos..].chunks_exact(channels).take(frames) {
            let left = frame[0];
            let right = if channels == 2 { frame[1] } else { left };
            self.ring.push(left, right)?;
        }
        self.staged_pos += frames * channels;
        Ok(frames > 0)
    }

    /// Decodes the next packet of the track into the staging buffer. Returns
    /// false at the end of the stream.
    fn decode_packet(&mut self) -> Result<bool> {
        while !self.finished {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(stream_error(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!("skipping damaged WAV packet: {msg}");
                    continue;
                }
                Err(e) => return Err(stream_error(e)),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self.staged.as_ref().is_none_or(|b| b.capacity() < needed) {
                self.staged = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buffer) = &mut self.staged {
                buffer.copy_interleaved_ref(decoded);
            }
            self.staged_pos = 0;
            return Ok(true);
        }
        Ok(false)
    }
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl AudioSource for WavSource {
    fn next_audio_samples(&mut self, left: &mut [i16], right: &mut [i16]) -> Result<usize> {
        let wanted = left.len().min(right.len());
        if wanted > self.ring.capacity() {
            return Err(Error::AudioOverrun {
                requested: wanted,
                capacity: self.ring.capacity(),
            });
        }
        self.refill(wanted)?;
        self.ring.pop_into(left, right)
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }
}

fn check_format(format: &WavFormat) -> Result<()> {
    if format.bits_per_sample != 16 {
        return Err(Error::InvalidWav(format!(
            "{}-bit samples, expected 16",
            format.bits_per_sample
        )));
    }
    if !(1..=2).contains(&format.channels) {
        return Err(Error::InvalidWav(format!("{} channels, expected 1 or 2", format.channels)));
    }
    if format.sample_rate == 0 || format.sample_rate > u16::MAX as u32 {
        return Err(Error::InvalidWav(format!(
            "sample rate {} Hz out of range",
            format.sample_rate
        )));
    }
    Ok(())
}

fn header_error(e: SymphoniaError) -> Error {
    match e {
        SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::InvalidWav("file ends inside the header".into())
        }
        SymphoniaError::IoError(e) => Error::Io(e),
        e => Error::InvalidWav(e.to_string()),
    }
}

fn stream_error(e: SymphoniaError) -> Error {
    match e {
        SymphoniaError::IoError(e) => Error::Io(e),
        e => Error::InvalidWav(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::{LittleEndian, WriteBytesExt};

    use super::*;

    const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;
    const SUBTYPE_PCM: [u8; 16] = [
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
    ];

    fn riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.write_u32::<LittleEndian>(0).unwrap();
        out.extend_from_slice(b"WAVE");
        for (id, body) in chunks {
            out.extend_from_slice(*id);
            out.write_u32::<LittleEndian>(body.len() as u32).unwrap();
            out.extend_from_slice(body);
            if body.len() % 2 == 1 {
                out.push(0);
            }
        }
        let len = out.len() as u32 - 8;
        (&mut out[4..8]).write_u32::<LittleEndian>(len).unwrap();
        out
    }

    fn fmt_pcm(channels: u16, rate: u32) -> Vec<u8> {
        let mut fmt = Vec::new();
        fmt.write_u16::<LittleEndian>(1).unwrap();
        fmt.write_u16::<LittleEndian>(channels).unwrap();
        fmt.write_u32::<LittleEndian>(rate).unwrap();
        fmt.write_u32::<LittleEndian>(rate * channels as u32 * 2).unwrap();
        fmt.write_u16::<LittleEndian>(channels * 2).unwrap();
        fmt.write_u16::<LittleEndian>(16).unwrap();
        fmt
    }

    fn pcm_data(samples: &[i16]) -> Vec<u8> {
        let mut data = Vec::new();
        for &s in samples {
            data.write_i16::<LittleEndian>(s).unwrap();
        }
        data
    }

    fn wav(channels: u16, rate: u32, samples: &[i16], extra_chunk: bool) -> Vec<u8> {
        let mut chunks = Vec::new();
        if extra_chunk {
            chunks.push((b"JUNK", vec![0; 4]));
        }
        chunks.push((b"fmt ", fmt_pcm(channels, rate)));
        chunks.push((b"data", pcm_data(samples)));
        riff(&chunks)
    }

    #[test]
    fn stereo_samples() {
        let data = wav(2, 32000, &[1, -1, 2, -2, 3, -3], false);
        let mut source = WavSource::new(Cursor::new(data)).unwrap();
        assert_eq!(source.sample_rate(), 32000);

        let mut left = [0; 4];
        let mut right = [0; 4];
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 3);
        assert_eq!(left[..3], [1, 2, 3]);
        assert_eq!(right[..3], [-1, -2, -3]);
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 0);
    }

    #[test]
    fn mono_is_duplicated() {
        let data = wav(1, 22050, &[10, 20], true);
        let mut source = WavSource::new(Cursor::new(data)).unwrap();
        assert_eq!(source.format().channels, 1);
        let mut left = [0; 2];
        let mut right = [0; 2];
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 2);
        assert_eq!(left, right);
        assert_eq!(left, [10, 20]);
    }

    #[test]
    fn extensible_pcm_is_accepted() {
        let mut fmt = fmt_pcm(2, 32000);
        fmt[..2].copy_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        fmt.write_u16::<LittleEndian>(22).unwrap();
        fmt.write_u16::<LittleEndian>(16).unwrap();
        // front left | front right
        fmt.write_u32::<LittleEndian>(0x3).unwrap();
        fmt.extend_from_slice(&SUBTYPE_PCM);
        let data = riff(&[(b"fmt ", fmt), (b"data", pcm_data(&[100, -100, 200, -200]))]);

        let mut source = WavSource::new(Cursor::new(data)).unwrap();
        assert_eq!(
            source.format(),
            WavFormat {
                channels: 2,
                sample_rate: 32000,
                bits_per_sample: 16
            }
        );
        let mut left = [0; 2];
        let mut right = [0; 2];
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 2);
        assert_eq!(left, [100, 200]);
        assert_eq!(right, [-100, -200]);
    }

    #[test]
    fn rejects_unsupported_formats() {
        let mut data = wav(2, 32000, &[0, 0], false);
        data[8] = b'X';
        assert!(matches!(WavSource::new(Cursor::new(data)), Err(Error::InvalidWav(_))));

        let data = wav(3, 32000, &[0, 0, 0], false);
        assert!(matches!(WavSource::new(Cursor::new(data)), Err(Error::InvalidWav(_))));

        let data = wav(2, 96000, &[0, 0], false);
        assert!(matches!(WavSource::new(Cursor::new(data)), Err(Error::InvalidWav(_))));

        let data = wav(2, 32000, &[0, 0], false);
        assert!(matches!(
            WavSource::new(Cursor::new(data[..20].to_vec())),
            Err(Error::InvalidWav(_))
        ));
    }

    #[test]
    fn packets_larger_than_the_ring_are_staged() {
        let samples: Vec<i16> = (0..512).collect();
        let data = wav(2, 32000, &samples, false);
        let mut source = WavSource::with_ring_capacity(Cursor::new(data), 16).unwrap();

        let mut left = [0; 16];
        let mut right = [0; 16];
        let mut lefts = Vec::new();
        loop {
            let n = source.next_audio_samples(&mut left, &mut right).unwrap();
            assert!(source.ring.len() <= 16);
            if n == 0 {
                break;
            }
            lefts.extend_from_slice(&left[..n]);
        }
        let expected: Vec<i16> = (0..256).map(|i| i * 2).collect();
        assert_eq!(lefts, expected);
    }

    #[test]
    fn request_larger_than_ring_overruns() {
        let data = wav(2, 32000, &[0; 64], false);
        let mut source = WavSource::with_ring_capacity(Cursor::new(data), 16).unwrap();
        let mut left = [0; 32];
        let mut right = [0; 32];
        assert!(matches!(
            source.next_audio_samples(&mut left, &mut right),
            Err(Error::AudioOverrun {
                requested: 32,
                capacity: 16
            })
        ));
        assert_eq!(source.next_audio_samples(&mut left[..16], &mut right[..16]).unwrap(), 16);
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = AudioRing::with_capacity(2);
        ring.push(1, 1).unwrap();
        ring.push(2, 2).unwrap();
        assert_eq!(ring.free(), 0);
        assert!(ring.push(3, 3).is_err());

        let mut l = [0; 1];
        let mut r = [0; 1];
        assert_eq!(ring.pop_into(&mut l, &mut r).unwrap(), 1);
        assert_eq!(l, [1]);
        assert_eq!(ring.len(), 1);
    }
}
