//! Splits a video into contiguous segments, encodes them on a rayon pool and
//! assembles the container.
//!
//! Every segment gets its own source, encoder and record buffer, so the first
//! frame of each segment is a key frame. Audio is interleaved afterwards in a
//! single sequential pass over the finished records.

use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::encoder::{Encoder, EncoderConfig};
use crate::error::{Error, Result};
use crate::mux::{AUDIO_CHANNELS, ContainerHeader, FrameRate, KEY_FRAME_ENTRY_SIZE, KeyFrame, RecordWriter, fill_audio};
use crate::source::{AudioSource, VideoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of segments, and of worker threads.
    pub jobs: usize,
    pub encoder: EncoderConfig,
    pub frame_rate: FrameRate,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            encoder: EncoderConfig::default(),
            frame_rate: FrameRate::new(30, 1),
        }
    }
}

/// Two thirds of the available hardware threads, at least one.
pub fn default_jobs() -> usize {
    let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    ((threads as f64 / 1.5).round() as usize).max(1)
}

/// Splits `[0, frame_count)` into at most `jobs` contiguous non-empty ranges.
/// Earlier ranges take the remainder.
pub fn segment_ranges(frame_count: usize, jobs: usize) -> Vec<Range<usize>> {
    if frame_count == 0 {
        return Vec::new();
    }
    let jobs = jobs.clamp(1, frame_count);
    let base = frame_count / jobs;
    let extra = frame_count % jobs;

    let mut start = 0;
    (0..jobs)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Records of one segment, with key-frame offsets relative to `data`.
#[derive(Debug, Clone)]
pub struct Segment {
    pub range: Range<usize>,
    pub data: Vec<u8>,
    pub key_frames: Vec<KeyFrame>,
}

/// Encodes the frames of `range` into container records.
pub fn encode_segment<S>(
    source: &mut S,
    width: u32,
    height: u32,
    range: Range<usize>,
    config: &PipelineConfig,
    audio_rate: u32,
) -> Result<Segment>
where
    S: VideoSource + ?Sized,
{
    let started = Instant::now();
    let mut encoder = Encoder::new(width, height, config.encoder)?;
    let pool = encoder.pool().clone();
    let mut writer = RecordWriter::new(Vec::new(), audio_rate, config.frame_rate, range.start as u64);

    for got in 0..range.len() {
        let frame = source.next_video_frame(&pool)?.ok_or(Error::SourceExhausted {
            expected: range.len(),
            got,
        })?;
        encoder.send_frame(frame)?;
        while let Some(encoded) = encoder.receive_frame()? {
            writer.write_packet(&encoded.into_packet())?;
        }
    }
    encoder.flush();
    while let Some(encoded) = encoder.receive_frame()? {
        writer.write_packet(&encoded.into_packet())?;
    }

    let (data, key_frames) = writer.finish();
    info!(
        "segment {}..{}: {} bytes, {} key frames in {:.2?}",
        range.start,
        range.end,
        data.len(),
        key_frames.len(),
        started.elapsed()
    );
    Ok(Segment {
        range,
        data,
        key_frames,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub frames: u32,
    pub key_frames: usize,
    pub bytes: u64,
}

/// Encodes `frame_count` frames into a complete container written at the
/// current position of `output`.
///
/// `make_source` is called once per segment, on the worker thread that
/// encodes it, and must yield exactly the frames of the given range.
pub fn encode_container<W, F, S>(
    output: &mut W,
    width: u32,
    height: u32,
    frame_count: usize,
    config: &PipelineConfig,
    make_source: F,
    audio: Option<&mut dyn AudioSource>,
) -> Result<PipelineSummary>
where
    W: Read + Write + Seek,
    F: Fn(Range<usize>) -> Result<S> + Sync,
    S: VideoSource,
{
    let (width16, height16) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(Error::InvalidDimensions { width, height }),
    };
    let frames = u32::try_from(frame_count)
        .map_err(|_| Error::InvalidContainer(format!("{frame_count} frames do not fit the header")))?;
    let audio_rate = match &audio {
        Some(a) => u16::try_from(a.sample_rate())
            .map_err(|_| Error::InvalidContainer(format!("audio rate {} Hz", a.sample_rate())))?,
        None => 0,
    };

    let ranges = segment_ranges(frame_count, config.jobs);
    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(ranges.len().max(1))
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;
    info!("encoding {frame_count} frames in {} segments", ranges.len());

    let segments = workers.install(|| {
        ranges
            .par_iter()
            .map(|range| {
                let mut source = make_source(range.clone())?;
                encode_segment(&mut source, width, height, range.clone(), config, audio_rate as u32)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut header = ContainerHeader {
        width: width16,
        height: height16,
        frame_rate: config.frame_rate,
        audio_rate,
        audio_channels: AUDIO_CHANNELS,
        frame_count: frames,
        key_frames: Vec::new(),
    };
    let key_count = segments.iter().map(|s| s.key_frames.len()).sum::<usize>();
    let header_size = (header.size() + key_count * KEY_FRAME_ENTRY_SIZE) as u64;

    let mut base = header_size;
    for segment in &segments {
        for key in &segment.key_frames {
            let offset = u32::try_from(base + key.offset as u64)
                .map_err(|_| Error::InvalidContainer("key frame offset exceeds 4 GiB".into()))?;
            header.key_frames.push(KeyFrame {
                frame: key.frame,
                offset,
            });
        }
        base += segment.data.len() as u64;
    }
    debug_assert_eq!(header.size() as u64, header_size);

    let start = output.stream_position()?;
    header.write_to(output)?;
    for segment in &segments {
        output.write_all(&segment.data)?;
    }
    let bytes = base;

    if let Some(audio) = audio {
        output.seek(SeekFrom::Start(start + header_size))?;
        fill_audio(output, frames, audio)?;
        output.seek(SeekFrom::Start(start + bytes))?;
    }
    output.flush()?;
    debug!("container is {bytes} bytes");

    Ok(PipelineSummary {
        frames,
        key_frames: header.key_frames.len(),
        bytes,
    })
}
