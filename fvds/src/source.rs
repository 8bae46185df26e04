//! Input traits the pipeline pulls frames and audio from.

use crate::error::Result;
use crate::frame::Frame;
use crate::pool::{FramePool, RefFrame};

pub trait VideoSource {
    /// Fills a frame acquired from `pool`. `Ok(None)` marks the end of input.
    fn next_video_frame(&mut self, pool: &FramePool) -> Result<Option<RefFrame>>;
}

pub trait AudioSource {
    /// Fills up to `left.len()` samples per channel and returns how many were
    /// written. Callers zero the rest of a short read.
    fn next_audio_samples(&mut self, left: &mut [i16], right: &mut [i16]) -> Result<usize>;

    fn sample_rate(&self) -> u32;
}

/// Serves clones of in-memory frames, mainly for tests and demos.
#[derive(Debug, Clone)]
pub struct FrameListSource {
    frames: Vec<Frame>,
    next: usize,
}

impl FrameListSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, next: 0 }
    }
}

impl VideoSource for FrameListSource {
    fn next_video_frame(&mut self, pool: &FramePool) -> Result<Option<RefFrame>> {
        let Some(src) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let mut frame = pool.acquire();
        frame.frame_mut()?.copy_from(src);
        Ok(Some(frame))
    }
}

/// Stereo samples held in memory.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    rate: u32,
    left: Vec<i16>,
    right: Vec<i16>,
    position: usize,
}

impl SampleBuffer {
    pub fn new(rate: u32, left: Vec<i16>, right: Vec<i16>) -> Self {
        Self {
            rate,
            left,
            right,
            position: 0,
        }
    }
}

impl AudioSource for SampleBuffer {
    fn next_audio_samples(&mut self, left: &mut [i16], right: &mut [i16]) -> Result<usize> {
        let available = self.left.len().min(self.right.len()).saturating_sub(self.position);
        let n = available.min(left.len()).min(right.len());
        let range = self.position..self.position + n;
        left[..n].copy_from_slice(&self.left[range.clone()]);
        right[..n].copy_from_slice(&self.right[range]);
        self.position += n;
        Ok(n)
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_list_runs_dry() {
        let pool = FramePool::new(8, 8).unwrap();
        let mut source = FrameListSource::new(vec![Frame::solid(8, 8, 8, 8, 8)]);
        let frame = source.next_video_frame(&pool).unwrap().unwrap();
        assert_eq!(frame.g[0], 8);
        assert!(source.next_video_frame(&pool).unwrap().is_none());
    }

    #[test]
    fn sample_buffer_short_read() {
        let mut source = SampleBuffer::new(32000, vec![1, 2, 3], vec![4, 5, 6]);
        let mut left = [0; 2];
        let mut right = [0; 2];
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 2);
        assert_eq!((left, right), ([1, 2], [4, 5]));
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 1);
        assert_eq!(left[0], 3);
        assert_eq!(source.next_audio_samples(&mut left, &mut right).unwrap(), 0);
    }
}
