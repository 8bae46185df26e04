use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid dimensions {width}x{height}: width and height must be positive multiples of 8")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("frame dimension mismatch: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    DimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },

    #[error("B-frames are not supported (requested run length {0})")]
    BFramesUnsupported(u32),

    #[error("quantizer {0} does not fit in 6 bits")]
    InvalidQuantizer(u8),

    #[error("send_frame called after flush")]
    SendAfterFlush,

    #[error("frame is shared by {0} handles and cannot be written")]
    SharedFrame(usize),

    #[error("ADPCM input must be a multiple of 8 samples, got {0}")]
    AdpcmLength(usize),

    #[error("ADPCM stream without state must start with a header")]
    AdpcmMissingState,

    #[error("audio request of {requested} samples exceeds ring capacity {capacity}")]
    AudioOverrun { requested: usize, capacity: usize },

    #[error("bitstream error: {0}")]
    Bitstream(String),

    #[error("invalid Y4M data: {0}")]
    InvalidY4m(String),

    #[error("invalid WAV data: {0}")]
    InvalidWav(String),

    #[error("invalid FVDS container: {0}")]
    InvalidContainer(String),

    #[error("source ended after {got} of {expected} frames")]
    SourceExhausted { expected: usize, got: usize },

    #[error("failed to start worker threads: {0}")]
    ThreadPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
