//! Encodes a scrolling colour-bar pattern with a test tone, then decodes the
//! container and reports the PSNR of every key frame.
//!
//! Usage: test_pattern [output.fv]

use std::io::Cursor;

use fvds::source::{FrameListSource, SampleBuffer};
use fvds::{ContainerReader, Decoder, Frame, FrameType, PipelineConfig, encode_container};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 192;
const FRAMES: usize = 60;
const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

fn pattern(n: usize) -> Frame {
    let mut frame = Frame::new(WIDTH, HEIGHT);
    let w = WIDTH as usize;
    for i in 0..frame.r.len() {
        let (x, y) = (i % w, i / w);
        let (r, g, b) = BARS[((x + 2 * n) / 32) % BARS.len()];
        let shade = if y < HEIGHT as usize * 3 / 4 { 1.0 } else { x as f32 / w as f32 };
        frame.r[i] = ((r as f32 * shade) as u8) & 0xF8;
        frame.g[i] = ((g as f32 * shade) as u8) & 0xF8;
        frame.b[i] = ((b as f32 * shade) as u8) & 0xF8;
    }
    frame
}

fn psnr(a: &Frame, b: &Frame) -> f64 {
    let planes = [(&a.r, &b.r), (&a.g, &b.g), (&a.b, &b.b)];
    let (mut sum, mut count) = (0f64, 0usize);
    for (x, y) in planes {
        for (&p, &q) in x.iter().zip(y.iter()) {
            let d = p as f64 - q as f64;
            sum += d * d;
            count += 1;
        }
    }
    let mse = sum / count as f64;
    if mse == 0.0 { f64::INFINITY } else { 10.0 * (255.0 * 255.0 / mse).log10() }
}

fn main() -> fvds::Result<()> {
    env_logger::init();

    let frames: Vec<Frame> = (0..FRAMES).map(pattern).collect();
    let tone: Vec<i16> = (0..32000 * 3)
        .map(|i| (6000.0 * (i as f64 * 2.0 * std::f64::consts::PI * 440.0 / 32000.0).sin()) as i16)
        .collect();
    let mut audio = SampleBuffer::new(32000, tone.clone(), tone);

    let mut out = Cursor::new(Vec::new());
    let summary = encode_container(
        &mut out,
        WIDTH,
        HEIGHT,
        frames.len(),
        &PipelineConfig::default(),
        |range| Ok(FrameListSource::new(frames[range].to_vec())),
        Some(&mut audio),
    )?;
    println!("{} frames, {} key frames, {} bytes", summary.frames, summary.key_frames, summary.bytes);

    let data = out.into_inner();
    if let Some(path) = std::env::args().nth(1) {
        std::fs::write(&path, &data)?;
        println!("wrote {path}");
    }

    let mut decoder = Decoder::new(WIDTH, HEIGHT)?;
    for record in ContainerReader::new(Cursor::new(&data))? {
        let record = record?;
        let decoded = decoder.decode(&record.payload)?;
        if record.frame_type == FrameType::I {
            let quality = psnr(&frames[record.index as usize], decoded.frame());
            println!("key frame {:3}: {:6} bytes, {quality:.2} dB", record.index, record.size);
        }
    }
    Ok(())
}
