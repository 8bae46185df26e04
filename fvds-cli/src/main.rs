#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::info;

use fvds::encoder::{DEFAULT_MAX_GOP_LENGTH, DEFAULT_QUANTIZER};
use fvds::pipeline::default_jobs;
use fvds::wav::WavSource;
use fvds::y4m::{Y4mIndex, Y4mSource};
use fvds::{AudioSource, ContainerReader, EncoderConfig, FrameType, PipelineConfig, encode_container};

#[derive(Parser)]
#[command(name = "fvds")]
#[command(about = "FastVideoDS encoder for RGB555 handheld video", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a Y4M video, and optionally a WAV track, into an FVDS file
    Encode {
        /// Input video (YUV4MPEG2, 4:2:0)
        input: PathBuf,

        /// Output FVDS file
        output: PathBuf,

        /// 16-bit PCM WAV to interleave
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// Parallel segments [default: two thirds of the CPU threads]
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Frames per GOP, counting the key frame
        #[arg(long, default_value_t = DEFAULT_MAX_GOP_LENGTH)]
        max_gop: u32,

        /// Quantizer written into key frame headers (0-63)
        #[arg(short, long, default_value_t = DEFAULT_QUANTIZER)]
        quantizer: u8,
    },

    /// Print the header of an FVDS file and list its frames
    Info {
        /// Input FVDS file
        input: PathBuf,

        /// Write the frame list as CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            audio,
            jobs,
            max_gop,
            quantizer,
        } => {
            let config = EncoderConfig {
                quantizer,
                max_gop_length: max_gop,
                ..Default::default()
            };
            encode(&input, &output, audio.as_deref(), jobs.unwrap_or_else(default_jobs), config)
        }
        Commands::Info { input, output } => print_info(&input, output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn encode(input: &Path, output: &Path, audio: Option<&Path>, jobs: usize, encoder: EncoderConfig) -> fvds::Result<()> {
    let started = Instant::now();
    let index = Y4mIndex::scan_file(input)?;
    let header = &index.header;
    info!(
        "{}: {}x{} at {}/{} fps, {} frames",
        input.display(),
        header.width,
        header.height,
        header.frame_rate.num,
        header.frame_rate.den,
        index.frame_count()
    );

    let mut wav = audio.map(WavSource::open).transpose()?;
    let config = PipelineConfig {
        jobs: jobs.max(1),
        encoder,
        frame_rate: header.frame_rate,
    };

    let mut container = Cursor::new(Vec::new());
    let summary = encode_container(
        &mut container,
        header.width,
        header.height,
        index.frame_count(),
        &config,
        |range| Y4mSource::open(input, &index, range),
        wav.as_mut().map(|w| w as &mut dyn AudioSource),
    )?;
    fs::write(output, container.into_inner())?;

    println!(
        "Wrote {} frames ({} key frames, {} bytes) to {} in {:.2?}",
        summary.frames,
        summary.key_frames,
        summary.bytes,
        output.display(),
        started.elapsed()
    );
    Ok(())
}

fn print_info(input: &Path, csv: Option<&Path>) -> fvds::Result<()> {
    let reader = ContainerReader::new(BufReader::new(File::open(input)?))?;
    let header = reader.header().clone();
    eprintln!(
        "{}x{} at {:.3} fps, {} frames, {} key frames, audio {}",
        header.width,
        header.height,
        header.frame_rate.as_f64(),
        header.frame_count,
        header.key_frames.len(),
        if header.audio_rate == 0 {
            "none".to_owned()
        } else {
            format!("{} Hz x{}", header.audio_rate, header.audio_channels)
        }
    );

    let mut out: Box<dyn Write> = match csv {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    writeln!(out, "frame;type;size;audioBlocks")?;
    for record in reader {
        let record = record?;
        let kind = match record.frame_type {
            FrameType::I => "I",
            FrameType::P => "P",
            FrameType::B => "B",
        };
        writeln!(out, "{};{};{};{}", record.index, kind, record.size, record.audio_blocks)?;
    }
    out.flush()?;
    Ok(())
}
