use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use reframe_core::gif_patch::loop_patcher::rewrite_loop_count;
use reframe_core::pipeline::infrastructure::async_executor::default_parallelism;
use reframe_core::pipeline::transcode_use_case::{TranscodeRequest, TranscodeUseCase};
use reframe_core::processing::domain::image_processor::ImageProcessor;
use reframe_core::processing::infrastructure::auto_crop::AutoCrop;
use reframe_core::processing::infrastructure::flip::Flip;
use reframe_core::processing::infrastructure::resize::Resize;
use reframe_core::processing::infrastructure::retime::{Reverse, SpeedChange};
use reframe_core::shared::constants::GIF_EXTENSION;
use reframe_core::shared::data_source::DataSource;
use reframe_core::shared::loop_count::LoopCount;

/// Size-bounded media transcoding.
#[derive(Parser)]
#[command(name = "reframe")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode a video, GIF or image, optionally transforming it.
    Transcode(TranscodeArgs),
    /// Rewrite the loop count of a GIF without re-encoding it.
    Loop(LoopArgs),
}

#[derive(clap::Args)]
struct TranscodeArgs {
    /// Input file path or http(s) URL.
    input: String,

    /// Output file; its extension selects the format.
    output: PathBuf,

    /// Output size budget in bytes (0 = unbounded).
    #[arg(long, default_value = "0")]
    max_size: u64,

    /// Playback speed multiplier.
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Play the input backwards.
    #[arg(long)]
    reverse: bool,

    /// Scale factor applied to every frame (0.0-1.0].
    #[arg(long, default_value = "1.0")]
    scale: f64,

    /// Trim uniform borders found on the first frame.
    #[arg(long)]
    auto_crop: bool,

    /// Mirror every frame.
    #[arg(long, value_enum)]
    flip: Option<FlipArg>,

    /// Loop setting for GIF output: 0 plays once, -1 loops forever, N loops N extra times.
    #[arg(long, allow_hyphen_values = true)]
    loop_count: Option<i32>,

    /// Worker threads for frame transforms.
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(clap::Args)]
struct LoopArgs {
    /// Input GIF.
    input: PathBuf,

    /// Output GIF.
    output: PathBuf,

    /// 0 plays once, -1 loops forever, N loops N extra times.
    #[arg(long, allow_hyphen_values = true)]
    count: i32,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlipArg {
    Horizontal,
    Vertical,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Transcode(args) => {
            validate_transcode(&args)?;
            run_transcode(args)
        }
        Command::Loop(args) => {
            validate_loop(&args)?;
            run_loop(&args)
        }
    }
}

fn run_transcode(args: TranscodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let input_format = format_of(&args.input)
        .ok_or_else(|| format!("Cannot tell the format of {}", args.input))?;
    let output_format = format_of(&args.output.to_string_lossy())
        .ok_or_else(|| format!("Cannot tell the format of {}", args.output.display()))?;

    let mut request = TranscodeRequest::new(source_for(&args.input), &input_format, &output_format);
    request.max_file_size = i64::try_from(args.max_size).unwrap_or(i64::MAX);
    request.processor = build_processor(&args)?;
    request.loop_count = args.loop_count.map(LoopCount::from_user_setting);

    let threads = args.threads.unwrap_or_else(default_parallelism);
    let result = TranscodeUseCase::new(threads).execute(request)?;
    let DataSource::Temp(file) = &result.output else {
        return Err("Transcode did not produce a file".into());
    };
    fs::copy(file.path(), &args.output)?;

    if args.max_size > 0 && result.size > args.max_size {
        log::warn!(
            "Output is {} bytes, over the {} byte budget",
            result.size,
            args.max_size
        );
    }
    log::info!(
        "Output written to {} ({} bytes, {} attempt(s))",
        args.output.display(),
        result.size,
        result.attempts
    );
    Ok(())
}

fn run_loop(args: &LoopArgs) -> Result<(), Box<dyn std::error::Error>> {
    let loop_count = LoopCount::from_user_setting(args.count);
    let mut patched = rewrite_loop_count(&DataSource::Path(args.input.clone()), loop_count)?;
    let mut output = io::BufWriter::new(fs::File::create(&args.output)?);
    io::copy(&mut patched, &mut output)?;
    log::info!("Output written to {} (loop {:?})", args.output.display(), loop_count);
    Ok(())
}

fn build_processor(args: &TranscodeArgs) -> Result<ImageProcessor, Box<dyn std::error::Error>> {
    let mut processor = ImageProcessor::Identity;
    if args.auto_crop {
        processor = processor.then(ImageProcessor::new(AutoCrop::default()));
    }
    if let Some(flip) = args.flip {
        let flip = match flip {
            FlipArg::Horizontal => Flip::Horizontal,
            FlipArg::Vertical => Flip::Vertical,
        };
        processor = processor.then(ImageProcessor::new(flip));
    }
    processor = processor.then(Resize::processor(args.scale)?);
    if args.speed != 1.0 {
        processor = processor.then(ImageProcessor::new(SpeedChange::new(args.speed)?));
    }
    if args.reverse {
        processor = processor.then(ImageProcessor::new(Reverse));
    }
    log::debug!("Processor chain: {}", processor.describe());
    Ok(processor)
}

fn validate_transcode(args: &TranscodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !is_url(&args.input) && !Path::new(&args.input).exists() {
        return Err(format!("Input file not found: {}", args.input).into());
    }
    if !(args.speed.is_finite() && args.speed > 0.0) {
        return Err(format!("Speed must be a positive number, got {}", args.speed).into());
    }
    if !(args.scale > 0.0 && args.scale <= 1.0) {
        return Err(format!("Scale must be in (0.0, 1.0], got {}", args.scale).into());
    }
    if args.threads == Some(0) {
        return Err("Threads must be at least 1".into());
    }
    if args.loop_count.is_some() && format_of(&args.output.to_string_lossy()).as_deref() != Some(GIF_EXTENSION) {
        return Err("--loop-count only applies to GIF output".into());
    }
    Ok(())
}

fn validate_loop(args: &LoopArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.input.exists() {
        return Err(format!("Input file not found: {}", args.input.display()).into());
    }
    if args.count < -1 || args.count > i32::from(u16::MAX) {
        return Err(format!("Loop count must be between -1 and 65535, got {}", args.count).into());
    }
    Ok(())
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn source_for(input: &str) -> DataSource {
    if is_url(input) {
        DataSource::Url(input.to_string())
    } else {
        DataSource::Path(PathBuf::from(input))
    }
}

/// Lower-cased extension, ignoring any URL query or fragment.
fn format_of(input: &str) -> Option<String> {
    let path = input.split(['?', '#']).next().unwrap_or(input);
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
