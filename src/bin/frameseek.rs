use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use ffmpeg_next::Rational;
use frameseek::{EngineOptions, FfmpegLogLevel, FileCache, FileHandle, FrameInfo, FramePolicy};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  frameseek info input.mp4 --json\n  frameseek frame input.mp4 1200 --out frame.png\n  frameseek dump input.mp4 --out frames --every 10 --progress --verbose\n  frameseek completions zsh > _frameseek";

#[derive(Debug, Parser)]
#[command(
    name = "frameseek",
    version,
    about = "Decode individual frames of a video by frame number",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Decoder threads per stream (0 lets FFmpeg decide).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print geometry and frame count of every video stream.
    #[command(
        about = "Print stream information",
        visible_alias = "probe",
        after_help = "Examples:\n  frameseek info input.mp4\n  frameseek info input.mp4 --json"
    )]
    Info {
        /// Input media path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decode one frame to an image file.
    #[command(
        about = "Decode a single frame",
        after_help = "Examples:\n  frameseek frame input.mp4 42 --out frame.png\n  frameseek frame input.mp4 99999 --out last.png --clamp"
    )]
    Frame {
        /// Input media path.
        input: PathBuf,
        /// Frame number (0-based).
        #[arg(allow_hyphen_values = true)]
        index: i64,
        /// Output image path (png, jpg, jpeg, bmp, tiff).
        #[arg(long)]
        out: PathBuf,
        /// Clamp out-of-range frame numbers to the first or last frame.
        #[arg(long)]
        clamp: bool,
        /// Video stream number, counting decodable streams only.
        #[arg(long, default_value_t = 0)]
        stream: usize,
    },

    /// Decode a range of frames into a directory.
    #[command(
        about = "Decode a range of frames",
        after_help = "Examples:\n  frameseek dump input.mp4 --out frames --every 10 --ext jpg\n  frameseek dump input.mp4 --out frames --start 0:00:10 --end 0:00:20 --progress"
    )]
    Dump {
        /// Input media path.
        input: PathBuf,
        /// Output directory for frame images.
        #[arg(long)]
        out: PathBuf,
        /// Decode every Nth frame.
        #[arg(long, default_value_t = 1)]
        every: u64,
        /// Optional start frame or timecode (inclusive).
        #[arg(long)]
        start: Option<String>,
        /// Optional end frame or timecode (inclusive).
        #[arg(long)]
        end: Option<String>,
        /// Output image extension (png, jpg, jpeg, bmp, tiff).
        #[arg(long, default_value = "png")]
        ext: String,
        /// Video stream number, counting decodable streams only.
        #[arg(long, default_value_t = 0)]
        stream: usize,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    let total_seconds = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    Ok(Duration::from_secs_f64(total_seconds.max(0.0)))
}

fn timestamp_to_frame_number(timestamp: Duration, frame_rate: Rational) -> i64 {
    if frame_rate.denominator() == 0 {
        return 0;
    }
    let frames_per_second = f64::from(frame_rate);
    (timestamp.as_secs_f64() * frames_per_second) as i64
}

/// A frame number, or a `[hh:]mm:ss` timecode converted at `frame_rate`.
fn parse_frame_position(value: &str, frame_rate: Rational) -> Result<i64, Box<dyn std::error::Error>> {
    if value.contains(':') {
        Ok(timestamp_to_frame_number(parse_timecode(value)?, frame_rate))
    } else {
        Ok(value.trim().parse::<i64>()?)
    }
}

fn engine_options(global: &GlobalOptions) -> Result<EngineOptions, Box<dyn std::error::Error>> {
    let mut options = EngineOptions::new();
    if let Some(level) = &global.log_level {
        let parsed = FfmpegLogLevel::parse(level).ok_or(format!("unsupported --log-level: {level}"))?;
        options = options.with_log_level(parsed);
    } else if global.verbose {
        options = options.with_log_level(FfmpegLogLevel::Warning);
    }
    if let Some(threads) = global.threads {
        options = options.with_decoder_threads(threads);
    }
    Ok(options)
}

/// Refuse to clobber `path` without `--overwrite`, and create its directory.
fn prepare_output(
    path: &Path,
    overwrite: bool,
    announce: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if !overwrite {
            return Err(format!(
                "{} already exists (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
        if announce {
            eprintln!("{} overwriting {}", "warning:".yellow().bold(), path.display());
        }
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)?,
        _ => {}
    }
    Ok(())
}

fn stream_infos(handle: &FileHandle) -> Result<Vec<FrameInfo>, Box<dyn std::error::Error>> {
    if let Some(message) = handle.error_message() {
        return Err(message.into());
    }
    let mut infos = Vec::with_capacity(handle.stream_count());
    for stream in 0..handle.stream_count() {
        infos.push(handle.info_for_stream(stream)?);
    }
    Ok(infos)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "frameseek", &mut std::io::stdout());
        return Ok(());
    }

    let cache = FileCache::with_options(engine_options(&cli.global)?)?;

    match cli.command {
        Commands::Info { input, json } => {
            let handle = cache.get(&input);
            let infos = stream_infos(&handle)?;

            if json {
                let streams: Vec<_> = infos
                    .iter()
                    .map(|info| {
                        json!({
                            "stream_index": info.stream_index,
                            "width": info.width,
                            "height": info.height,
                            "aspect_ratio": info.aspect_ratio,
                            "frame_count": info.frame_count,
                            "frame_rate": [info.frame_rate.numerator(), info.frame_rate.denominator()],
                            "start_timestamp": info.start_timestamp,
                            "codec": info.codec,
                        })
                    })
                    .collect();
                let payload = json!({
                    "path": input.display().to_string(),
                    "streams": streams,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("File: {}", input.display());
                for (number, info) in infos.iter().enumerate() {
                    println!(
                        "Video #{number} (stream {}): {}x{} @ {}/{} fps, {} frames, SAR {:.3} [{}]",
                        info.stream_index,
                        info.width,
                        info.height,
                        info.frame_rate.numerator(),
                        info.frame_rate.denominator(),
                        info.frame_count,
                        info.aspect_ratio,
                        info.codec,
                    );
                }
            }
        }
        Commands::Frame {
            input,
            index,
            out,
            clamp,
            stream,
        } => {
            prepare_output(&out, cli.global.overwrite, true)?;
            let policy = if clamp {
                FramePolicy::ClampToNearest
            } else {
                FramePolicy::Error
            };

            let handle = cache.get(&input);
            let image = handle.decode_frame_in_stream(stream, index, policy)?;
            image.save(&out)?;

            if cli.global.verbose {
                eprintln!("decoded frame {index} of stream #{stream}");
            }
            println!("{} {}", "saved".green().bold(), out.display());
        }
        Commands::Dump {
            input,
            out,
            every,
            start,
            end,
            ext,
            stream,
        } => {
            if every == 0 {
                return Err("--every must be greater than 0".into());
            }

            if out.exists() {
                if !cli.global.overwrite {
                    return Err(format!(
                        "output directory already exists: {} (use --overwrite)",
                        out.display()
                    )
                    .into());
                }
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("writing into existing directory {}", out.display()).yellow()
                );
            }

            let handle = cache.get(&input);
            let info = handle.info_for_stream(stream)?;
            if info.frame_count <= 0 {
                return Err("stream has no frames".into());
            }
            let max_frame = info.frame_count - 1;

            let start_frame = match start {
                Some(start) => parse_frame_position(&start, info.frame_rate)?.clamp(0, max_frame),
                None => 0,
            };
            let end_frame = match end {
                Some(end) => parse_frame_position(&end, info.frame_rate)?.clamp(0, max_frame),
                None => max_frame,
            };
            if start_frame > end_frame {
                return Err("--start must be <= --end".into());
            }

            let frame_numbers: Vec<i64> =
                (start_frame..=end_frame).step_by(every as usize).collect();
            let ext_clean = ext.trim_start_matches('.').to_ascii_lowercase();

            let progress_bar = if cli.global.progress {
                let pb = ProgressBar::new(frame_numbers.len() as u64);
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
                )?;
                pb.set_style(style.progress_chars("##-"));
                Some(pb)
            } else {
                None
            };

            let mut decoded = 0_u64;
            for frame_number in frame_numbers {
                let output_path = out.join(format!("frame_{frame_number:06}.{ext_clean}"));
                prepare_output(&output_path, cli.global.overwrite, false)?;

                let image = handle.decode_frame_in_stream(stream, frame_number, FramePolicy::Error)?;
                image.save(&output_path)?;
                decoded += 1;

                if let Some(pb) = &progress_bar {
                    pb.inc(1);
                }
                if cli.global.verbose {
                    eprintln!("saved frame {} -> {}", frame_number, output_path.display());
                }
            }

            if let Some(pb) = progress_bar {
                pb.finish_with_message("done");
            }

            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Decoded {decoded} frame(s) to {}", out.display()).green()
            );
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
