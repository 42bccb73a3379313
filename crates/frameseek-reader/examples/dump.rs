//! Usage:
//! cargo run -p frameseek-reader --example dump --features backend-all -- \
//!   --input ./demo/clip.mp4 --backend ffmpeg --out-dir ./demo/frames --step 5

use std::env;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use png::{BitDepth, ColorType, Encoder};

use frameseek_reader::{available_backends, Backend, FrameReader, ReaderOptions};

struct Args {
    input: Option<PathBuf>,
    backend: Option<String>,
    out_dir: PathBuf,
    step: i64,
    list_backends: bool,
}

enum CliError {
    HelpRequested,
    Message(String),
}

fn main() -> io::Result<()> {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(CliError::HelpRequested) => {
            print_usage();
            return Ok(());
        }
        Err(CliError::Message(message)) => {
            eprintln!("{message}");
            print_usage();
            return Err(io::Error::new(io::ErrorKind::InvalidInput, message));
        }
    };

    if args.list_backends {
        print_backends();
        return Ok(());
    }

    let input_path = args.input.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "missing input path (use --input <path>)",
        )
    })?;

    let backend = match args.backend {
        Some(name) => Backend::from_str(&name).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid backend '{name}': {err}"),
            )
        })?,
        None => available_backends()[0],
    };

    let options = ReaderOptions {
        backend,
        ..ReaderOptions::default()
    };
    let mut reader = FrameReader::open(&input_path, &options);
    if reader.is_invalid() {
        return Err(io::Error::other(format!(
            "failed to open {:?}: {}",
            input_path,
            reader.last_error()
        )));
    }

    let info = reader
        .info(0)
        .ok_or_else(|| io::Error::other("no stream information"))?;
    std::fs::create_dir_all(&args.out_dir)?;
    println!("Dumping {} frames from {:?}", info.frames, input_path);
    println!("Writing PNG files to {:?}", args.out_dir);

    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {prefix:>8.cyan.bold} \
{bar:40.cyan/blue} {pos:>4}/{len:4} frames",
    )
    .unwrap()
    .progress_chars("█▉▊▋▌▍▎▏  ");
    let progress = ProgressBar::new(info.frames.max(0) as u64 / args.step.max(1) as u64);
    progress.set_style(style);
    progress.set_prefix("dump");

    let mut frame = 0;
    let mut written = 0u64;
    while frame < info.frames {
        if let Err(err) = reader.decode(frame, false, 1) {
            eprintln!("failed to decode frame {frame}: {err}");
            break;
        }
        write_frame_png(&reader, &args.out_dir, frame)?;
        written += 1;
        progress.inc(1);
        frame += args.step.max(1);
    }
    progress.finish_with_message("done");
    println!("Wrote {written} frames to {:?}", args.out_dir);
    Ok(())
}

fn write_frame_png(reader: &FrameReader, dir: &Path, frame: i64) -> io::Result<()> {
    let file = std::fs::File::create(dir.join(format!("{frame:05}.png")))?;
    let writer = BufWriter::new(file);
    let mut encoder = Encoder::new(writer, reader.width(), reader.height());
    encoder.set_color(if reader.num_components() == 4 {
        ColorType::Rgba
    } else {
        ColorType::Rgb
    });

    let data = reader.data();
    if reader.bit_depth() > 8 {
        encoder.set_depth(BitDepth::Sixteen);
        let mut writer = encoder.write_header()?;
        // PNG wants big-endian samples; the reader hands out little-endian.
        let mut swapped = Vec::with_capacity(data.len());
        for sample in data.chunks_exact(2) {
            swapped.push(sample[1]);
            swapped.push(sample[0]);
        }
        writer.write_image_data(&swapped)?;
    } else {
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(data)?;
    }
    Ok(())
}

fn parse_args() -> Result<Args, CliError> {
    let mut input = None;
    let mut backend = None;
    let mut out_dir = PathBuf::from("./demo/frames");
    let mut step = 1;
    let mut list_backends = false;
    let mut iter = env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Err(CliError::HelpRequested),
            "--input" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Message("--input requires a value".to_string()))?;
                input = Some(PathBuf::from(value));
            }
            "--backend" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Message("--backend requires a value".to_string()))?;
                backend = Some(value);
            }
            "--out-dir" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Message("--out-dir requires a value".to_string()))?;
                out_dir = PathBuf::from(value);
            }
            "--step" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Message("--step requires a value".to_string()))?;
                step = value
                    .parse::<i64>()
                    .map_err(|_| CliError::Message("--step must be a number".to_string()))?;
            }
            "--list-backends" => {
                list_backends = true;
            }
            _ if arg.starts_with('-') => {
                return Err(CliError::Message(format!("unknown flag '{arg}'")));
            }
            _ => {
                if input.is_none() {
                    input = Some(PathBuf::from(arg));
                } else if backend.is_none() {
                    backend = Some(arg);
                } else {
                    return Err(CliError::Message(format!("unexpected argument '{arg}'")));
                }
            }
        }
    }

    Ok(Args {
        input,
        backend,
        out_dir,
        step,
        list_backends,
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  dump --input <path> [--backend <name>] [--out-dir <dir>] [--step <n>]\n\
       [--list-backends]\n\
   (or) dump <path> [backend]"
    );
}

fn print_backends() {
    println!(
        "Available backends: {}",
        available_backends()
            .iter()
            .map(|backend| backend.as_str())
            .collect::<Vec<&str>>()
            .join(", ")
    );
}
