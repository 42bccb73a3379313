//! Usage:
//! cargo run -p frameseek-reader --example video_info --features backend-all -- \
//!   --input ./demo/clip.mp4 --backend ffmpeg

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;

use frameseek_reader::{available_backends, Backend, FrameReader, ReaderOptions};

struct Args {
    input: Option<PathBuf>,
    backend: Option<String>,
    list_backends: bool,
}

enum CliError {
    HelpRequested,
    Message(String),
}

fn main() -> Result<(), Box<dyn Error>> {
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
            return Err(message.into());
        }
    };

    if args.list_backends {
        print_backends();
        return Ok(());
    }

    let input_path = args
        .input
        .ok_or("missing input path (use --input <path>)")?;
    if !input_path.exists() {
        return Err(format!("input file {:?} does not exist", input_path).into());
    }

    let backend = if let Some(name) = args.backend {
        Backend::from_str(&name).map_err(|err| format!("invalid backend '{name}': {err}"))?
    } else {
        available_backends()[0]
    };

    let options = ReaderOptions {
        backend,
        ..ReaderOptions::default()
    };
    let reader = FrameReader::open(&input_path, &options);
    if reader.is_invalid() {
        return Err(format!(
            "failed to open {:?}: {}",
            input_path,
            reader.last_error()
        )
        .into());
    }

    let info = reader.info(0).ok_or("no stream information")?;
    println!("Backend: {}", backend.as_str());
    println!("Size: {}x{}", info.width, info.height);
    println!("Pixel aspect: {}", info.aspect);
    println!("Frames: {}", info.frames);
    println!("FPS: {:.3}", reader.fps(0).unwrap_or(0.0));
    println!("Bit depth: {}", reader.bit_depth());
    println!("Components: {}", reader.num_components());
    println!("Row size: {} bytes", reader.row_size());
    println!("Buffer size: {} bytes", reader.buffer_size());
    println!("Colorspace: {}", reader.colorspace());
    Ok(())
}

fn parse_args() -> Result<Args, CliError> {
    let mut input = None;
    let mut backend = None;
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
        list_backends,
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  video_info --input <path> [--backend <name>] [--list-backends]\n\
   (or) video_info <path> [backend]"
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
