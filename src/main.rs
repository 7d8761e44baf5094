//! Command-line decoder for BinHex 4.0 archives.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process;
use clap::Parser;
use log::{info, LevelFilter};
use macfork::binhex::{BinHexArchive, BinHexError, BinHexHeader, Chunk, Encoding};

const RESOURCE_FORK_EXTENSION: &str = ".resource";

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode BinHex 4.0 (.hqx) archives", long_about = None)]
struct Args {
    /// BinHex file to decode; reads standard input if neither a file nor a URL is given
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// URL of a BinHex file to download and decode
    #[arg(short, long, value_name = "URL", conflicts_with = "file")]
    url: Option<String>,

    /// Decode the data fork to a file named after the archived file
    #[arg(short, long)]
    data: bool,

    /// Decode the data fork to the given file
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,

    /// Decode the resource fork to a file named after the archived file, plus ".resource"
    #[arg(short, long)]
    resource: bool,

    /// Decode the resource fork to the given file
    #[arg(long, value_name = "PATH")]
    resource_file: Option<PathBuf>,

    /// Print the archive's header and exit without decoding anything
    #[arg(long)]
    header_only: bool,

    /// The input has already been converted from the printable 7-bit form
    #[arg(long)]
    eight_bit: bool,

    /// Log progress and checksum details
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Works out where each requested fork should go; decodes just the data fork if the user didn't
    /// ask for either.
    fn destinations(&self, header: &BinHexHeader) -> (Option<PathBuf>, Option<PathBuf>) {
        let want_data = self.data || self.data_file.is_some();
        let want_resource = self.resource || self.resource_file.is_some();

        let name = output_name(&header.name());

        let data = if want_data || !want_resource {
            Some(self.data_file.clone().unwrap_or_else(|| PathBuf::from(&name)))
        } else {
            None
        };

        let resource = if want_resource {
            Some(
                self.resource_file
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(name + RESOURCE_FORK_EXTENSION)),
            )
        } else {
            None
        };

        (data, resource)
    }
}

/// Errors that can happen while running the decoder
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Unable to open {1:?}: {0}")]
    Open(#[source] io::Error, PathBuf),

    #[error("Unable to download {1}: {0}")]
    Download(#[source] Box<ureq::Error>, String),

    #[error("Unable to create {1:?}: {0}")]
    Create(#[source] io::Error, PathBuf),

    #[error("Unable to write to {1:?}: {0}")]
    Write(#[source] io::Error, PathBuf),

    #[error(transparent)]
    Decode(#[from] BinHexError),
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::new();
    logger.filter_level(LevelFilter::Warn).parse_default_env();

    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }

    logger.init();

    if let Err(why) = run(&args) {
        eprintln!("{why}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let source: Box<dyn BufRead> = match (&args.file, &args.url) {
        (Some(path), _) => {
            let file = File::open(path).map_err(|why| CliError::Open(why, path.clone()))?;
            Box::new(BufReader::new(file))
        }
        (None, Some(url)) => {
            info!("Downloading {}", url);

            let response = ureq::get(url)
                .call()
                .map_err(|why| CliError::Download(Box::new(why), url.clone()))?;

            Box::new(BufReader::new(response.into_reader()))
        }
        (None, None) => Box::new(BufReader::new(io::stdin())),
    };

    let encoding = if args.eight_bit {
        Encoding::EightBit
    } else {
        Encoding::SevenBit
    };

    let mut archive = BinHexArchive::with_encoding(source, encoding);
    let header = archive.header()?;

    if args.header_only {
        println!("{header}");
        return Ok(());
    }

    let (data_path, resource_path) = args.destinations(&header);

    if let Some(path) = data_path {
        archive.use_data_fork()?;
        decode_fork(&mut archive, &path)?;
    }

    if let Some(path) = resource_path {
        archive.use_resource_fork()?;
        decode_fork(&mut archive, &path)?;
    }

    Ok(())
}

fn decode_fork<R: BufRead>(archive: &mut BinHexArchive<R>, path: &Path) -> Result<(), CliError> {
    let mut file = File::create(path).map_err(|why| CliError::Create(why, path.to_path_buf()))?;

    let mut buf = [0; 8192];
    let mut written = 0;

    loop {
        match archive.read_fork(&mut buf)? {
            Chunk::Data(len) => {
                file.write_all(&buf[..len])
                    .map_err(|why| CliError::Write(why, path.to_path_buf()))?;

                written += len;
            }
            Chunk::End => break,
        }
    }

    info!("Wrote {} bytes to {:?}", written, path);

    Ok(())
}

/// Turns an archived file name into something safe to create in the current directory. Classic Mac
/// file names may contain slashes, and may be empty.
fn output_name(name: &str) -> String {
    match name.replace('/', "-") {
        ref sanitized if sanitized.is_empty() || sanitized == "." || sanitized == ".." => {
            String::from("untitled")
        }
        sanitized => sanitized,
    }
}
