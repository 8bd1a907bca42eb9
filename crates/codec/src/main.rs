use std::path::{Path, PathBuf};
use std::process::ExitCode;

use awgbot_common::codec::{self, CodecError, SystemResolver};
use clap::{ArgGroup, Parser};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Encode or decode AmneziaWG configs as vpn:// URIs", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["encode", "decode"])))]
struct Args {
    /// Config file to encode into a vpn:// URI
    #[arg(long, value_name = "FILE")]
    encode: Option<PathBuf>,

    /// vpn:// URI to decode back into config text
    #[arg(long, value_name = "URI")]
    decode: Option<String>,

    /// Write the result here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("File not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_logging() {
    // stdout carries the payload, so logs go to stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn encode_file(path: &Path) -> Result<String, CliError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(CliError::MissingInput(path.to_path_buf()));
    }
    let text = tokio::fs::read_to_string(path).await?;
    let uri = codec::encode_resolved(&text, &SystemResolver).await?;
    info!(file = %path.display(), "Encoded config.");
    Ok(uri)
}

async fn run(args: Args) -> Result<(), CliError> {
    let result = match (args.encode.as_deref(), args.decode.as_deref()) {
        (Some(path), _) => encode_file(path).await?,
        (None, uri) => codec::decode(uri.unwrap_or_default())?,
    };

    match &args.output {
        Some(out) => {
            tokio::fs::write(out, result.as_bytes()).await?;
            info!(output = %out.display(), "Wrote result.");
        }
        None => println!("{result}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}
