//! tilegate daemon - command-line interface
//!
//! Serves tileset and archive datasets over HTTP using the tilegate
//! library. Locations come from a TOML config file, or a single
//! directory via `--root` for quick serving.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;

mod config;
mod error;
mod server;

use config::{DaemonConfig, FileConfig};
use error::CliError;

#[derive(Parser)]
#[command(name = "tilegate")]
#[command(version = tilegate::VERSION)]
#[command(about = "Tileset delivery daemon", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "TILEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Serve this directory at `/` (shortcut for a one-location config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Enable embedded browser pages for `--root`
    #[arg(long)]
    browser: bool,

    /// Enable directory listings for `--root`
    #[arg(long)]
    listing: bool,

    /// Open-file budget of the driver cache
    #[arg(long)]
    cache_open_files: Option<u64>,

    /// Log file; stderr only when not given
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _logging = match tilegate::logging::init_logging(args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: cannot initialize logging: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = run(args).await {
        error!(error = %err, "daemon failed");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let daemon = DaemonConfig::assemble(
        file,
        args.listen,
        args.root,
        args.browser,
        args.listing,
        args.cache_open_files,
    )?;

    server::serve(daemon).await
}
