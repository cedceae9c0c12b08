//! `wanproxy` binary: parses a TOML configuration, starts a [`Proxy`], and
//! waits for an interrupt before shutting it back down.
//!
//! # Usage
//!
//! ```text
//! wanproxy -c wanproxy.toml [-q | -v]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use wanproxy::Proxy;
use wanproxy::error::ProxyError;

/// WAN-acceleration proxy: a SOCKS front-end that, when configured with a
/// codec, deduplicates repeated content on its wan leg against a peer
/// running the same codec.
#[derive(Parser, Debug)]
#[command(name = "wanproxy", version, about = "WAN-acceleration proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Silence everything below error level.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Enable debug-level logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Explicit log level, overridden by `RUST_LOG` if set and by `-q`/`-v`
    /// if either is given.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    // clap writes its own usage/error text and picks its own exit code for
    // malformed invocations (unknown flags, `--help`, `--version`); we only
    // need to intercept the cases pinned to a specific exit status below.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => err.exit(),
    };

    init_tracing(&args);

    if args.quiet && args.verbose {
        tracing::error!("-q and -v are mutually exclusive");
        return ExitCode::FAILURE;
    }

    let Some(config_path) = args.config.clone() else {
        tracing::error!("usage: wanproxy -c <configfile> [-q | -v]");
        return ExitCode::FAILURE;
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "wanproxy exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(args: &Args) {
    let default_level =
        if args.quiet { "error" } else if args.verbose { "debug" } else { args.log_level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

async fn run(config_path: PathBuf) -> Result<(), ProxyError> {
    let proxy = Proxy::start(&config_path).await?;
    tracing::info!(path = %config_path.display(), "configuration loaded");

    tokio::signal::ctrl_c().await.map_err(ProxyError::Signal)?;
    tracing::info!("received interrupt, shutting down");
    proxy.shutdown().await;

    Ok(())
}
