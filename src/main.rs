//! Loopback call between two negotiators in one process.
//!
//! ```bash
//! goldenchat --duration-secs 15
//! goldenchat --config call.json --delay-ms 300
//! ```

use anyhow::Context;
use clap::Parser;
use goldenchat_lib::{run_loopback_call, CallConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config: ICE servers, media constraints, wire format
    #[arg(short, long, env = "GOLDENCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling delay override in milliseconds
    #[arg(long, env = "GOLDENCHAT_DELAY_MS")]
    delay_ms: Option<u64>,

    /// How long the call stays up before both sides hang up
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CallConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CallConfig::default(),
    };
    if let Some(delay) = args.delay_ms {
        config.signaling_delay_ms = delay;
    }

    run_loopback_call(config, Duration::from_secs(args.duration_secs))
        .await
        .context("loopback call failed")?;
    Ok(())
}
