//! Tracing subscriber setup for the CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job.

use anyhow::{Result, anyhow};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Where log output goes, parsed from the `--log` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stdout,
    Stderr,
    /// Append to a file.
    File(PathBuf),
}

impl FromStr for LogTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "0" | "off" => LogTarget::Off,
            "1" | "stdout" => LogTarget::Stdout,
            "2" | "stderr" => LogTarget::Stderr,
            filename => LogTarget::File(PathBuf::from(filename)),
        })
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `level` for everything.
fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Install the global subscriber.
pub fn init(target: &LogTarget, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    match target {
        LogTarget::Off => Ok(()),
        LogTarget::Stdout => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(level))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
        }
        LogTarget::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(level))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
        }
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(level))
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
        }
    }
}
