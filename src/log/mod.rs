//! Logging and observability
//!
//! Diagnostic logging goes through `tracing`; finished exchanges are
//! summarized in a JSONL transcript.

pub mod transcript;

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

pub use transcript::{ExchangeRecord, TranscriptLogger, TranscriptRecorder};

/// Filter used when `RUST_LOG` is not set.
#[must_use]
pub const fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "relay=debug"
    } else {
        "relay=info"
    }
}

/// Install the global stderr subscriber. `RUST_LOG` overrides `verbose`.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("Failed to install tracing subscriber: {err}"))
}
