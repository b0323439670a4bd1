//! Logging setup for host processes.
//!
//! One helper wires the tracing subscriber from the process's
//! [`ServerContext`]. Hosts that configure their own subscriber can skip
//! this module entirely.

use crate::config::ServerContext;
use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize structured logging for one server process.
///
/// The filter respects the `RUST_LOG` environment variable; without it,
/// `debug` turns the whole crate up and everything else defaults to `info`.
/// Production processes emit JSON lines so fleet-wide aggregation can key
/// on fields; every other environment stays human-readable.
pub fn setup_logging(ctx: &ServerContext, debug: bool) -> Result<()> {
    let default_filter = if debug {
        format!("info,{}=debug", env!("CARGO_CRATE_NAME"))
    } else {
        "info".to_string()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if ctx.env == "production" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    tracing::info!(
        "logging initialized for {} ({}, env {})",
        ctx.server_id,
        ctx.server_type,
        ctx.env
    );
    Ok(())
}
