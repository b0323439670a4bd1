//! Error types for the dispatch core.
//!
//! Errors are grouped by concern: `DispatchError` covers the request path
//! (lifecycle, routing, handler lookup, forwarding, user failures),
//! `CronError` covers cron configuration and scheduling, and `RpcError`
//! covers the RPC facade boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced on the request path.
///
/// Every variant is user-visible: the message is what a caller receives.
/// Stack-level detail is logged where the error arises, never returned.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The dispatch server has not reached the started state (or has been
    /// stopped). Fatal to the call, not to the server.
    #[error("server not started")]
    NotStarted,

    /// The message route did not parse into `serverType.handler.method`.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// The route parsed but no handler method is registered under it.
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    /// Forwarding to a peer server failed. Reported once per request.
    #[error("forward to {server_type} failed: {reason}")]
    Forward {
        server_type: String,
        reason: String,
    },

    /// An error produced by user code (filters, handlers, error hooks).
    #[error("{0}")]
    Custom(String),
}

impl DispatchError {
    /// Convenience constructor for user-code errors.
    pub fn custom(msg: impl Into<String>) -> Self {
        DispatchError::Custom(msg.into())
    }
}

/// Errors from the cron subsystem: configuration loading and the external
/// scheduling primitive.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("failed to read cron config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cron config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    /// The `action` field did not split into `jobName.methodName`.
    #[error("malformed cron action: {0:?}")]
    BadAction(String),

    /// The action named a job or method missing from the cron job registry.
    #[error("unknown cron job: {0}")]
    UnknownJob(String),
}

/// Errors at the RPC facade boundary (message forwarding and session
/// push-back). The transport itself lives outside this crate; these are the
/// shapes it reports failures in.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("rpc transport failure: {0}")]
    Transport(String),

    /// No peer of the requested server type is reachable.
    #[error("no route to server type {0}")]
    NoRoute(String),
}
