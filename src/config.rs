//! Dispatch server configuration.
//!
//! Configuration is an explicit record rather than a free-form key-value
//! bag: every recognised option is a field, and each field configures
//! exactly the component it names.

use crate::cron::CronEntry;
use crate::filter::{AfterFilter, BeforeFilter, ErrorHandler};
use std::path::PathBuf;
use std::sync::Arc;

/// Identity of the process the dispatch server runs in.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Logical role shared by peer processes (e.g. `area`, `chat`,
    /// `connector`); the first route segment a local handler can match.
    pub server_type: String,
    /// Unique id of this process within the cluster.
    pub server_id: String,
    /// Base path configuration files are resolved against.
    pub base: PathBuf,
    /// Environment name, used for the scoped cron configuration directory.
    pub env: String,
}

impl ServerContext {
    pub fn new(server_type: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            server_type: server_type.into(),
            server_id: server_id.into(),
            base: PathBuf::from("."),
            env: "development".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }
}

/// Options consumed by [`DispatchServer::start`](crate::DispatchServer::start).
///
/// The four filter lists seed the two filter services: `global_before` and
/// `global_after` build the global service that wraps every dispatched
/// request, while `before` and `after` build the per-server service around
/// the local handler. The error handlers hook error propagation on the
/// matching paths, and `crons` carries inline cron entries admitted after
/// the ones from the configuration file.
#[derive(Default)]
pub struct DispatchConfig {
    pub global_before: Vec<BeforeFilter>,
    pub global_after: Vec<AfterFilter>,
    pub before: Vec<BeforeFilter>,
    pub after: Vec<AfterFilter>,
    pub global_error_handler: Option<Arc<dyn ErrorHandler>>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
    pub crons: Vec<CronEntry>,
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
