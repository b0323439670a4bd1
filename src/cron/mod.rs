//! Cron configuration and the cron job registry.
//!
//! Crons are time-triggered invocations of handler-like methods that take no
//! message and no session. Entries come from a JSON configuration file (or
//! inline from [`DispatchConfig::crons`](crate::config::DispatchConfig)) and
//! bind a cron expression to an `action` of the form `jobName.methodName`
//! resolved against the [`CronJobSet`] registry.

pub mod scheduler;

pub use scheduler::{CronCommand, CronScheduler};

use crate::error::CronError;
use crate::filter::BoxFuture;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Name of the cron configuration file.
pub const CRON_FILE: &str = "crons.json";

/// Identifier of a cron entry, unique within a process.
///
/// Ids are strings end to end: admission, the job table, and removal all key
/// on the same representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CronId(pub String);

impl CronId {
    pub fn new(id: impl Into<String>) -> Self {
        CronId(id.into())
    }
}

impl fmt::Display for CronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CronId {
    fn from(id: &str) -> Self {
        CronId(id.to_string())
    }
}

/// One cron configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntry {
    pub id: CronId,
    /// Cron expression, passed verbatim to the scheduling primitive.
    pub time: String,
    /// Target of the firing, `jobName.methodName`.
    pub action: String,
    /// When present, the entry only applies to the process with this id.
    #[serde(rename = "serverId", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// A parameterless job fired by the cron scheduler.
///
/// Errors are logged by the scheduler; they never travel through filter
/// chains or reach any client.
#[async_trait]
pub trait CronJob: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

struct FnCronJob<F>(F);

#[async_trait]
impl<F> CronJob for FnCronJob<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Registry of `job name -> method name -> job`, resolved against cron
/// entry actions.
#[derive(Default, Clone)]
pub struct CronJobSet {
    jobs: HashMap<String, HashMap<String, Arc<dyn CronJob>>>,
}

impl CronJobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: &str, method: &str, implementation: Arc<dyn CronJob>) {
        self.jobs
            .entry(job.to_string())
            .or_default()
            .insert(method.to_string(), implementation);
    }

    pub fn register_fn<F>(&mut self, job: &str, method: &str, f: F)
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.register(job, method, Arc::new(FnCronJob(f)));
    }

    pub fn get(&self, job: &str, method: &str) -> Option<Arc<dyn CronJob>> {
        self.jobs.get(job)?.get(method).cloned()
    }
}

/// Splits a cron action at the first `.` into `(job, method)`.
///
/// Both halves must be non-empty; a method containing further dots keeps
/// them.
pub fn split_action(action: &str) -> Result<(&str, &str), CronError> {
    let (job, method) = action
        .split_once('.')
        .ok_or_else(|| CronError::BadAction(action.to_string()))?;
    if job.is_empty() || method.is_empty() {
        return Err(CronError::BadAction(action.to_string()));
    }
    Ok((job, method))
}

/// Loads the cron entries for one server type from the configuration file.
///
/// Looks for `crons.json` at the base path first, then under
/// `config/<env>/crons.json`. A missing file in both locations is an empty
/// configuration, not an error. The file maps server type to entry list;
/// only this process's list is returned.
pub fn load_cron_file(
    base: &Path,
    env: &str,
    server_type: &str,
) -> Result<Vec<CronEntry>, CronError> {
    let primary = base.join(CRON_FILE);
    let scoped = base.join("config").join(env).join(CRON_FILE);
    let path = if primary.is_file() {
        primary
    } else if scoped.is_file() {
        scoped
    } else {
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| CronError::Io {
        path: path.clone(),
        source,
    })?;
    let mut by_type: HashMap<String, Vec<CronEntry>> =
        serde_json::from_str(&raw).map_err(|source| CronError::Parse {
            path: path.clone(),
            source,
        })?;
    Ok(by_type.remove(server_type).unwrap_or_default())
}
