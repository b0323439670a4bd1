//! Cron admission and scheduling against the external timer primitive.

use super::{split_action, CronEntry, CronId, CronJobSet};
use crate::error::CronError;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Cron mutation delivered over the dispatch server's command channel.
///
/// The host's event bus translates its add/remove notifications into these
/// commands; the scheduler drains them on its own task so runtime mutation
/// is serialised against the scheduling path.
#[derive(Debug, Clone)]
pub enum CronCommand {
    Add(Vec<CronEntry>),
    Remove(Vec<CronId>),
}

struct CronState {
    jobs: CronJobSet,
    crons: Vec<CronEntry>,
    job_table: HashMap<CronId, Uuid>,
}

/// Owns the admitted cron list, the job table, and the scheduler handle.
///
/// Admission and removal run under one async mutex. Registration happens
/// eagerly but nothing fires until [`start_clock`](CronScheduler::start_clock)
/// arms the scheduler, which the dispatch server defers to its after-start
/// step.
pub struct CronScheduler {
    server_type: String,
    server_id: String,
    sched: JobScheduler,
    state: Mutex<CronState>,
}

impl CronScheduler {
    pub async fn new(
        server_type: impl Into<String>,
        server_id: impl Into<String>,
        jobs: CronJobSet,
    ) -> Result<Self, CronError> {
        Ok(Self {
            server_type: server_type.into(),
            server_id: server_id.into(),
            sched: JobScheduler::new().await?,
            state: Mutex::new(CronState {
                jobs,
                crons: Vec::new(),
                job_table: HashMap::new(),
            }),
        })
    }

    /// Admits and registers a batch of entries.
    pub async fn add_crons(&self, entries: Vec<CronEntry>) {
        let mut state = self.state.lock().await;
        for entry in entries {
            self.admit(&mut state, entry).await;
        }
    }

    /// Cancels the scheduled jobs for the given ids.
    ///
    /// Ids with no job table entry are logged and skipped.
    pub async fn remove_crons(&self, ids: &[CronId]) {
        let mut state = self.state.lock().await;
        for id in ids {
            match state.job_table.remove(id) {
                Some(handle) => {
                    if let Err(e) = self.sched.remove(&handle).await {
                        error!(cron_id = %id, "failed to cancel cron job: {e}");
                    }
                    state.crons.retain(|cron| cron.id != *id);
                    debug!(cron_id = %id, "cron removed");
                }
                None => {
                    warn!(
                        server_type = %self.server_type,
                        cron_id = %id,
                        "no scheduled cron with this id"
                    );
                }
            }
        }
    }

    /// Arms the scheduler clock. Jobs registered before this call do not
    /// fire until it happens.
    pub async fn start_clock(&self) -> Result<(), CronError> {
        self.sched.start().await?;
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.job_table.len()
    }

    pub async fn contains(&self, id: &CronId) -> bool {
        self.state.lock().await.job_table.contains_key(id)
    }

    /// Drains cron commands until every sender is dropped.
    pub(crate) fn drive_commands(
        self: std::sync::Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<CronCommand>,
    ) {
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    CronCommand::Add(entries) => self.add_crons(entries).await,
                    CronCommand::Remove(ids) => self.remove_crons(&ids).await,
                }
            }
        });
    }

    async fn admit(&self, state: &mut CronState, entry: CronEntry) {
        if let Some(server_id) = &entry.server_id {
            if *server_id != self.server_id {
                return;
            }
        }
        if state.crons.iter().any(|cron| cron.id == entry.id) {
            warn!(
                server_type = %self.server_type,
                cron_id = %entry.id,
                "duplicate cron id, entry dropped"
            );
            return;
        }
        match self.schedule(state, &entry).await {
            Ok(handle) => {
                debug!(cron_id = %entry.id, time = %entry.time, "cron scheduled");
                state.job_table.insert(entry.id.clone(), handle);
                state.crons.push(entry);
            }
            Err(e) => {
                warn!(cron_id = %entry.id, "skipping cron: {e}");
            }
        }
    }

    async fn schedule(&self, state: &CronState, entry: &CronEntry) -> Result<Uuid, CronError> {
        let (job_name, method) = split_action(&entry.action)?;
        let job = state
            .jobs
            .get(job_name, method)
            .ok_or_else(|| CronError::UnknownJob(entry.action.clone()))?;

        let cron_id = entry.id.clone();
        let scheduled = Job::new_async(entry.time.as_str(), move |_uuid, _lock| {
            let job = job.clone();
            let cron_id = cron_id.clone();
            Box::pin(async move {
                if let Err(e) = job.run().await {
                    error!(cron_id = %cron_id, "cron job failed: {e:#}");
                }
            })
        })?;
        let handle = self.sched.add(scheduled).await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn jobs_with(counter: Arc<AtomicUsize>) -> CronJobSet {
        let mut jobs = CronJobSet::new();
        jobs.register_fn("daily", "tick", move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        jobs
    }

    fn entry(id: &str, time: &str, action: &str) -> CronEntry {
        CronEntry {
            id: CronId::from(id),
            time: time.to_string(),
            action: action.to_string(),
            server_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_ids_keep_the_first_entry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sched = CronScheduler::new("area", "area-1", jobs_with(counter))
            .await
            .unwrap();

        sched
            .add_crons(vec![
                entry("1", "* * * * * *", "daily.tick"),
                entry("1", "0 0 * * * *", "daily.tick"),
            ])
            .await;

        assert_eq!(sched.job_count().await, 1);
        assert!(sched.contains(&CronId::from("1")).await);
    }

    #[tokio::test]
    async fn entries_scoped_to_another_server_are_ignored() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sched = CronScheduler::new("area", "area-1", jobs_with(counter))
            .await
            .unwrap();

        let mut scoped = entry("2", "* * * * * *", "daily.tick");
        scoped.server_id = Some("area-9".into());
        let mut mine = entry("3", "* * * * * *", "daily.tick");
        mine.server_id = Some("area-1".into());

        sched.add_crons(vec![scoped, mine]).await;
        assert!(!sched.contains(&CronId::from("2")).await);
        assert!(sched.contains(&CronId::from("3")).await);
    }

    #[tokio::test]
    async fn unresolvable_actions_are_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sched = CronScheduler::new("area", "area-1", jobs_with(counter))
            .await
            .unwrap();

        sched
            .add_crons(vec![
                entry("1", "* * * * * *", "missing.tick"),
                entry("2", "* * * * * *", "nodot"),
                entry("3", "* * * * * *", "daily.tick"),
            ])
            .await;

        assert_eq!(sched.job_count().await, 1);
        assert!(sched.contains(&CronId::from("3")).await);
    }

    #[tokio::test]
    async fn add_then_remove_leaves_no_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sched = CronScheduler::new("area", "area-1", jobs_with(counter))
            .await
            .unwrap();

        sched
            .add_crons(vec![entry("1", "* * * * * *", "daily.tick")])
            .await;
        assert_eq!(sched.job_count().await, 1);

        sched.remove_crons(&[CronId::from("1")]).await;
        assert_eq!(sched.job_count().await, 0);

        // Removing again only logs; the table is already empty.
        sched.remove_crons(&[CronId::from("1")]).await;
        assert_eq!(sched.job_count().await, 0);
    }
}
