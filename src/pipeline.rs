//! Top-level coordination of a harvesting run
//!
//! A run loads (or seeds) the pending identifiers, opens the result file,
//! spawns one task per identifier under the shared [`Limiter`], and waits for
//! every task to return. Cancelling the token passed to [`Pipeline::run`]
//! stops new work; tasks already holding a slot finish their current step
//! and everything durable up to that point is kept.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::limiter::Limiter;
use crate::retry::{RetryError, with_retry};
use crate::sink::ResultSink;
use crate::store::IdentifierStore;
use crate::types::Identifier;
use crate::worker::{Outcome, Worker};

/// Where a run currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet, or reading the pending set and result file
    Loading,
    /// Spawning tasks
    Dispatching,
    /// Waiting for spawned tasks to return
    Draining,
    /// All tasks have returned
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Loading => "loading",
            Phase::Dispatching => "dispatching",
            Phase::Draining => "draining",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Tally of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub dispatched: usize,
    pub recorded: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub malformed: usize,
    pub exhausted: usize,
    /// Requests that could not be built or sent
    pub failed: usize,
    pub cancelled: usize,
    /// Identifiers still pending once the run ended
    pub remaining: usize,
    /// Most fetches observed in flight at once
    pub peak_in_flight: usize,
    /// The run was cancelled before every task completed
    pub interrupted: bool,
}

impl RunReport {
    fn tally(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Recorded => self.recorded += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Rejected(_) => self.rejected += 1,
            Outcome::Malformed => self.malformed += 1,
            Outcome::Exhausted { .. } => self.exhausted += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }

    fn finished(&self) -> usize {
        self.recorded
            + self.skipped
            + self.rejected
            + self.malformed
            + self.exhausted
            + self.failed
            + self.cancelled
    }
}

/// Orchestrates a run against one pending file and one result file.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    api: ApiClient,
    phase: watch::Sender<Phase>,
}

impl Pipeline {
    /// Validate `config` and build the shared HTTP session.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let api = ApiClient::new(&config.base_url, config.request_timeout)?;
        let (phase, _) = watch::channel(Phase::Loading);
        Ok(Self { config, api, phase })
    }

    /// Settings this pipeline runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Follow phase changes.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        info!(%phase, "pipeline phase");
        self.phase.send_replace(phase);
    }

    /// Run until every pending identifier has been tried once or `cancel` fires.
    ///
    /// Only a failed identifier listing or a failed write to the durable
    /// files makes this return `Err`; anything else is counted in the report
    /// and left pending for the next run.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        self.enter(Phase::Loading);
        let result = self.execute(&cancel).await;
        self.enter(Phase::Terminated);
        result
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let mut report = RunReport::default();

        let store = Arc::new(IdentifierStore::open(
            &self.config.pending_path,
            self.config.compact_every,
        )?);
        let mut pending = store.load();
        if pending.is_empty() {
            info!("no pending identifiers on disk, listing users from the service");
            match self.list_users(cancel).await? {
                Some(ids) => {
                    store.seed(&ids)?;
                    pending = store.load();
                }
                None => {
                    report.interrupted = true;
                    return Ok(report);
                }
            }
        }

        if pending.is_empty() {
            info!("nothing to fetch");
            return Ok(report);
        }

        let sink = Arc::new(ResultSink::open(&self.config.output_path)?);
        let limiter = Limiter::new(self.config.max_concurrent);
        let worker = Worker::new(
            self.api.clone(),
            limiter.clone(),
            sink.clone(),
            store.clone(),
            self.config.retry.clone(),
        );

        // Internal failures cancel this child without touching the caller's token
        let run_token = cancel.child_token();

        self.enter(Phase::Dispatching);
        info!(
            pending = pending.len(),
            already_recorded = sink.len(),
            max_concurrent = limiter.capacity(),
            "dispatching fetch tasks"
        );
        let mut tasks: FuturesUnordered<_> = pending
            .into_iter()
            .map(|id| {
                let worker = worker.clone();
                let token = run_token.clone();
                tokio::spawn(async move { worker.run(id, token).await })
            })
            .collect();
        report.dispatched = tasks.len();

        self.enter(Phase::Draining);
        let mut fatal: Option<Error> = None;
        while let Some(joined) = tasks.next().await {
            match joined.map_err(Error::from).and_then(|outcome| outcome) {
                Ok(outcome) => report.tally(&outcome),
                Err(e) => {
                    error!(error = %e, "fatal error in fetch task, stopping run");
                    run_token.cancel();
                    fatal.get_or_insert(e);
                }
            }

            let done = report.finished();
            if done % 100 == 0 || done == report.dispatched {
                info!(
                    done,
                    total = report.dispatched,
                    recorded = report.recorded,
                    "progress"
                );
            }
        }

        let compacted = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.compact()).await
        };
        report.remaining = store.len();
        report.peak_in_flight = limiter.peak();
        report.interrupted = cancel.is_cancelled();

        // The first task error wins over a failed compaction
        if let Some(e) = fatal {
            if let Err(compact_err) = compacted.map_err(Error::from).and_then(|r| r) {
                warn!(error = %compact_err, "could not compact identifier store");
            }
            return Err(e);
        }
        compacted??;

        if report.interrupted {
            warn!(remaining = report.remaining, "run interrupted, rerun to resume");
        }
        info!(
            recorded = report.recorded,
            skipped = report.skipped,
            rejected = report.rejected,
            malformed = report.malformed,
            exhausted = report.exhausted,
            failed = report.failed,
            remaining = report.remaining,
            "run finished"
        );
        Ok(report)
    }

    /// `None` when cancelled before the listing succeeded.
    async fn list_users(&self, cancel: &CancellationToken) -> Result<Option<Vec<Identifier>>> {
        match with_retry(&self.config.retry, cancel, |_| self.api.list_users()).await {
            Ok(ids) => {
                info!(count = ids.len(), "listed users");
                Ok(Some(ids))
            }
            Err(RetryError::Cancelled { .. }) => Ok(None),
            Err(RetryError::Exhausted { attempts, last }) => Err(Error::Listing(format!(
                "{last} (after {attempts} attempts)"
            ))),
            Err(RetryError::Permanent(e)) => Err(Error::Listing(e.to_string())),
        }
    }
}
