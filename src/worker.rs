//! Fetch one user, with retries, and record the result

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::config::RetryConfig;
use crate::error::{FetchError, Result};
use crate::limiter::Limiter;
use crate::retry::{RetryError, with_retry};
use crate::sink::ResultSink;
use crate::store::IdentifierStore;
use crate::types::Identifier;

/// How one identifier's task ended. Every outcome except
/// [`Recorded`](Outcome::Recorded) and [`Skipped`](Outcome::Skipped) leaves
/// the identifier pending for the next run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Row appended and identifier removed from the pending set
    Recorded,
    /// A row already existed
    Skipped,
    /// The service answered with a non-OK status; not retried
    Rejected(reqwest::StatusCode),
    /// The service answered OK with an unusable payload; not retried
    Malformed,
    /// Every attempt failed in transport
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// The request could not be built or sent at all; not retried
    Failed,
    /// Cancellation observed before the work could finish
    Cancelled,
}

/// Everything a fetch task shares with its siblings.
#[derive(Clone, Debug)]
pub struct Worker {
    api: ApiClient,
    limiter: Limiter,
    sink: Arc<ResultSink>,
    store: Arc<IdentifierStore>,
    retry: RetryConfig,
}

impl Worker {
    pub fn new(
        api: ApiClient,
        limiter: Limiter,
        sink: Arc<ResultSink>,
        store: Arc<IdentifierStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            limiter,
            sink,
            store,
            retry,
        }
    }

    /// Process `id` under a limiter slot.
    ///
    /// Network failures are folded into the returned [`Outcome`]. An `Err`
    /// means the sink or the store could not be written, which the caller
    /// should treat as fatal for the run.
    pub async fn run(&self, id: Identifier, cancel: CancellationToken) -> Result<Outcome> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            permit = self.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(Outcome::Cancelled),
            },
        };

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        if self.sink.has(&id) {
            debug!(user_id = %id, "already recorded, skipping");
            // An earlier run may have stopped between the append and the removal
            self.forget(&id).await?;
            return Ok(Outcome::Skipped);
        }

        let fetched = with_retry(&self.retry, &cancel, |attempt| {
            debug!(user_id = %id, attempt, "fetching user");
            self.api.fetch_user(&id)
        })
        .await;

        match fetched {
            Ok(record) => {
                self.sink.append(&record)?;
                self.forget(&id).await?;
                info!(user_id = %id, "recorded user");
                Ok(Outcome::Recorded)
            }
            Err(err) => Ok(failure_outcome(&id, err)),
        }
    }

    /// Remove `id` from the pending set off the async threads; removals can compact.
    async fn forget(&self, id: &Identifier) -> Result<()> {
        let store = self.store.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || store.remove(&id)).await??;
        Ok(())
    }
}

fn failure_outcome(id: &Identifier, err: RetryError<FetchError>) -> Outcome {
    match err {
        RetryError::Permanent(FetchError::Status(status)) => {
            warn!(user_id = %id, status = status.as_u16(), "service refused user, leaving pending");
            Outcome::Rejected(status)
        }
        RetryError::Permanent(FetchError::Malformed(reason)) => {
            error!(user_id = %id, %reason, "malformed user payload, leaving pending");
            Outcome::Malformed
        }
        RetryError::Permanent(err @ FetchError::Transport(_)) => {
            error!(user_id = %id, error = %err, "request could not be sent, leaving pending");
            Outcome::Failed
        }
        RetryError::Exhausted { attempts, last } => {
            warn!(user_id = %id, attempts, error = %last, "giving up on user for this run");
            Outcome::Exhausted { attempts }
        }
        RetryError::Cancelled { attempts } => {
            debug!(user_id = %id, attempts, "cancelled");
            Outcome::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsendable_request_is_a_failure_not_exhaustion() {
        let builder_err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(builder_err.is_builder());

        let outcome = failure_outcome(
            &"u1".into(),
            RetryError::Permanent(FetchError::Transport(builder_err)),
        );
        assert_eq!(outcome, Outcome::Failed);
    }

    #[test]
    fn refusals_and_exhaustion_keep_their_outcomes() {
        let id = Identifier::from("u1");
        assert_eq!(
            failure_outcome(
                &id,
                RetryError::Permanent(FetchError::Status(reqwest::StatusCode::NOT_FOUND))
            ),
            Outcome::Rejected(reqwest::StatusCode::NOT_FOUND)
        );
        assert_eq!(
            failure_outcome(&id, RetryError::Permanent(FetchError::Malformed("x".into()))),
            Outcome::Malformed
        );
        assert_eq!(
            failure_outcome(
                &id,
                RetryError::Exhausted {
                    attempts: 3,
                    last: FetchError::Malformed("timeout".into()),
                }
            ),
            Outcome::Exhausted { attempts: 3 }
        );
        assert_eq!(
            failure_outcome(&id, RetryError::Cancelled { attempts: 1 }),
            Outcome::Cancelled
        );
    }
}
