//! Per-task batch sequencing and in-flight accounting.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use metrics::gauge;
use tokio::sync::Notify;
use tracing::debug;

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ShuffleError, ShuffleResult};
use crate::metrics::{ENDPOINT_LABEL, SHUFFLE_PUSH_BATCHES_IN_FLIGHT};
use crate::types::{BatchId, TaskKey};

/// Push bookkeeping of a single task.
///
/// Hands out batch ids, tracks which batches are still unacknowledged per worker endpoint and
/// holds the first failure reported for the task. Every release wakes up the tasks waiting for
/// capacity or for an endpoint to drain.
#[derive(Debug)]
pub struct PushState {
    task: TaskKey,
    next_batch_id: AtomicI32,
    in_flight: Mutex<HashMap<String, HashSet<BatchId>>>,
    released: Notify,
    first_error: OnceLock<ShuffleError>,
}

impl PushState {
    pub fn new(task: TaskKey) -> Self {
        Self {
            task,
            next_batch_id: AtomicI32::new(0),
            in_flight: Mutex::new(HashMap::new()),
            released: Notify::new(),
            first_error: OnceLock::new(),
        }
    }

    pub fn task(&self) -> TaskKey {
        self.task
    }

    /// Allocates the next batch id of the task.
    ///
    /// Ids start at 1 and are never handed out twice.
    pub fn next_batch_id(&self) -> BatchId {
        self.next_batch_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records `batch_id` as outstanding on `endpoint`.
    pub fn reserve(&self, batch_id: BatchId, endpoint: &str) {
        let inserted = self
            .lock_in_flight()
            .entry(endpoint.to_string())
            .or_default()
            .insert(batch_id);

        if inserted {
            gauge!(SHUFFLE_PUSH_BATCHES_IN_FLIGHT, ENDPOINT_LABEL => endpoint.to_string())
                .increment(1.0);
        }
    }

    /// Removes `batch_id` from the outstanding batches of `endpoint`.
    ///
    /// Releasing a batch that is not outstanding is a no-op.
    pub fn release(&self, batch_id: BatchId, endpoint: &str) {
        let removed = {
            let mut in_flight = self.lock_in_flight();
            let Some(batches) = in_flight.get_mut(endpoint) else {
                return;
            };

            let removed = batches.remove(&batch_id);
            if batches.is_empty() {
                in_flight.remove(endpoint);
            }

            removed
        };

        if removed {
            gauge!(SHUFFLE_PUSH_BATCHES_IN_FLIGHT, ENDPOINT_LABEL => endpoint.to_string())
                .decrement(1.0);
            self.released.notify_waiters();
        }
    }

    /// Returns the number of outstanding batches on `endpoint`.
    pub fn in_flight_count(&self, endpoint: &str) -> usize {
        self.lock_in_flight().get(endpoint).map_or(0, HashSet::len)
    }

    /// Returns the number of outstanding batches across all endpoints.
    pub fn total_in_flight(&self) -> usize {
        self.lock_in_flight().values().map(HashSet::len).sum()
    }

    /// Returns the first failure recorded for the task.
    pub fn first_error(&self) -> Option<ShuffleError> {
        self.first_error.get().cloned()
    }

    /// Records `err` as the first failure of the task.
    ///
    /// Returns `false` if a failure was already recorded, in which case `err` is dropped.
    pub fn record_error(&self, err: ShuffleError) -> bool {
        let recorded = self.first_error.set(err).is_ok();
        if recorded {
            self.released.notify_waiters();
        }

        recorded
    }

    /// Forgets every outstanding batch without waiting for its completion.
    pub fn discard(&self) {
        let discarded = std::mem::take(&mut *self.lock_in_flight());
        if discarded.is_empty() {
            return;
        }

        for (endpoint, batches) in discarded {
            debug!(
                task = %self.task,
                endpoint = %endpoint,
                batches = batches.len(),
                "discarding in-flight batches"
            );
            gauge!(SHUFFLE_PUSH_BATCHES_IN_FLIGHT, ENDPOINT_LABEL => endpoint)
                .decrement(batches.len() as f64);
        }

        self.released.notify_waiters();
    }

    /// Waits until fewer than `limit` batches are outstanding on `endpoint`.
    pub async fn await_below(
        &self,
        endpoint: &str,
        limit: usize,
        timeout: Duration,
        shutdown: &ShutdownRx,
    ) -> ShuffleResult<()> {
        self.wait_until(endpoint, timeout, shutdown, |batches| {
            batches.map_or(0, HashSet::len) < limit
        })
        .await
    }

    /// Waits until no batch is outstanding on `endpoint`.
    ///
    /// `own_batch` is the slot held by the caller itself, which can only be released once the
    /// caller is done and is therefore not waited for.
    pub async fn await_drain(
        &self,
        endpoint: &str,
        own_batch: Option<BatchId>,
        timeout: Duration,
        shutdown: &ShutdownRx,
    ) -> ShuffleResult<()> {
        self.wait_until(endpoint, timeout, shutdown, |batches| {
            only_own_batch(batches, own_batch)
        })
        .await
    }

    /// Returns `true` if no batch other than `own_batch` is outstanding on `endpoint`.
    pub fn is_drained(&self, endpoint: &str, own_batch: Option<BatchId>) -> bool {
        only_own_batch(self.lock_in_flight().get(endpoint), own_batch)
    }

    async fn wait_until<P>(
        &self,
        endpoint: &str,
        timeout: Duration,
        shutdown: &ShutdownRx,
        is_ready: P,
    ) -> ShuffleResult<()>
    where
        P: Fn(Option<&HashSet<BatchId>>) -> bool,
    {
        let wait = async {
            loop {
                // Register before checking so a release in between is not missed.
                let released = self.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();

                if let Some(err) = self.first_error() {
                    return Err(err);
                }

                if is_ready(self.lock_in_flight().get(endpoint)) {
                    return Ok(());
                }

                released.await;
            }
        };

        let mut shutdown = shutdown.clone();
        tokio::select! {
            result = tokio::time::timeout(timeout, wait) => match result {
                Ok(result) => result,
                Err(_) => {
                    bail!(
                        ErrorKind::InFlightLimitTimeout,
                        "Timed out waiting for in-flight batches",
                        format!(
                            "task {} still has {} batches in flight to {endpoint} after {timeout:?}",
                            self.task,
                            self.in_flight_count(endpoint)
                        )
                    );
                }
            },
            _ = shutdown.wait() => {
                bail!(
                    ErrorKind::Cancelled,
                    "Shuffle client is shutting down",
                    format!("task {} stopped waiting for {endpoint}", self.task)
                );
            }
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, HashSet<BatchId>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn only_own_batch(batches: Option<&HashSet<BatchId>>, own_batch: Option<BatchId>) -> bool {
    batches.is_none_or(|batches| batches.iter().all(|batch_id| Some(*batch_id) == own_batch))
}
