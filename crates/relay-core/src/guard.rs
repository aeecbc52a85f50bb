//! Trigger arbitration.
//!
//! Decides whether an inbound trigger may run now, must wait for running
//! siblings, or should be dropped because newer work already covered it. The
//! only shared state is one running-state document per store, read and then
//! merge-written; there is no lock, so the guarantee is best-effort
//! single-flight per resource key within the freshness window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::running::{CountUpdate, RunningPatch, RunningState, StopUpdate, WriteMode};
use crate::store::{StateStore, StoreError};
use crate::trigger::ResourceKey;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("coordination unavailable: {0}")]
    CoordinationUnavailable(#[from] StoreError),
}

/// Why a trigger was dropped without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// An operator stopped this resource type for the store.
    Stopped,
    /// A trigger with an equal or newer datetime was already handled.
    Superseded,
    /// Found superseded when re-checked after waiting for running siblings.
    SupersededWhileWaiting,
    /// Too many triggers running, or this key was admitted moments ago.
    RateLimited,
}

impl AbandonReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Superseded => "superseded",
            Self::SupersededWhileWaiting => "superseded while waiting",
            Self::RateLimited => "too many requests",
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionTicket
// ---------------------------------------------------------------------------

/// Proof of admission. Hand it back to [`Guard::release`] exactly once.
#[must_use = "an admission ticket must be released"]
#[derive(Debug)]
pub struct AdmissionTicket {
    store_id: String,
    key: ResourceKey,
    trigger_datetime: DateTime<Utc>,
    previous_count: u32,
    cold_start: bool,
    released: bool,
}

impl AdmissionTicket {
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Running count observed before this admission incremented it.
    pub fn previous_count(&self) -> u32 {
        self.previous_count
    }

    pub fn cold_start(&self) -> bool {
        self.cold_start
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                store = %self.store_id,
                key = %self.key,
                "admission ticket dropped without release; running count will drift until the document goes stale"
            );
        }
    }
}

#[derive(Debug)]
pub enum AdmissionDecision {
    Proceed(AdmissionTicket),
    /// Other triggers are running. Wait `delay`, then call [`Guard::recheck`].
    RetryAfter {
        ticket: AdmissionTicket,
        delay: Duration,
    },
    Abandon(AbandonReason),
}

/// Final outcome of [`Guard::admit`], after any waiting.
#[derive(Debug)]
pub enum Admission {
    Proceed(AdmissionTicket),
    Abandon(AbandonReason),
}

enum Verdict {
    Admit { previous: u32, mode: WriteMode },
    Abandon(AbandonReason),
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct Guard {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: GuardConfig,
}

impl Guard {
    pub fn new(store: Arc<dyn StateStore>, config: GuardConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Admit or abandon, sleeping through any contention back-off.
    pub async fn admit(
        &self,
        store_id: &str,
        key: &ResourceKey,
        datetime: DateTime<Utc>,
    ) -> Result<Admission, GuardError> {
        match self.try_admit(store_id, key, datetime).await? {
            AdmissionDecision::Proceed(ticket) => Ok(Admission::Proceed(ticket)),
            AdmissionDecision::Abandon(reason) => Ok(Admission::Abandon(reason)),
            AdmissionDecision::RetryAfter { ticket, delay } => {
                tracing::debug!(store = store_id, %key, ?delay, "waiting for running triggers");
                tokio::time::sleep(delay).await;
                match self.recheck(ticket).await? {
                    AdmissionDecision::Proceed(ticket) => Ok(Admission::Proceed(ticket)),
                    AdmissionDecision::Abandon(reason) => Ok(Admission::Abandon(reason)),
                    AdmissionDecision::RetryAfter { ticket, .. } => {
                        Ok(Admission::Proceed(ticket))
                    }
                }
            }
        }
    }

    /// One pass of the admission check. Takes a slot unless abandoning.
    pub async fn try_admit(
        &self,
        store_id: &str,
        key: &ResourceKey,
        datetime: DateTime<Utc>,
    ) -> Result<AdmissionDecision, GuardError> {
        let doc = self.store.read(store_id).await?;
        let now = self.clock.now();

        let (previous, mode) = match self.evaluate(doc.as_ref(), key, datetime, now) {
            Verdict::Abandon(reason) => {
                tracing::info!(store = store_id, %key, reason = reason.as_str(), "trigger abandoned");
                return Ok(AdmissionDecision::Abandon(reason));
            }
            Verdict::Admit { previous, mode } => (previous, mode),
        };

        let patch = RunningPatch::at(now)
            .count(CountUpdate::Set(previous + 1))
            .init(key, now);
        self.store.write(store_id, &patch, mode).await?;

        let ticket = AdmissionTicket {
            store_id: store_id.to_string(),
            key: key.clone(),
            trigger_datetime: datetime,
            previous_count: previous,
            cold_start: mode == WriteMode::Replace,
            released: false,
        };

        if previous > 0 {
            return Ok(AdmissionDecision::RetryAfter {
                ticket,
                delay: self.config.recheck_delay(previous),
            });
        }
        Ok(AdmissionDecision::Proceed(ticket))
    }

    /// Re-read the document after a back-off and decide whether the held slot
    /// should still run. Releases the slot itself when abandoning.
    pub async fn recheck(&self, ticket: AdmissionTicket) -> Result<AdmissionDecision, GuardError> {
        let doc = match self.store.read(&ticket.store_id).await {
            Ok(doc) => doc,
            Err(e) => {
                self.release_quietly(ticket).await;
                return Err(e.into());
            }
        };

        let superseded = doc.as_ref().is_some_and(|doc| {
            doc.stop.as_deref() == Some(ticket.key.resource.as_str())
                || doc
                    .key(&ticket.key)
                    .and_then(|k| k.last_handled)
                    .is_some_and(|last| last >= ticket.trigger_datetime)
        });

        if superseded {
            tracing::info!(
                store = %ticket.store_id,
                key = %ticket.key,
                "trigger superseded while waiting"
            );
            self.release(ticket, false).await?;
            return Ok(AdmissionDecision::Abandon(
                AbandonReason::SupersededWhileWaiting,
            ));
        }
        Ok(AdmissionDecision::Proceed(ticket))
    }

    /// Give the slot back. When `handled` (a handler ran for the trigger),
    /// record its datetime so equal or older triggers for the key are
    /// rejected from now on.
    pub async fn release(
        &self,
        mut ticket: AdmissionTicket,
        handled: bool,
    ) -> Result<(), GuardError> {
        ticket.released = true;
        let mut patch = RunningPatch::at(self.clock.now()).count(CountUpdate::Decrement);
        if handled {
            patch = patch.handled(&ticket.key, ticket.trigger_datetime);
        }
        self.store
            .write(&ticket.store_id, &patch, WriteMode::Merge)
            .await?;
        Ok(())
    }

    async fn release_quietly(&self, ticket: AdmissionTicket) {
        let store_id = ticket.store_id.clone();
        if let Err(e) = self.release(ticket, false).await {
            tracing::error!(store = %store_id, "failed to release admission slot: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Operator controls
    // -----------------------------------------------------------------------

    pub async fn inspect(&self, store_id: &str) -> Result<Option<RunningState>, GuardError> {
        Ok(self.store.read(store_id).await?)
    }

    /// Block every trigger of `resource` for the store while the document is fresh.
    pub async fn stop(&self, store_id: &str, resource: &str) -> Result<RunningState, GuardError> {
        let patch = RunningPatch::at(self.clock.now()).stop(StopUpdate::Set(resource.to_string()));
        Ok(self.store.write(store_id, &patch, WriteMode::Merge).await?)
    }

    pub async fn clear_stop(&self, store_id: &str) -> Result<RunningState, GuardError> {
        let patch = RunningPatch::at(self.clock.now()).stop(StopUpdate::Clear);
        Ok(self.store.write(store_id, &patch, WriteMode::Merge).await?)
    }

    /// Replace the document with an empty one, forgetting every key.
    pub async fn reset(&self, store_id: &str) -> Result<RunningState, GuardError> {
        let patch = RunningPatch::at(self.clock.now()).count(CountUpdate::Set(0));
        Ok(self.store.write(store_id, &patch, WriteMode::Replace).await?)
    }

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    fn evaluate(
        &self,
        doc: Option<&RunningState>,
        key: &ResourceKey,
        datetime: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Verdict {
        let Some(doc) = doc else {
            return Verdict::Admit {
                previous: 0,
                mode: WriteMode::Replace,
            };
        };

        let age = doc.age(now);
        if age > self.config.stale_ceiling() {
            // Slots from a crashed run are never coming back.
            return Verdict::Admit {
                previous: 0,
                mode: WriteMode::Replace,
            };
        }
        if age >= self.config.fresh_window() {
            // Counter is too old to trust but the keys are still useful.
            return Verdict::Admit {
                previous: 0,
                mode: WriteMode::Merge,
            };
        }

        if doc.stop.as_deref() == Some(key.resource.as_str()) {
            return Verdict::Abandon(AbandonReason::Stopped);
        }
        let state = doc.key(key);
        if state
            .and_then(|s| s.last_handled)
            .is_some_and(|last| last >= datetime)
        {
            return Verdict::Abandon(AbandonReason::Superseded);
        }
        if doc.count > self.config.max_running {
            return Verdict::Abandon(AbandonReason::RateLimited);
        }
        if state
            .and_then(|s| s.init)
            .is_some_and(|init| now - init < self.config.min_spacing())
        {
            return Verdict::Abandon(AbandonReason::RateLimited);
        }

        Verdict::Admit {
            previous: doc.count,
            mode: WriteMode::Merge,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
