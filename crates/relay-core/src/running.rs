//! The per-store running-state document and its merge semantics.
//!
//! Each store owns one document. Per-resource-key fields live in a map so
//! arbitrary keys can be tracked without a schema. Merges are computed here,
//! client-side, so every `StateStore` backend behaves identically: a backend
//! only has to run [`RunningState::write`] inside its own write critical
//! section.

use crate::trigger::ResourceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    /// Datetime of the last trigger handled for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled: Option<DateTime<Utc>>,
    /// When the current admission window for this key opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningState {
    /// Bumped on every write.
    #[serde(default)]
    pub version: u64,
    /// Triggers admitted and not yet released.
    #[serde(default)]
    pub count: u32,
    /// Resource type currently blocked by an operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyState>,
    pub updated_at: DateTime<Utc>,
}

impl RunningState {
    pub fn key(&self, key: &ResourceKey) -> Option<&KeyState> {
        self.keys.get(&key.to_string())
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    /// Produce the document that results from writing `patch` over `existing`.
    pub fn write(existing: Option<RunningState>, patch: &RunningPatch, mode: WriteMode) -> Self {
        let mut doc = match (existing, mode) {
            (Some(doc), WriteMode::Merge) => doc,
            (Some(doc), WriteMode::Replace) => RunningState {
                version: doc.version,
                ..RunningState::blank(patch.at)
            },
            (None, _) => RunningState::blank(patch.at),
        };
        doc.merge(patch);
        doc
    }

    fn blank(at: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            count: 0,
            stop: None,
            keys: BTreeMap::new(),
            updated_at: at,
        }
    }

    fn merge(&mut self, patch: &RunningPatch) {
        match patch.count {
            Some(CountUpdate::Set(n)) => self.count = n,
            Some(CountUpdate::Decrement) => self.count = self.count.saturating_sub(1),
            None => {}
        }
        match &patch.stop {
            Some(StopUpdate::Set(resource)) => self.stop = Some(resource.clone()),
            Some(StopUpdate::Clear) => self.stop = None,
            None => {}
        }
        for (key, field) in &patch.keys {
            let entry = self.keys.entry(key.clone()).or_default();
            if field.last_handled.is_some() {
                entry.last_handled = field.last_handled;
            }
            if field.init.is_some() {
                entry.init = field.init;
            }
        }
        self.version += 1;
        self.updated_at = patch.at;
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Only the fields named by the patch change.
    Merge,
    /// The document is rebuilt from the patch alone.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountUpdate {
    Set(u32),
    /// Saturates at zero.
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopUpdate {
    Set(String),
    Clear,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPatch {
    pub last_handled: Option<DateTime<Utc>>,
    pub init: Option<DateTime<Utc>>,
}

/// A field-scoped change to a running-state document, stamped with the
/// writer's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningPatch {
    pub at: DateTime<Utc>,
    pub count: Option<CountUpdate>,
    pub stop: Option<StopUpdate>,
    pub keys: BTreeMap<String, KeyPatch>,
}

impl RunningPatch {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            count: None,
            stop: None,
            keys: BTreeMap::new(),
        }
    }

    pub fn count(mut self, update: CountUpdate) -> Self {
        self.count = Some(update);
        self
    }

    pub fn stop(mut self, update: StopUpdate) -> Self {
        self.stop = Some(update);
        self
    }

    pub fn init(mut self, key: &ResourceKey, at: DateTime<Utc>) -> Self {
        self.keys.entry(key.to_string()).or_default().init = Some(at);
        self
    }

    pub fn handled(mut self, key: &ResourceKey, datetime: DateTime<Utc>) -> Self {
        self.keys.entry(key.to_string()).or_default().last_handled = Some(datetime);
        self
    }
}
