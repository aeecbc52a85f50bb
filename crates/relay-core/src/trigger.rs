//! Inbound change notifications from the commerce platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    Create,
    #[serde(alias = "change")]
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// A single change notification. Never mutated after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub resource: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub inserted_id: Option<String>,
    pub action: TriggerAction,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl Trigger {
    /// The id of the changed document. Creations carry it as `inserted_id`.
    pub fn target_id(&self) -> Option<&str> {
        fn present(id: &Option<String>) -> Option<&str> {
            id.as_deref().filter(|id| !id.is_empty())
        }
        present(&self.resource_id).or_else(|| present(&self.inserted_id))
    }

    pub fn resource_key(&self) -> Option<ResourceKey> {
        self.target_id()
            .map(|id| ResourceKey::new(self.resource.clone(), id))
    }

    /// Field lookup on the trigger body, if any.
    pub fn body_field(&self, name: &str) -> Option<&serde_json::Value> {
        self.body.as_ref().and_then(|b| b.get(name))
    }
}

// ---------------------------------------------------------------------------
// ResourceKey
// ---------------------------------------------------------------------------

/// Identity used for arbitration: resource type plus instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub resource: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.resource, self.resource_id)
    }
}
