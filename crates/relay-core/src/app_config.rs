//! Per-store application settings and the work queues persisted inside them.
//!
//! Queues live under namespace keys such as `exportation` or `__importation`.
//! Each leading underscore marks one level of deferral: a hidden queue holds
//! work that was re-queued and is drained when nothing fresher is waiting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest hidden level a work item can be pushed to.
pub const MAX_DEPTH: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncAction {
    Exportation,
    Importation,
}

impl SyncAction {
    pub const ALL: [SyncAction; 2] = [SyncAction::Exportation, SyncAction::Importation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exportation => "exportation",
            Self::Importation => "importation",
        }
    }
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub action: SyncAction,
    pub depth: u8,
}

impl Namespace {
    pub fn visible(action: SyncAction) -> Self {
        Self { action, depth: 0 }
    }

    pub fn hidden(action: SyncAction, depth: u8) -> Self {
        Self {
            action,
            depth: depth.min(MAX_DEPTH),
        }
    }

    pub fn is_hidden(self) -> bool {
        self.depth > 0
    }

    /// One level further from the surface, or `None` past [`MAX_DEPTH`].
    pub fn deeper(self) -> Option<Self> {
        (self.depth < MAX_DEPTH).then(|| Self {
            action: self.action,
            depth: self.depth + 1,
        })
    }

    /// Visible namespaces first, then each action's hidden levels in depth order.
    pub fn scan_order() -> Vec<Namespace> {
        let mut order: Vec<Namespace> = SyncAction::ALL.iter().map(|a| Self::visible(*a)).collect();
        for action in SyncAction::ALL {
            for depth in 1..=MAX_DEPTH {
                order.push(Self::hidden(action, depth));
            }
        }
        order
    }

    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim_start_matches('_');
        let depth = u8::try_from(s.len() - trimmed.len()).ok()?;
        if depth > MAX_DEPTH {
            return None;
        }
        let action = SyncAction::ALL.into_iter().find(|a| a.as_str() == trimmed)?;
        Some(Self { action, depth })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str("_")?;
        }
        f.write_str(self.action.as_str())
    }
}

// ---------------------------------------------------------------------------
// Work queues
// ---------------------------------------------------------------------------

/// Queue name → ordered ids. Ordered by queue name for a stable scan.
pub type WorkQueues = BTreeMap<String, Vec<String>>;

/// A set of namespaced queues, either persisted in [`AppConfig`] or built
/// from a single trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkDescriptor {
    namespaces: BTreeMap<String, WorkQueues>,
}

impl WorkDescriptor {
    pub fn single(namespace: Namespace, queue: &str, id: &str) -> Self {
        let mut queues = WorkQueues::new();
        queues.insert(queue.to_string(), vec![id.to_string()]);
        let mut namespaces = BTreeMap::new();
        namespaces.insert(namespace.to_string(), queues);
        Self { namespaces }
    }

    pub fn queues(&self, namespace: Namespace) -> Option<&WorkQueues> {
        self.namespaces.get(&namespace.to_string())
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Settings the merchant configured for this integration on one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Credential for the external system. Nothing is dispatched without it.
    #[serde(default, alias = "tiny_api_token", skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Create platform products for new source products.
    #[serde(default)]
    pub new_products: bool,
    /// Push price changes of existing products.
    #[serde(default)]
    pub update_price: bool,
    /// Export newly created orders.
    #[serde(default)]
    pub new_orders: bool,
    /// Resource types whose triggers are acknowledged and skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_triggers: Vec<String>,
    /// Everything else, including the namespaced queues.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppConfig {
    pub fn has_api_token(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn ignores(&self, resource: &str) -> bool {
        self.ignore_triggers.iter().any(|r| r == resource)
    }

    /// Queues persisted under `namespace`. Non-array and non-string entries are skipped.
    pub fn queues(&self, namespace: Namespace) -> WorkQueues {
        let Some(Value::Object(obj)) = self.extra.get(&namespace.to_string()) else {
            return WorkQueues::new();
        };
        obj.iter()
            .filter_map(|(queue, ids)| {
                let ids = ids.as_array()?;
                Some((
                    queue.clone(),
                    ids.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                ))
            })
            .collect()
    }

    pub fn queue_len(&self, namespace: Namespace, queue: &str) -> usize {
        self.queues(namespace).get(queue).map_or(0, Vec::len)
    }

    /// Namespaces whose queues differ from `before`, in scan order.
    pub fn changed_namespaces(&self, before: &AppConfig) -> Vec<Namespace> {
        Namespace::scan_order()
            .into_iter()
            .filter(|ns| {
                let key = ns.to_string();
                self.extra.get(&key) != before.extra.get(&key)
            })
            .collect()
    }

    /// Every persisted namespace as a descriptor for the resolver.
    pub fn descriptor(&self) -> WorkDescriptor {
        let namespaces = Namespace::scan_order()
            .into_iter()
            .map(|ns| (ns.to_string(), self.queues(ns)))
            .filter(|(_, queues)| !queues.is_empty())
            .collect();
        WorkDescriptor { namespaces }
    }

    /// Remove the first occurrence of `id` from a queue. Empty queues are removed.
    pub fn dequeue(&mut self, namespace: Namespace, queue: &str, id: &str) -> bool {
        let mut queues = self.queues(namespace);
        let Some(ids) = queues.get_mut(queue) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|x| x == id) else {
            return false;
        };
        ids.remove(pos);
        if ids.is_empty() {
            queues.remove(queue);
        }
        self.set_queues(namespace, queues);
        true
    }

    /// Append `id` to a queue unless it is already waiting there.
    pub fn enqueue(&mut self, namespace: Namespace, queue: &str, id: &str) {
        let mut queues = self.queues(namespace);
        let ids = queues.entry(queue.to_string()).or_default();
        if !ids.iter().any(|x| x == id) {
            ids.push(id.to_string());
        }
        self.set_queues(namespace, queues);
    }

    fn set_queues(&mut self, namespace: Namespace, queues: WorkQueues) {
        let key = namespace.to_string();
        if queues.is_empty() {
            self.extra.remove(&key);
            return;
        }
        let mut obj = match self.extra.remove(&key) {
            Some(Value::Object(obj)) => obj,
            _ => Map::new(),
        };
        // Drop queue entries that were emptied, keep unrelated non-array fields.
        obj.retain(|name, v| !v.is_array() || queues.contains_key(name));
        for (name, ids) in queues {
            obj.insert(name, Value::from(ids));
        }
        self.extra.insert(key, Value::Object(obj));
    }
}
