//! Maps an admitted trigger to at most one unit of handler work.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::app_config::{AppConfig, Namespace, SyncAction, WorkDescriptor};
use crate::handler::{HandlerRegistry, SyncHandler, WorkItem};
use crate::trigger::{Trigger, TriggerAction};

pub struct Dispatch {
    pub handler: Arc<dyn SyncHandler>,
    pub work: WorkItem,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch").field("work", &self.work).finish()
    }
}

#[derive(Debug)]
pub enum Resolution {
    /// The store asked for this resource type to be skipped.
    Ignored,
    /// No policy or queue applies.
    Nothing,
    Dispatch(Dispatch),
}

/// Decide which handler, if any, runs for `trigger`.
///
/// Namespaces are scanned in [`Namespace::scan_order`]; within a namespace,
/// queues in name order. The first queue whose head is a non-empty id with a
/// registered handler wins, and only that head id is dispatched.
pub fn resolve(trigger: &Trigger, app: &AppConfig, registry: &HandlerRegistry) -> Resolution {
    if app.ignores(&trigger.resource) {
        return Resolution::Ignored;
    }
    if !app.has_api_token() {
        return Resolution::Nothing;
    }
    let Some((descriptor, allow_create, from_app_queue)) = describe(trigger, app) else {
        return Resolution::Nothing;
    };

    for namespace in Namespace::scan_order() {
        let Some(queues) = descriptor.queues(namespace) else {
            continue;
        };
        for (queue, ids) in queues {
            let Some(next) = ids.first().filter(|id| !id.is_empty()) else {
                continue;
            };
            let Some(handler) = registry.get(namespace.action, queue) else {
                continue;
            };
            return Resolution::Dispatch(Dispatch {
                handler,
                work: WorkItem {
                    namespace,
                    queue: queue.clone(),
                    id: next.clone(),
                    allow_create,
                    from_app_queue,
                },
            });
        }
    }
    Resolution::Nothing
}

/// Build the work descriptor for a trigger along with its create policy.
fn describe(trigger: &Trigger, app: &AppConfig) -> Option<(WorkDescriptor, bool, bool)> {
    let fresh = Namespace::hidden(SyncAction::Exportation, 1);
    match trigger.resource.as_str() {
        "applications" => Some((app.descriptor(), true, true)),
        "products" => {
            trigger.body.as_ref()?;
            let id = trigger.target_id()?;
            let allow_create = if trigger.action == TriggerAction::Create {
                if !app.new_products {
                    return None;
                }
                true
            } else {
                if !app.update_price || !is_truthy(trigger.body_field("price")) {
                    return None;
                }
                false
            };
            Some((
                WorkDescriptor::single(fresh, "product_ids", id),
                allow_create,
                false,
            ))
        }
        "orders" => {
            trigger.body.as_ref()?;
            let id = trigger.target_id()?;
            Some((
                WorkDescriptor::single(fresh, "order_ids", id),
                app.new_orders,
                false,
            ))
        }
        _ => None,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
