//! One trigger, end to end: admission, resolution, handler, queue bookkeeping
//! and release of the admission slot.

use std::sync::Arc;

use thiserror::Error;

use crate::app_config::{AppConfig, Namespace};
use crate::guard::{AbandonReason, Admission, Guard, GuardError};
use crate::handler::{HandlerRegistry, SyncContext, SyncError, WorkItem};
use crate::platform::{PlatformApi, PlatformError};
use crate::resolver::{resolve, Dispatch, Resolution};
use crate::trigger::Trigger;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error(transparent)]
    Coordination(#[from] GuardError),

    #[error(transparent)]
    Upstream(#[from] SyncError),
}

impl From<PlatformError> for RelayError {
    fn from(e: PlatformError) -> Self {
        Self::Upstream(SyncError::Platform(e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A handler ran for the head id of `namespace/queue`.
    Processed {
        namespace: Namespace,
        queue: String,
        more_queued: bool,
    },
    NothingToDo,
    /// The store's settings skip this resource type.
    Ignored,
    /// Dropped by the guard before any work started.
    Skipped(AbandonReason),
}

pub struct Relay {
    guard: Guard,
    platform: Arc<dyn PlatformApi>,
    registry: HandlerRegistry,
}

impl Relay {
    pub fn new(guard: Guard, platform: Arc<dyn PlatformApi>, registry: HandlerRegistry) -> Self {
        Self {
            guard,
            platform,
            registry,
        }
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub async fn handle(&self, store_id: &str, trigger: &Trigger) -> Result<Outcome, RelayError> {
        let key = trigger.resource_key().ok_or_else(|| {
            RelayError::InvalidTrigger("trigger has neither resource_id nor inserted_id".into())
        })?;

        let ticket = match self.guard.admit(store_id, &key, trigger.datetime).await? {
            Admission::Proceed(ticket) => ticket,
            Admission::Abandon(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let (dispatched, result) = match self.prepare(store_id, trigger).await {
            Ok(Prepared::Done(outcome)) => (false, Ok(outcome)),
            Ok(Prepared::Run(run)) => (true, self.dispatch(store_id, run).await),
            Err(e) => (false, Err(e)),
        };

        // The slot is always given back; the key is stamped once a handler ran.
        if let Err(e) = self.guard.release(ticket, dispatched).await {
            tracing::error!(store = store_id, %key, "failed to release admission slot: {e}");
        }
        result
    }

    async fn prepare(&self, store_id: &str, trigger: &Trigger) -> Result<Prepared, RelayError> {
        let auth = self.platform.auth(store_id).await?;
        let app = self.platform.app_config(store_id).await?;

        let dispatch = match resolve(trigger, &app, &self.registry) {
            Resolution::Ignored => return Ok(Prepared::Done(Outcome::Ignored)),
            Resolution::Nothing => return Ok(Prepared::Done(Outcome::NothingToDo)),
            Resolution::Dispatch(dispatch) => dispatch,
        };
        let ctx = SyncContext {
            store_id: store_id.to_string(),
            auth,
        };
        Ok(Prepared::Run(Run { ctx, app, dispatch }))
    }

    async fn dispatch(&self, store_id: &str, run: Run) -> Result<Outcome, RelayError> {
        let Run {
            ctx,
            mut app,
            dispatch,
        } = run;
        let work = dispatch.work;
        tracing::info!(
            store = store_id,
            queue = %format!("{}/{}", work.namespace, work.queue),
            id = %work.id,
            "starting"
        );

        let before = app.clone();
        let result = dispatch.handler.handle(&ctx, &work, &mut app).await;

        settle_queue(&mut app, &work, result.is_ok());
        let changed = app.changed_namespaces(&before);
        if !changed.is_empty() {
            self.platform.save_app_config(store_id, &app, &changed).await?;
        }

        if let Err(e) = result {
            tracing::error!(
                store = store_id,
                queue = %format!("{}/{}", work.namespace, work.queue),
                id = %work.id,
                "handler failed: {e}"
            );
            return Err(e.into());
        }

        let more_queued = app.queue_len(work.namespace, &work.queue) > 0;
        Ok(Outcome::Processed {
            namespace: work.namespace,
            queue: work.queue,
            more_queued,
        })
    }
}

enum Prepared {
    Done(Outcome),
    Run(Run),
}

struct Run {
    ctx: SyncContext,
    app: AppConfig,
    dispatch: Dispatch,
}

/// Update the persisted queues after a dispatch.
///
/// Ids taken from the store's queues leave them on success. A failed id is
/// parked one hidden level deeper and dropped past the deepest level.
pub fn settle_queue(app: &mut AppConfig, work: &WorkItem, succeeded: bool) {
    if work.from_app_queue {
        app.dequeue(work.namespace, &work.queue, &work.id);
    }
    if succeeded {
        return;
    }
    match work.namespace.deeper() {
        Some(deeper) => {
            tracing::warn!(
                id = %work.id,
                queue = %format!("{deeper}/{}", work.queue),
                "re-queued after failure"
            );
            app.enqueue(deeper, &work.queue, &work.id);
        }
        None => {
            tracing::error!(
                id = %work.id,
                queue = %format!("{}/{}", work.namespace, work.queue),
                "dropped after repeated failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::SyncAction;
    use crate::config::GuardConfig;
    use crate::handler::SyncHandler;
    use crate::platform::StoreAuth;
    use crate::store::MemoryStore;
    use crate::trigger::ResourceKey;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakePlatform {
        app: Mutex<AppConfig>,
        saves: AtomicUsize,
    }

    impl FakePlatform {
        fn new(app: Value) -> Arc<Self> {
            Arc::new(Self {
                app: Mutex::new(serde_json::from_value(app).unwrap()),
                saves: AtomicUsize::new(0),
            })
        }

        fn app(&self) -> AppConfig {
            self.app.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn auth(&self, _: &str) -> Result<StoreAuth, PlatformError> {
            Ok(StoreAuth {
                my_id: "me".into(),
                access_token: "tok".into(),
            })
        }

        async fn get(&self, _: &str, _: &str) -> Result<Value, PlatformError> {
            Ok(Value::Null)
        }

        async fn create(&self, _: &str, _: &str, _: &Value) -> Result<Value, PlatformError> {
            Ok(Value::Null)
        }

        async fn update(&self, _: &str, _: &str, _: &Value) -> Result<Value, PlatformError> {
            Ok(Value::Null)
        }

        async fn app_config(&self, _: &str) -> Result<AppConfig, PlatformError> {
            Ok(self.app())
        }

        async fn save_app_config(
            &self,
            _: &str,
            app: &AppConfig,
            namespaces: &[Namespace],
        ) -> Result<(), PlatformError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.app.lock().unwrap();
            for ns in namespaces {
                let key = ns.to_string();
                match app.extra.get(&key) {
                    Some(queues) => {
                        stored.extra.insert(key, queues.clone());
                    }
                    None => {
                        stored.extra.remove(&key);
                    }
                }
            }
            Ok(())
        }
    }

    /// Handler that fails for ids starting with `bad`.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncHandler for Recorder {
        async fn handle(
            &self,
            _: &SyncContext,
            work: &WorkItem,
            _: &mut AppConfig,
        ) -> Result<(), SyncError> {
            self.seen.lock().unwrap().push(work.id.clone());
            if work.id.starts_with("bad") {
                return Err(SyncError::Source(format!("{} rejected", work.id)));
            }
            Ok(())
        }
    }

    struct Fixture {
        relay: Relay,
        store: Arc<MemoryStore>,
        platform: Arc<FakePlatform>,
        handler: Arc<Recorder>,
    }

    fn fixture(app: Value) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let platform = FakePlatform::new(app);
        let handler = Arc::new(Recorder::default());
        let registry = HandlerRegistry::new()
            .register(SyncAction::Importation, "skus", handler.clone())
            .register(SyncAction::Exportation, "product_ids", handler.clone());
        let relay = Relay::new(
            Guard::new(store.clone(), GuardConfig::default()),
            platform.clone(),
            registry,
        );
        Fixture {
            relay,
            store,
            platform,
            handler,
        }
    }

    fn app_trigger() -> Trigger {
        serde_json::from_value(json!({
            "resource": "applications",
            "resource_id": "app1",
            "action": "change",
            "datetime": chrono::Utc::now()
        }))
        .unwrap()
    }

    fn product_trigger(id: &str) -> Trigger {
        serde_json::from_value(json!({
            "resource": "products",
            "resource_id": id,
            "action": "change",
            "datetime": chrono::Utc::now(),
            "body": { "price": 10 }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn processes_head_and_reports_remaining_work() {
        let f = fixture(json!({
            "api_token": "t",
            "importation": { "skus": ["A", "B"] }
        }));

        let outcome = f.relay.handle("1011", &app_trigger()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Processed {
                namespace: Namespace::visible(SyncAction::Importation),
                queue: "skus".into(),
                more_queued: true,
            }
        );
        assert_eq!(f.handler.seen.lock().unwrap().as_slice(), ["A"]);
        assert_eq!(
            f.platform.app().queues(Namespace::visible(SyncAction::Importation))["skus"],
            ["B"]
        );
        assert_eq!(f.platform.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_id_yields_no_more_queued_and_frees_slot() {
        let f = fixture(json!({ "api_token": "t", "importation": { "skus": ["A"] } }));

        let outcome = f.relay.handle("1011", &app_trigger()).await.unwrap();
        assert!(matches!(outcome, Outcome::Processed { more_queued: false, .. }));

        let doc = f.store.get("1011").unwrap();
        assert_eq!(doc.count, 0);
        let key = ResourceKey::new("applications", "app1");
        assert!(doc.key(&key).and_then(|k| k.last_handled).is_some());
    }

    #[tokio::test]
    async fn failure_moves_id_one_level_deeper_and_releases() {
        let f = fixture(json!({ "api_token": "t", "importation": { "skus": ["bad1"] } }));

        let err = f.relay.handle("1011", &app_trigger()).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(SyncError::Source(_))));

        let app = f.platform.app();
        assert!(app.queues(Namespace::visible(SyncAction::Importation)).is_empty());
        assert_eq!(
            app.queues(Namespace::hidden(SyncAction::Importation, 1))["skus"],
            ["bad1"]
        );

        let doc = f.store.get("1011").unwrap();
        assert_eq!(doc.count, 0);
        let key = ResourceKey::new("applications", "app1");
        assert!(doc.key(&key).and_then(|k| k.last_handled).is_some());
    }

    #[tokio::test]
    async fn redelivery_after_failure_does_not_rerun_handler() {
        let f = fixture(json!({ "api_token": "t", "update_price": true }));
        let trigger = product_trigger("bad1");

        f.relay.handle("1011", &trigger).await.unwrap_err();
        let outcome = f.relay.handle("1011", &trigger).await.unwrap();

        assert_eq!(outcome, Outcome::Skipped(AbandonReason::Superseded));
        assert_eq!(f.handler.seen.lock().unwrap().as_slice(), ["bad1"]);
        assert_eq!(
            f.platform.app().queues(Namespace::hidden(SyncAction::Exportation, 2))["product_ids"],
            ["bad1"]
        );
    }

    /// Fails after another run dequeued `A` from the platform's settings.
    struct ConcurrentDequeue {
        platform: Arc<FakePlatform>,
    }

    #[async_trait]
    impl SyncHandler for ConcurrentDequeue {
        async fn handle(
            &self,
            _: &SyncContext,
            work: &WorkItem,
            _: &mut AppConfig,
        ) -> Result<(), SyncError> {
            self.platform
                .app
                .lock()
                .unwrap()
                .dequeue(Namespace::visible(SyncAction::Importation), "skus", "A");
            Err(SyncError::Source(format!("{} rejected", work.id)))
        }
    }

    #[tokio::test]
    async fn save_leaves_untouched_namespaces_alone() {
        let platform = FakePlatform::new(json!({
            "api_token": "t",
            "update_price": true,
            "importation": { "skus": ["A", "B"] }
        }));
        let handler = Arc::new(ConcurrentDequeue {
            platform: platform.clone(),
        });
        let relay = Relay::new(
            Guard::new(Arc::new(MemoryStore::new()), GuardConfig::default()),
            platform.clone(),
            HandlerRegistry::new().register(SyncAction::Exportation, "product_ids", handler),
        );

        relay.handle("1011", &product_trigger("p1")).await.unwrap_err();

        let app = platform.app();
        assert_eq!(app.queues(Namespace::visible(SyncAction::Importation))["skus"], ["B"]);
        assert_eq!(
            app.queues(Namespace::hidden(SyncAction::Exportation, 2))["product_ids"],
            ["p1"]
        );
    }

    #[test]
    fn deepest_failure_is_dropped() {
        let mut app: AppConfig =
            serde_json::from_value(json!({ "___importation": { "skus": ["bad"] } })).unwrap();
        let work = WorkItem {
            namespace: Namespace::hidden(SyncAction::Importation, 3),
            queue: "skus".into(),
            id: "bad".into(),
            allow_create: true,
            from_app_queue: true,
        };
        settle_queue(&mut app, &work, false);
        assert!(app.extra.is_empty());
    }

    #[test]
    fn failed_trigger_work_is_parked_for_later() {
        let mut app = AppConfig::default();
        let work = WorkItem {
            namespace: Namespace::hidden(SyncAction::Exportation, 1),
            queue: "product_ids".into(),
            id: "p1".into(),
            allow_create: false,
            from_app_queue: false,
        };
        settle_queue(&mut app, &work, false);
        assert_eq!(
            app.queues(Namespace::hidden(SyncAction::Exportation, 2))["product_ids"],
            ["p1"]
        );

        let mut untouched = AppConfig::default();
        settle_queue(&mut untouched, &work, true);
        assert_eq!(untouched, AppConfig::default());
    }

    #[tokio::test]
    async fn ignored_resource_is_acknowledged() {
        let f = fixture(json!({ "api_token": "t", "ignore_triggers": ["applications"] }));
        let outcome = f.relay.handle("1011", &app_trigger()).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(f.handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_do_without_token() {
        let f = fixture(json!({ "importation": { "skus": ["A"] } }));
        let outcome = f.relay.handle("1011", &app_trigger()).await.unwrap();
        assert_eq!(outcome, Outcome::NothingToDo);
        assert_eq!(f.platform.saves.load(Ordering::SeqCst), 0);

        let doc = f.store.get("1011").unwrap();
        assert_eq!(doc.count, 0);
        let key = ResourceKey::new("applications", "app1");
        assert!(doc.key(&key).and_then(|k| k.last_handled).is_none());
    }

    #[tokio::test]
    async fn stopped_resource_is_skipped_before_reading_settings() {
        let f = fixture(json!({ "api_token": "t", "importation": { "skus": ["A"] } }));
        f.relay.guard().stop("1011", "applications").await.unwrap();

        let outcome = f.relay.handle("1011", &app_trigger()).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(AbandonReason::Stopped));
        assert!(f.handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_trigger_is_superseded() {
        let f = fixture(json!({ "api_token": "t", "importation": { "skus": ["A", "B"] } }));
        let trigger = app_trigger();
        f.relay.handle("1011", &trigger).await.unwrap();

        let outcome = f.relay.handle("1011", &trigger).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(AbandonReason::Superseded));
    }

    #[tokio::test]
    async fn trigger_without_id_is_invalid() {
        let f = fixture(json!({}));
        let trigger: Trigger = serde_json::from_value(json!({
            "resource": "products",
            "action": "change",
            "datetime": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let err = f.relay.handle("1011", &trigger).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidTrigger(_)));
        assert!(f.store.get("1011").is_none());
    }
}
