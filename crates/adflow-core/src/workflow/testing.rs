//! Recording mock platform shared by the engine tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adflow_types::error::PlatformError;
use adflow_types::workflow::{AssetHandle, AssetSpec, DateRange, EntityType};
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use super::rate_limit::RateLimiter;
use super::retry::{Retrier, RetryPolicy};
use crate::platform::{
    AssetUploader, CredentialRefresher, EntityCreator, EntityDeleter, EntityPayload, EntityReader,
    EntityUpdater, InsightsPage, InsightsQuery,
};

pub fn test_retrier() -> Retrier {
    Retrier::new(
        Arc::new(RateLimiter::new(10_000, Duration::from_secs(1))),
        RetryPolicy::default(),
        Duration::from_secs(300),
    )
}

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    /// Entity name (create), external id (update/delete/exists), asset key
    /// (upload) or entity id (fetch).
    pub target: String,
    pub started: Instant,
    pub finished: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    created: Vec<EntityPayload>,
    live: BTreeSet<String>,
    create_script: HashMap<String, VecDeque<PlatformError>>,
    create_always: HashMap<String, PlatformError>,
    delete_script: HashMap<String, VecDeque<PlatformError>>,
    delete_always: HashMap<String, PlatformError>,
    delays: HashMap<String, Duration>,
    pages: HashMap<String, usize>,
    fetch_script: HashMap<String, VecDeque<PlatformError>>,
    next_id: u64,
}

/// In-memory ad platform that records every call.
///
/// Create calls are matched by the `name` field of the payload; other calls
/// by external id.
#[derive(Default)]
pub struct MockPlatform {
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    refreshes: AtomicUsize,
    uploads: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors returned by successive create calls for `name`, then success.
    pub fn script_create(&self, name: &str, errors: Vec<PlatformError>) {
        self.lock().create_script.insert(name.into(), errors.into());
    }

    /// Every create call for `name` fails with `error`.
    pub fn fail_create(&self, name: &str, error: PlatformError) {
        self.lock().create_always.insert(name.into(), error);
    }

    pub fn script_delete(&self, external_id: &str, errors: Vec<PlatformError>) {
        self.lock()
            .delete_script
            .insert(external_id.into(), errors.into());
    }

    pub fn fail_delete(&self, external_id: &str, error: PlatformError) {
        self.lock().delete_always.insert(external_id.into(), error);
    }

    /// Serve insights for `entity_id` as `pages` pages of one row each.
    pub fn paginate(&self, entity_id: &str, pages: usize) {
        self.lock().pages.insert(entity_id.into(), pages);
    }

    /// Errors returned by successive fetches of page `page` (zero-based)
    /// for `entity_id`, then success.
    pub fn script_fetch(&self, entity_id: &str, page: usize, errors: Vec<PlatformError>) {
        self.lock()
            .fetch_script
            .insert(format!("{entity_id}#{page}"), errors.into());
    }

    /// Make calls for `target` take `delay`.
    pub fn delay(&self, target: &str, delay: Duration) {
        self.lock().delays.insert(target.into(), delay);
    }

    /// Simulate an entity removed outside the workflow.
    pub fn forget(&self, external_id: &str) {
        self.lock().live.remove(external_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    /// Targets of successful-or-not delete calls, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.calls_for("delete").into_iter().map(|c| c.target).collect()
    }

    pub fn created_payloads(&self) -> Vec<EntityPayload> {
        self.lock().created.clone()
    }

    pub fn live(&self) -> BTreeSet<String> {
        self.lock().live.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the start of a call and return its index and delay.
    fn begin(&self, op: &'static str, target: &str) -> (usize, Duration) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut inner = self.lock();
        inner.calls.push(Call {
            op,
            target: target.to_string(),
            started: Instant::now(),
            finished: None,
        });
        let delay = inner.delays.get(target).copied().unwrap_or(Duration::ZERO);
        (inner.calls.len() - 1, delay)
    }

    fn end(&self, index: usize) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.lock().calls[index].finished = Some(Instant::now());
    }

    async fn run<T>(
        &self,
        op: &'static str,
        target: &str,
        body: impl FnOnce(&mut Inner) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let (index, delay) = self.begin(op, target);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = body(&mut self.lock());
        self.end(index);
        result
    }
}

fn scripted(
    script: &mut HashMap<String, VecDeque<PlatformError>>,
    always: &HashMap<String, PlatformError>,
    key: &str,
) -> Option<PlatformError> {
    if let Some(err) = always.get(key) {
        return Some(err.clone());
    }
    script.get_mut(key).and_then(VecDeque::pop_front)
}

fn entity_name(payload: &EntityPayload) -> String {
    payload
        .fields
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl EntityCreator for MockPlatform {
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &EntityPayload,
        _parent_id: Option<&str>,
    ) -> Result<String, PlatformError> {
        let name = entity_name(payload);
        self.run("create", &name, |inner| {
            let Inner {
                create_script,
                create_always,
                ..
            } = &mut *inner;
            if let Some(err) = scripted(create_script, create_always, &name) {
                return Err(err);
            }
            inner.next_id += 1;
            let id = format!("{}-{}", entity_type.as_str(), inner.next_id);
            inner.live.insert(id.clone());
            inner.created.push(payload.clone());
            Ok(id)
        })
        .await
    }
}

impl EntityUpdater for MockPlatform {
    async fn update(
        &self,
        _entity_type: EntityType,
        external_id: &str,
        _fields: &Map<String, Value>,
    ) -> Result<(), PlatformError> {
        self.run("update", external_id, |_| Ok(())).await
    }
}

impl EntityDeleter for MockPlatform {
    async fn delete(&self, _entity_type: EntityType, external_id: &str) -> Result<(), PlatformError> {
        self.run("delete", external_id, |inner| {
            let Inner {
                delete_script,
                delete_always,
                ..
            } = &mut *inner;
            if let Some(err) = scripted(delete_script, delete_always, external_id) {
                return Err(err);
            }
            inner.live.remove(external_id);
            Ok(())
        })
        .await
    }
}

impl EntityReader for MockPlatform {
    async fn exists(&self, _entity_type: EntityType, external_id: &str) -> Result<bool, PlatformError> {
        self.run("exists", external_id, |inner| Ok(inner.live.contains(external_id)))
            .await
    }
}

impl AssetUploader for MockPlatform {
    async fn upload(&self, asset: &AssetSpec) -> Result<AssetHandle, PlatformError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.run("upload", &asset.key, |_| {
            Ok(AssetHandle {
                kind: asset.kind,
                id: format!("hash-{}", &asset.fingerprint()[..12]),
                url: None,
            })
        })
        .await
    }
}

impl InsightsQuery for MockPlatform {
    async fn fetch(
        &self,
        entity_id: &str,
        date_range: &DateRange,
        metrics: &[String],
        cursor: Option<&str>,
    ) -> Result<InsightsPage, PlatformError> {
        // The cursor is the zero-based page index.
        let index: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        self.run("fetch", entity_id, |inner| {
            if let Some(err) = inner
                .fetch_script
                .get_mut(&format!("{entity_id}#{index}"))
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            let total = inner.pages.get(entity_id).copied().unwrap_or(1);
            let mut row = Map::new();
            row.insert("date_start".into(), json!(date_range.since.to_string()));
            row.insert("page".into(), json!(index));
            for metric in metrics {
                row.insert(metric.clone(), json!("0"));
            }
            Ok(InsightsPage {
                rows: vec![Value::Object(row)],
                next: (index + 1 < total).then(|| (index + 1).to_string()),
            })
        })
        .await
    }
}

impl CredentialRefresher for MockPlatform {
    async fn refresh_credentials(&self) -> Result<(), PlatformError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
