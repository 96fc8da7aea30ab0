//! Audit Recorder
//!
//! Post-response middleware that turns qualifying requests into append-only
//! [`AuditRecord`]s:
//! - POST/PUT/PATCH/DELETE requests, plus any other recorded request answered with 403
//! - GET/HEAD/OPTIONS and excluded path prefixes are skipped before any work
//! - Secrets are stripped from every payload before persistence
//! - Recording failures are logged and never change the response
//! - The handler always receives the full request body; bodies over
//!   `max_body_bytes` or unreadable ones just leave `new_data` empty
//!
//! Handlers that know what they touched call [`AuditScope::describe`]; the
//! path-based guess is only a fallback.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{header::CONTENT_LENGTH, header::USER_AGENT, request::Parts, Method, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::RwLock;
use tower::{Layer, Service};

use salonbook_store::{AuditRepo, NewAuditLog};

use crate::config::AuditConfig;
use crate::error::AuthResult;
use crate::rate_limit::extract_client_ip;
use crate::types::{Principal, PrincipalId};

/// Field names never persisted in `old_data` / `new_data`
pub const SECRET_FIELDS: [&str; 7] = [
    "password",
    "password_confirmation",
    "current_password",
    "token",
    "access_token",
    "refresh_token",
    "secret",
];

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    /// Any recorded request answered with 403
    AuthorizationFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::AuthorizationFailed => "AUTHORIZATION_FAILED",
        }
    }

    /// Action label for a finished request
    pub fn classify(method: &Method, status: StatusCode) -> Option<Self> {
        if status == StatusCode::FORBIDDEN {
            return Some(Self::AuthorizationFailed);
        }
        match *method {
            Method::POST => Some(Self::Create),
            Method::PUT | Method::PATCH => Some(Self::Update),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: Option<PrincipalId>,
    pub action: AuditAction,
    pub resource_table: Option<String>,
    pub resource_id: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditRecord> for NewAuditLog {
    fn from(record: AuditRecord) -> Self {
        Self {
            user_id: record.user_id,
            action: record.action.as_str().to_string(),
            resource_table: record.resource_table,
            resource_id: record.resource_id,
            old_data: record.old_data,
            new_data: record.new_data,
            ip_address: Some(record.ip_address),
            user_agent: record.user_agent,
            method: record.method,
            path: record.path,
            status_code: i32::from(record.status_code),
            duration_ms: i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
            metadata: record.metadata,
            created_at: record.created_at,
        }
    }
}

// =============================================================================
// Sinks and Snapshots
// =============================================================================

/// Append-only destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> AuthResult<()>;
}

#[async_trait]
impl AuditSink for AuditRepo {
    async fn append(&self, record: AuditRecord) -> AuthResult<()> {
        AuditRepo::append(self, &NewAuditLog::from(record)).await?;
        Ok(())
    }
}

/// In-memory sink for tests and local development
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> AuthResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Loads the current state of a resource before it is changed
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, resource: &str, id: &str) -> AuthResult<Option<Value>>;
}

// =============================================================================
// Explicit Context
// =============================================================================

/// What a handler says it touched
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContext {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_value: Option<Value>,
}

/// Per-request handle for handlers to describe the mutated resource
#[derive(Clone, Default)]
pub struct AuditScope {
    context: Arc<Mutex<Option<ResourceContext>>>,
}

impl AuditScope {
    pub fn describe(
        &self,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        old_value: Option<Value>,
    ) {
        let mut slot = self.context.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(ResourceContext {
            resource_type: resource_type.into(),
            resource_id,
            old_value,
        });
    }

    fn take(&self) -> Option<ResourceContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Outside the audit layer this yields a detached scope whose description is dropped
#[async_trait]
impl<S> FromRequestParts<S> for AuditScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<AuditScope>().cloned().unwrap_or_default())
    }
}

// =============================================================================
// Payload Helpers
// =============================================================================

fn is_secret(field: &str) -> bool {
    SECRET_FIELDS.iter().any(|s| s.eq_ignore_ascii_case(field))
}

/// Remove secret fields at every depth
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !is_secret(k))
                .map(|(k, v)| (k, redact(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// Changed top-level fields as `(old, new)`; `None` when nothing comparable changed
pub fn diff(old: &Value, new: &Value) -> Option<(Value, Value)> {
    let (Value::Object(old), Value::Object(new)) = (old, new) else {
        return None;
    };

    let mut before = Map::new();
    let mut after = Map::new();
    for (field, value) in new {
        if is_secret(field) {
            continue;
        }
        let previous = old.get(field);
        if previous != Some(value) {
            before.insert(field.clone(), previous.cloned().unwrap_or(Value::Null));
            after.insert(field.clone(), value.clone());
        }
    }

    if after.is_empty() {
        None
    } else {
        Some((Value::Object(before), Value::Object(after)))
    }
}

/// Guess `(resource, id)` from a path such as `/api/v1/reservations/12/cancel`
pub fn infer_resource(path: &str) -> Option<(String, Option<String>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let is_id = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    match segments.iter().position(|s| is_id(s)) {
        Some(idx) => segments[..idx]
            .iter()
            .rev()
            .find(|s| !is_id(s))
            .map(|resource| (resource.to_string(), Some(segments[idx].to_string()))),
        None => segments.last().map(|s| (s.to_string(), None)),
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// Builds and persists audit records
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    config: AuditConfig,
}

/// Request facts captured before the handler runs
struct PendingAudit {
    method: Method,
    path: String,
    query: Option<String>,
    ip_address: String,
    user_agent: Option<String>,
    principal: Option<Principal>,
    payload: Option<Value>,
    inferred: Option<(String, Option<String>)>,
    pre_image: Option<Value>,
    scope: AuditScope,
    started: Instant,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, config: AuditConfig) -> Self {
        Self {
            sink,
            snapshots: None,
            config,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.config
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Requests never recorded, decided before any work
    pub fn skips(&self, method: &Method, path: &str) -> bool {
        !self.config.enabled
            || matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
            || self.is_excluded(path)
    }

    async fn pre_image(&self, method: &Method, inferred: Option<&(String, Option<String>)>) -> Option<Value> {
        if !matches!(*method, Method::PUT | Method::PATCH | Method::DELETE) {
            return None;
        }
        let snapshots = self.snapshots.as_ref()?;
        let (resource, id) = inferred?;
        let id = id.as_deref()?;

        match snapshots.snapshot(resource, id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(resource = %resource, id = %id, error = %err, "Audit snapshot failed");
                None
            }
        }
    }

    fn build(&self, pending: PendingAudit, status: StatusCode) -> Option<AuditRecord> {
        let action = AuditAction::classify(&pending.method, status)?;

        let explicit = pending.scope.take();
        let (resource_table, resource_id, old_value) = match explicit {
            Some(ctx) => {
                // The path snapshot only stands in for the resource the handler named
                let same_resource = pending.inferred.as_ref().map_or(false, |(resource, id)| {
                    *resource == ctx.resource_type
                        && (ctx.resource_id.is_none() || *id == ctx.resource_id)
                });
                let fallback = if same_resource { pending.pre_image } else { None };
                (Some(ctx.resource_type), ctx.resource_id, ctx.old_value.or(fallback))
            }
            None => match pending.inferred {
                Some((resource, id)) => (Some(resource), id, pending.pre_image),
                None => (None, None, pending.pre_image),
            },
        };
        let old_value = old_value.map(redact);

        let (old_data, new_data) = match pending.method {
            Method::POST => (None, pending.payload),
            Method::PUT | Method::PATCH => match (&old_value, &pending.payload) {
                (Some(old), Some(new)) => diff(old, new).map_or((None, None), |(o, n)| (Some(o), Some(n))),
                _ => (None, None),
            },
            Method::DELETE => (old_value, None),
            _ => (None, pending.payload),
        };

        let mut metadata = Map::new();
        if let Some(query) = pending.query {
            metadata.insert("query".to_string(), Value::String(query));
        }
        if let Some(principal) = &pending.principal {
            metadata.insert("role".to_string(), Value::String(principal.role.to_string()));
        }

        Some(AuditRecord {
            user_id: pending.principal.as_ref().map(|p| p.id),
            action,
            resource_table,
            resource_id,
            old_data,
            new_data,
            ip_address: pending.ip_address,
            user_agent: pending.user_agent,
            method: pending.method.to_string(),
            path: pending.path,
            status_code: status.as_u16(),
            duration_ms: u64::try_from(pending.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            metadata: Value::Object(metadata),
            created_at: Utc::now(),
        })
    }

    async fn persist(&self, record: AuditRecord) {
        let action = record.action;
        let path = record.path.clone();
        if let Err(err) = self.sink.append(record).await {
            tracing::error!(action = action.as_str(), path = %path, error = %err, "Failed to write audit record");
        }
    }
}

/// Buffer up to `max` bytes of a body for the audit payload.
///
/// Returns a body carrying exactly the original bytes (and any read error)
/// plus the complete content when it fit within `max`.
async fn capture_body(body: Body, max: usize) -> (Body, Option<Bytes>) {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    loop {
        match rest.next().await {
            Some(Ok(chunk)) => {
                total += chunk.len();
                chunks.push(chunk);
                if total > max {
                    tracing::debug!(limit = max, "Request body over audit limit, payload not recorded");
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(rest);
                    return (Body::from_stream(replay), None);
                }
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "Request body unreadable, payload not recorded");
                let replay = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(err)));
                return (Body::from_stream(stream::iter(replay)), None);
            }
            None => {
                let bytes = Bytes::from(chunks.concat());
                return (Body::from(bytes.clone()), Some(bytes));
            }
        }
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Audit layer; mount inside the authentication gate so the principal is known
#[derive(Clone)]
pub struct AuditLayer {
    recorder: Arc<AuditRecorder>,
}

impl AuditLayer {
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self { recorder }
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditMiddleware {
            inner,
            recorder: self.recorder.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuditMiddleware<S> {
    inner: S,
    recorder: Arc<AuditRecorder>,
}

impl<S> Service<Request> for AuditMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.recorder.skips(req.method(), req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let recorder = self.recorder.clone();

        Box::pin(async move {
            let started = Instant::now();
            let (mut parts, body) = req.into_parts();

            let declared_len = parts
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let max = recorder.config.max_body_bytes;

            let (body, payload) = if declared_len.map_or(false, |len| len > max) {
                (body, None)
            } else {
                let (body, captured) = capture_body(body, max).await;
                let payload = captured
                    .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
                    .map(redact);
                (body, payload)
            };

            let peer = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            let path = parts.uri.path().to_string();
            let inferred = infer_resource(&path);
            let pre_image = recorder.pre_image(&parts.method, inferred.as_ref()).await;
            let scope = AuditScope::default();
            parts.extensions.insert(scope.clone());

            let pending = PendingAudit {
                method: parts.method.clone(),
                query: parts.uri.query().map(String::from),
                ip_address: extract_client_ip(&parts.headers, peer),
                user_agent: parts
                    .headers
                    .get(USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
                principal: parts.extensions.get::<Principal>().cloned(),
                path,
                payload,
                inferred,
                pre_image,
                scope,
                started,
            };

            let response = inner.call(Request::from_parts(parts, body)).await?;

            if let Some(record) = recorder.build(pending, response.status()) {
                recorder.persist(record).await;
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_LENGTH;
    use axum::routing::{delete, get, post, put};
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;

    struct FixedSnapshots;

    #[async_trait]
    impl SnapshotSource for FixedSnapshots {
        async fn snapshot(&self, resource: &str, id: &str) -> AuthResult<Option<Value>> {
            Ok((resource == "services" && id == "3").then(|| {
                json!({"id": 3, "name": "Cut", "price": 30, "secret": "s3"})
            }))
        }
    }

    fn app(sink: MemoryAuditSink) -> Router {
        let recorder = AuditRecorder::new(Arc::new(sink), AuditConfig::default())
            .with_snapshots(Arc::new(FixedSnapshots));

        Router::new()
            .route("/health/ping", post(|| async { "pong" }))
            .route("/api/v1/services", get(|| async { "[]" }).post(|| async { StatusCode::CREATED }))
            .route(
                "/api/v1/services/:id",
                put(|| async { "ok" })
                    .delete(|| async { StatusCode::NO_CONTENT })
                    .patch(|scope: AuditScope| async move {
                        scope.describe("reservations", Some("3".to_string()), None);
                        "ok"
                    }),
            )
            .route(
                "/api/v1/catalog/services/:id",
                delete(|scope: AuditScope| async move {
                    scope.describe("services", Some("3".to_string()), None);
                    StatusCode::NO_CONTENT
                }),
            )
            .route(
                "/api/v1/uploads",
                post(|body: Body| async move {
                    match axum::body::to_bytes(body, usize::MAX).await {
                        Ok(bytes) => (StatusCode::CREATED, bytes.len().to_string()),
                        Err(_) => (StatusCode::BAD_REQUEST, String::new()),
                    }
                }),
            )
            .route(
                "/api/v1/reservations/:id/cancel",
                post(|scope: AuditScope| async move {
                    scope.describe("reservations", Some("77".to_string()), Some(json!({"status": "booked"})));
                    StatusCode::FORBIDDEN
                }),
            )
            .route("/api/v1/users/:id", delete(|| async { "gone" }))
            .layer(AuditLayer::new(Arc::new(recorder)))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_redact_nested() {
        let value = redact(json!({
            "name": "Ada",
            "Password": "x",
            "profile": {"token": "t", "bio": "hi"},
            "items": [{"secret": 1, "ok": 2}]
        }));
        assert_eq!(value, json!({"name": "Ada", "profile": {"bio": "hi"}, "items": [{"ok": 2}]}));
    }

    #[test]
    fn test_diff_only_changed_fields() {
        let old = json!({"name": "Cut", "price": 30, "password": "a"});
        let new = json!({"name": "Cut", "price": 35, "duration": 45, "password": "b"});
        let (before, after) = diff(&old, &new).unwrap();

        assert_eq!(before, json!({"price": 30, "duration": null}));
        assert_eq!(after, json!({"price": 35, "duration": 45}));
        assert!(diff(&old, &old).is_none());
    }

    #[test]
    fn test_infer_resource() {
        assert_eq!(
            infer_resource("/api/v1/reservations/12/cancel"),
            Some(("reservations".to_string(), Some("12".to_string())))
        );
        assert_eq!(
            infer_resource("/api/v1/services"),
            Some(("services".to_string(), None))
        );
        assert_eq!(infer_resource("/"), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(AuditAction::classify(&Method::POST, StatusCode::CREATED), Some(AuditAction::Create));
        assert_eq!(AuditAction::classify(&Method::PATCH, StatusCode::OK), Some(AuditAction::Update));
        assert_eq!(
            AuditAction::classify(&Method::DELETE, StatusCode::FORBIDDEN),
            Some(AuditAction::AuthorizationFailed)
        );
        assert_eq!(AuditAction::classify(&Method::GET, StatusCode::OK), None);
    }

    #[tokio::test]
    async fn test_get_and_excluded_paths_not_recorded() {
        let sink = MemoryAuditSink::new();
        let app = app(sink.clone());

        let get = Request::builder().uri("/api/v1/services").body(Body::empty()).unwrap();
        app.clone().oneshot(get).await.unwrap();
        app.oneshot(json_request("POST", "/health/ping", json!({}))).await.unwrap();

        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_records_redacted_payload() {
        let sink = MemoryAuditSink::new();
        let res = app(sink.clone())
            .oneshot(json_request(
                "POST",
                "/api/v1/services?draft=1",
                json!({"name": "Color", "secret": "k"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.action, AuditAction::Create);
        assert_eq!(record.resource_table.as_deref(), Some("services"));
        assert_eq!(record.new_data, Some(json!({"name": "Color"})));
        assert_eq!(record.status_code, 201);
        assert_eq!(record.metadata["query"], "draft=1");
    }

    #[tokio::test]
    async fn test_update_diffs_against_snapshot_without_secrets() {
        let sink = MemoryAuditSink::new();
        app(sink.clone())
            .oneshot(json_request(
                "PUT",
                "/api/v1/services/3",
                json!({"name": "Cut", "price": 40, "password": "hunter2"}),
            ))
            .await
            .unwrap();

        let record = &sink.records().await[0];
        assert_eq!(record.action, AuditAction::Update);
        assert_eq!(record.resource_id.as_deref(), Some("3"));
        assert_eq!(record.old_data, Some(json!({"price": 30})));
        assert_eq!(record.new_data, Some(json!({"price": 40})));

        let serialized = serde_json::to_string(record).unwrap();
        assert!(!serialized.contains("hunter2"));
        assert!(!serialized.contains("s3"));
    }

    #[tokio::test]
    async fn test_delete_records_pre_image() {
        let sink = MemoryAuditSink::new();
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/v1/services/3")
            .body(Body::empty())
            .unwrap();
        app(sink.clone()).oneshot(req).await.unwrap();

        let record = &sink.records().await[0];
        assert_eq!(record.action, AuditAction::Delete);
        assert_eq!(record.old_data, Some(json!({"id": 3, "name": "Cut", "price": 30})));
        assert!(record.new_data.is_none());
    }

    #[tokio::test]
    async fn test_forbidden_uses_explicit_context() {
        let sink = MemoryAuditSink::new();
        app(sink.clone())
            .oneshot(json_request("POST", "/api/v1/reservations/12/cancel", json!({"reason": "late"})))
            .await
            .unwrap();

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::AuthorizationFailed);
        assert_eq!(records[0].resource_table.as_deref(), Some("reservations"));
        assert_eq!(records[0].resource_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_unresolved_pre_image_is_absent() {
        let sink = MemoryAuditSink::new();
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/v1/users/9")
            .body(Body::empty())
            .unwrap();
        app(sink.clone()).oneshot(req).await.unwrap();

        let record = &sink.records().await[0];
        assert_eq!(record.resource_table.as_deref(), Some("users"));
        assert!(record.old_data.is_none());
    }

    const OVER_LIMIT: usize = 2 * 1024 * 1024;

    async fn upload(sink: &MemoryAuditSink, request: Request) {
        let res = app(sink.clone()).oneshot(request).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], OVER_LIMIT.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_oversized_streamed_body_still_reaches_handler() {
        let sink = MemoryAuditSink::new();
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..4)
            .map(|_| Ok(Bytes::from(vec![b'x'; OVER_LIMIT / 4])))
            .collect();
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();

        upload(&sink, req).await;

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Create);
        assert!(records[0].new_data.is_none());
    }

    #[tokio::test]
    async fn test_oversized_declared_body_still_reaches_handler() {
        let sink = MemoryAuditSink::new();
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads")
            .header(CONTENT_LENGTH, OVER_LIMIT)
            .body(Body::from(vec![b'x'; OVER_LIMIT]))
            .unwrap();

        upload(&sink, req).await;
        assert!(sink.records().await[0].new_data.is_none());
    }

    #[tokio::test]
    async fn test_small_body_is_forwarded_intact() {
        let sink = MemoryAuditSink::new();
        let payload = json!({"file": "logo.png"}).to_string();
        let res = app(sink.clone())
            .oneshot(json_request("POST", "/api/v1/uploads", json!({"file": "logo.png"})))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], payload.len().to_string().as_bytes());
        assert_eq!(sink.records().await[0].new_data, Some(json!({"file": "logo.png"})));
    }

    #[tokio::test]
    async fn test_explicit_context_ignores_snapshot_of_other_resource() {
        let sink = MemoryAuditSink::new();
        app(sink.clone())
            .oneshot(json_request("PATCH", "/api/v1/services/3", json!({"price": 99})))
            .await
            .unwrap();

        let record = &sink.records().await[0];
        assert_eq!(record.resource_table.as_deref(), Some("reservations"));
        assert!(record.old_data.is_none());
        assert!(record.new_data.is_none());
    }

    #[tokio::test]
    async fn test_explicit_context_uses_snapshot_of_same_resource() {
        let sink = MemoryAuditSink::new();
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/v1/catalog/services/3")
            .body(Body::empty())
            .unwrap();
        app(sink.clone()).oneshot(req).await.unwrap();

        let record = &sink.records().await[0];
        assert_eq!(record.resource_table.as_deref(), Some("services"));
        assert_eq!(record.old_data, Some(json!({"id": 3, "name": "Cut", "price": 30})));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_change_response() {
        struct BrokenSink;

        #[async_trait]
        impl AuditSink for BrokenSink {
            async fn append(&self, _: AuditRecord) -> AuthResult<()> {
                Err(crate::error::AuthError::Store("audit table locked".to_string()))
            }
        }

        let recorder = AuditRecorder::new(Arc::new(BrokenSink), AuditConfig::default());
        let app = Router::new()
            .route("/api/v1/services", post(|| async { StatusCode::CREATED }))
            .layer(AuditLayer::new(Arc::new(recorder)));

        let res = app
            .oneshot(json_request("POST", "/api/v1/services", json!({"name": "Trim"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }
}
