//! In-process mock of the central store.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use a2a_gateway_bridge::{
    CheckpointRecord, CheckpointTuple, FlowState, MemoryItem, NewMemory, NewSession, PendingWrite, Session,
    SessionEvent, SessionUpdate, StoreClient, StoreConfig, TypedBlob,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Canned misbehaviour of the store.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Status(StatusCode),
    Garbage,
}

#[derive(Default)]
struct Db {
    sessions: Vec<Session>,
    events: Vec<SessionEvent>,
    checkpoints: Vec<(String, CheckpointRecord)>,
    writes: Vec<(String, String, String, String, PendingWrite)>,
    memory: Vec<MemoryItem>,
    flows: Vec<(String, FlowState)>,
    clock: i64,
    failure: Option<Failure>,
    lose_next_checkpoint_reply: bool,
    requests: Vec<String>,
}

impl Db {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_millis_opt(1_735_689_600_000 + self.clock * 1000)
            .single()
            .unwrap_or_default()
    }
}

type Shared = Arc<Mutex<Db>>;

pub struct MockStore {
    pub url: String,
    db: Shared,
}

impl MockStore {
    pub async fn start() -> Self {
        let db = Shared::default();
        let app = Router::new()
            .route("/sessions", post(create_session).get(list_sessions))
            .route(
                "/sessions/{id}",
                get(get_session).patch(update_session).delete(delete_session),
            )
            .route("/sessions/{id}/events", post(append_events).get(list_events))
            .route("/checkpoints", post(put_checkpoint).get(list_checkpoints))
            .route("/checkpoint_writes", post(put_writes))
            .route("/memory", post(save_memory).get(load_memory).delete(reset_memory))
            .route("/flows/state", post(save_flow).get(load_flow))
            .with_state(Arc::clone(&db));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}/"),
            db,
        }
    }

    pub fn client(&self) -> StoreClient {
        StoreClient::new(&StoreConfig::new(&self.url)).unwrap()
    }

    pub fn fail(&self, failure: Option<Failure>) {
        self.db.lock().unwrap().failure = failure;
    }

    /// Commit the next checkpoint put but answer it with `503`, as if the
    /// reply were lost on the way back.
    pub fn lose_next_checkpoint_reply(&self) {
        self.db.lock().unwrap().lose_next_checkpoint_reply = true;
    }

    pub fn checkpoint_count(&self) -> usize {
        self.db.lock().unwrap().checkpoints.len()
    }

    /// Requests seen so far, as `METHOD /path`.
    pub fn requests(&self) -> Vec<String> {
        self.db.lock().unwrap().requests.clone()
    }

    pub fn memory_count(&self, thread_id: &str) -> usize {
        self.db
            .lock()
            .unwrap()
            .memory
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .count()
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "data": data, "message": "ok", "error": false })).into_response()
}

fn fail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "data": null, "message": message, "error": true }))).into_response()
}

/// Record the request, apply any canned failure and extract the user.
fn admit(db: &mut Db, headers: &HeaderMap, request: String) -> Result<String, Response> {
    db.requests.push(request);
    match db.failure {
        Some(Failure::Status(status)) => return Err(fail(status, "injected failure")),
        Some(Failure::Garbage) => return Err((StatusCode::OK, "<html>not json</html>").into_response()),
        None => {}
    }
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| fail(StatusCode::BAD_REQUEST, "missing X-User-ID"))
}

macro_rules! admit {
    ($db:expr, $headers:expr, $($req:tt)*) => {
        match admit(&mut $db, &$headers, format!($($req)*)) {
            Ok(user) => user,
            Err(response) => return response,
        }
    };
}

async fn create_session(State(db): State<Shared>, headers: HeaderMap, Json(body): Json<NewSession>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /sessions");
    let id = body.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if db.sessions.iter().any(|s| s.id == id) {
        return fail(StatusCode::CONFLICT, "session already exists");
    }
    let now = db.tick();
    let session = Session {
        id,
        user_id: user,
        agent_id: body.agent_id,
        name: body.name,
        created_at: now,
        updated_at: now,
    };
    db.sessions.push(session.clone());
    ok(session)
}

async fn list_sessions(State(db): State<Shared>, headers: HeaderMap) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /sessions");
    let sessions: Vec<_> = db.sessions.iter().filter(|s| s.user_id == user).cloned().collect();
    ok(sessions)
}

async fn get_session(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /sessions/{id}");
    db.sessions
        .iter()
        .find(|s| s.id == id && s.user_id == user)
        .map_or_else(|| fail(StatusCode::NOT_FOUND, "no such session"), ok)
}

async fn update_session(
    State(db): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SessionUpdate>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "PATCH /sessions/{id}");
    let now = db.tick();
    let Some(session) = db.sessions.iter_mut().find(|s| s.id == id && s.user_id == user) else {
        return fail(StatusCode::NOT_FOUND, "no such session");
    };
    if let Some(name) = body.name {
        session.name = name;
    }
    if body.agent_id.is_some() {
        session.agent_id = body.agent_id;
    }
    session.updated_at = now;
    ok(session.clone())
}

async fn delete_session(State(db): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "DELETE /sessions/{id}");
    let before = db.sessions.len();
    db.sessions.retain(|s| !(s.id == id && s.user_id == user));
    if db.sessions.len() == before {
        return fail(StatusCode::NOT_FOUND, "no such session");
    }
    db.events.retain(|e| e.session_id != id);
    ok(Value::Null)
}

#[derive(Deserialize)]
struct NewEvent {
    data: TypedBlob,
}

#[derive(Deserialize)]
struct AppendEvents {
    events: Vec<NewEvent>,
}

fn owns_session(db: &Db, user: &str, id: &str) -> bool {
    db.sessions.iter().any(|s| s.id == id && s.user_id == user)
}

async fn append_events(
    State(db): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AppendEvents>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /sessions/{id}/events");
    if !owns_session(&db, &user, &id) {
        return fail(StatusCode::NOT_FOUND, "no such session");
    }
    let mut appended = Vec::new();
    for event in body.events {
        let created_at = db.tick();
        let event = SessionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: id.clone(),
            created_at,
            data: event.data,
        };
        db.events.push(event.clone());
        appended.push(event);
    }
    ok(appended)
}

async fn list_events(
    State(db): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /sessions/{id}/events");
    if !owns_session(&db, &user, &id) {
        return fail(StatusCode::NOT_FOUND, "no such session");
    }
    let after = query
        .get("after")
        .and_then(|a| DateTime::parse_from_rfc3339(a).ok())
        .map(|a| a.with_timezone(&Utc));
    let limit = query.get("limit").and_then(|l| l.parse::<usize>().ok());
    let events: Vec<_> = db
        .events
        .iter()
        .filter(|e| e.session_id == id && after.is_none_or(|a| e.created_at > a))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    ok(events)
}

async fn put_checkpoint(State(db): State<Shared>, headers: HeaderMap, Json(mut record): Json<CheckpointRecord>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /checkpoints");
    let in_scope = |(owner, c): &&(String, CheckpointRecord)| {
        *owner == user && c.thread_id == record.thread_id && c.checkpoint_ns == record.checkpoint_ns
    };
    if let Some(parent) = &record.parent_checkpoint_id {
        if !db.checkpoints.iter().filter(in_scope).any(|(_, c)| &c.checkpoint_id == parent) {
            return fail(StatusCode::NOT_FOUND, "parent checkpoint not found");
        }
    }
    if let Some((owner, stored)) = db.checkpoints.iter().find(|(_, c)| c.checkpoint_id == record.checkpoint_id) {
        let replay = *owner == user
            && stored.thread_id == record.thread_id
            && stored.checkpoint_ns == record.checkpoint_ns
            && stored.parent_checkpoint_id == record.parent_checkpoint_id
            && stored.checkpoint == record.checkpoint
            && stored.metadata == record.metadata;
        if replay {
            return ok(stored.clone());
        }
        return fail(StatusCode::CONFLICT, "checkpoints are immutable");
    }
    record.version = db.checkpoints.iter().filter(in_scope).count() as u64 + 1;
    record.created_at = Some(db.tick());
    db.checkpoints.push((user, record.clone()));
    if std::mem::take(&mut db.lose_next_checkpoint_reply) {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "connection reset");
    }
    ok(record)
}

async fn list_checkpoints(
    State(db): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /checkpoints");
    let (Some(thread), Some(ns)) = (query.get("thread_id"), query.get("checkpoint_ns")) else {
        return fail(StatusCode::BAD_REQUEST, "thread_id and checkpoint_ns are required");
    };
    let limit = query.get("limit").and_then(|l| l.parse::<usize>().ok());
    let tuples: Vec<CheckpointTuple> = db
        .checkpoints
        .iter()
        .rev()
        .filter(|(owner, c)| *owner == user && &c.thread_id == thread && &c.checkpoint_ns == ns)
        .filter(|(_, c)| query.get("checkpoint_id").is_none_or(|id| &c.checkpoint_id == id))
        .take(limit.unwrap_or(usize::MAX))
        .map(|(_, c)| CheckpointTuple {
            checkpoint: c.clone(),
            pending_writes: db
                .writes
                .iter()
                .filter(|(o, t, n, id, _)| *o == user && t == thread && n == ns && *id == c.checkpoint_id)
                .map(|(.., w)| w.clone())
                .collect(),
        })
        .collect();
    ok(tuples)
}

#[derive(Deserialize)]
struct PutWrites {
    thread_id: String,
    checkpoint_ns: String,
    checkpoint_id: String,
    writes: Vec<PendingWrite>,
}

async fn put_writes(State(db): State<Shared>, headers: HeaderMap, Json(body): Json<PutWrites>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /checkpoint_writes");
    let exists = db.checkpoints.iter().any(|(o, c)| {
        *o == user
            && c.thread_id == body.thread_id
            && c.checkpoint_ns == body.checkpoint_ns
            && c.checkpoint_id == body.checkpoint_id
    });
    if !exists {
        return fail(StatusCode::NOT_FOUND, "checkpoint not found");
    }
    for write in body.writes {
        db.writes.retain(|(o, t, n, id, w)| {
            !(*o == user
                && *t == body.thread_id
                && *n == body.checkpoint_ns
                && *id == body.checkpoint_id
                && w.task_id == write.task_id
                && w.idx == write.idx)
        });
        db.writes.push((
            user.clone(),
            body.thread_id.clone(),
            body.checkpoint_ns.clone(),
            body.checkpoint_id.clone(),
            write,
        ));
    }
    ok(Value::Null)
}

#[derive(Deserialize)]
struct SaveMemory {
    thread_id: String,
    #[serde(flatten)]
    item: NewMemory,
}

async fn save_memory(State(db): State<Shared>, headers: HeaderMap, Json(body): Json<SaveMemory>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /memory");
    let item = MemoryItem {
        id: uuid::Uuid::new_v4().to_string(),
        thread_id: body.thread_id,
        user_id: user,
        task_description: body.item.task_description,
        score: body.item.score,
        metadata: body.item.metadata,
        created_at: db.tick(),
    };
    db.memory.push(item.clone());
    ok(item)
}

async fn load_memory(
    State(db): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /memory");
    let Some(thread) = query.get("thread_id") else {
        return fail(StatusCode::BAD_REQUEST, "thread_id is required");
    };
    let q = query.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    // Insertion order; ranking is the bridge's job.
    let items: Vec<_> = db
        .memory
        .iter()
        .filter(|m| m.user_id == user && &m.thread_id == thread)
        .filter(|m| m.task_description.to_lowercase().contains(&q))
        .cloned()
        .collect();
    ok(items)
}

async fn reset_memory(
    State(db): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "DELETE /memory");
    let Some(thread) = query.get("thread_id") else {
        return fail(StatusCode::BAD_REQUEST, "thread_id is required");
    };
    db.memory.retain(|m| !(m.user_id == user && &m.thread_id == thread));
    ok(Value::Null)
}

async fn save_flow(State(db): State<Shared>, headers: HeaderMap, Json(mut state): Json<FlowState>) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "POST /flows/state");
    state.updated_at = Some(db.tick());
    db.flows
        .retain(|(o, f)| !(*o == user && f.thread_id == state.thread_id && f.flow_uuid == state.flow_uuid));
    db.flows.push((user, state));
    ok(Value::Null)
}

async fn load_flow(
    State(db): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut db = db.lock().unwrap();
    let user = admit!(db, headers, "GET /flows/state");
    let (Some(thread), Some(flow)) = (query.get("thread_id"), query.get("flow_uuid")) else {
        return fail(StatusCode::BAD_REQUEST, "thread_id and flow_uuid are required");
    };
    db.flows
        .iter()
        .find(|(o, f)| *o == user && &f.thread_id == thread && &f.flow_uuid == flow)
        .map_or_else(|| fail(StatusCode::NOT_FOUND, "no flow state"), |(_, f)| ok(f))
}
