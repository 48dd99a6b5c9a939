//! Shared fixtures: a scripted gateway, a fake authenticator and a wired engine

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use station_sync::api::{ApiRequest, Gateway};
use station_sync::config::RefreshSettings;
use station_sync::db::Cache;
use station_sync::error::{ApiError, SessionError};
use station_sync::session::{
    Authenticator, MemorySecretStore, Session, SessionState, StationAddress,
};
use station_sync::sync::SyncEngine;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub const TASK_LIST: &str = "task.list";
pub const TASK_CREATE: &str = "task.create";
pub const TASK_PAUSE: &str = "task.pause";
pub const TASK_RESUME: &str = "task.resume";
pub const TASK_DELETE: &str = "task.delete";
pub const STATISTIC: &str = "statistic";
pub const VPN: &str = "vpn";
pub const SEARCH_START: &str = "search.start";
pub const SEARCH_LIST: &str = "search.list";

/// Short name of the operation a request performs
pub fn kind(request: &ApiRequest) -> String {
    let method = request.get("method").unwrap_or("?");
    match request.get("api").unwrap_or("?") {
        "SYNO.DownloadStation.Task" => format!("task.{}", method),
        "SYNO.DownloadStation.Statistic" => STATISTIC.to_string(),
        "SYNO.DownloadStation2.BTSearch" => format!("search.{}", method),
        "SYNO.Entry.Request" if request.get("mode").is_some() => SEARCH_LIST.to_string(),
        "SYNO.Entry.Request" => VPN.to_string(),
        other => other.to_string(),
    }
}

/// One executed request
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: String,
    pub request: ApiRequest,
    pub sid: String,
    pub at: Instant,
    /// Position in the global start/finish order
    pub started: u64,
    pub finished: Option<u64>,
}

impl Call {
    pub fn overlaps(&self, other: &Call) -> bool {
        let end = |c: &Call| c.finished.unwrap_or(u64::MAX);
        self.started < end(other) && other.started < end(self)
    }
}

#[derive(Default)]
struct Script {
    once: VecDeque<Result<Value, ApiError>>,
    sticky: Option<Result<Value, ApiError>>,
}

/// Gateway answering from per-operation scripts.
///
/// Mirrors the real gateway's session handling: no session means
/// `SessionMissing`, an expiry reply drops the session that sent the request.
pub struct MockGateway {
    session: Arc<SessionState>,
    scripts: Mutex<HashMap<String, Script>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<Call>>,
    sequence: AtomicU64,
}

impl MockGateway {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self {
            session,
            scripts: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Answer every `kind` request with `reply` once the one-shot replies run out
    pub fn respond(&self, kind: &str, reply: Result<Value, ApiError>) {
        self.scripts.lock().entry(kind.to_string()).or_default().sticky = Some(reply);
    }

    /// Answer the next `kind` request with `reply`
    pub fn respond_once(&self, kind: &str, reply: Result<Value, ApiError>) {
        self.scripts
            .lock()
            .entry(kind.to_string())
            .or_default()
            .once
            .push_back(reply);
    }

    /// Block `kind` requests until released
    pub fn hold(&self, kind: &str) {
        self.gates
            .lock()
            .insert(kind.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held `kind` requests complete
    pub fn release(&self, kind: &str, n: usize) {
        if let Some(gate) = self.gates.lock().get(kind) {
            gate.add_permits(n);
        }
    }

    /// Stop holding `kind` requests and let every blocked one through
    pub fn open(&self, kind: &str) {
        if let Some(gate) = self.gates.lock().remove(kind) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, kind: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.calls_of(kind).len()
    }

    fn next_reply(&self, kind: &str) -> Result<Value, ApiError> {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(kind.to_string()).or_default();
        script
            .once
            .pop_front()
            .or_else(|| script.sticky.clone())
            .unwrap_or_else(|| Err(ApiError::from_code(102)))
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let sid = match self.session.session() {
            Some(session) => session.sid,
            None => return Err(ApiError::SessionMissing),
        };

        let kind = kind(&request);
        let index = {
            let mut calls = self.calls.lock();
            calls.push(Call {
                kind: kind.clone(),
                request,
                sid: sid.clone(),
                at: Instant::now(),
                started: self.sequence.fetch_add(1, Ordering::SeqCst),
                finished: None,
            });
            calls.len() - 1
        };

        let gate = self.gates.lock().get(&kind).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let reply = self.next_reply(&kind);
        self.calls.lock()[index].finished = Some(self.sequence.fetch_add(1, Ordering::SeqCst));

        if reply.as_ref().is_err_and(ApiError::is_session_expired) {
            self.session.expire_if_current(&sid);
        }
        reply
    }
}

/// Authenticator issuing `sid-1`, `sid-2`, ... without any network
pub struct FakeAuthenticator {
    issued: AtomicUsize,
    reachable: AtomicBool,
}

impl FakeAuthenticator {
    pub fn new() -> Self {
        Self {
            issued: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn login(
        &self,
        station: &StationAddress,
        account: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        if password.is_empty() {
            return Err(SessionError::Auth("No such account or incorrect password".into()));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(format!("sid-{}", n), account, station.clone()))
    }

    async fn logout(&self, _session: &Session) -> Result<(), SessionError> {
        Ok(())
    }

    async fn ping(&self, _station: &StationAddress) -> Result<(), SessionError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::ConnectionUnreachable("connection refused".into()).into())
        }
    }
}

/// Engine wired to a scripted gateway and an in-memory cache
pub struct Harness {
    pub cache: Cache,
    pub auth: Arc<FakeAuthenticator>,
    pub store: Arc<MemorySecretStore>,
    pub session: Arc<SessionState>,
    pub gateway: Arc<MockGateway>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemorySecretStore::new())
    }

    pub fn with_store(store: MemorySecretStore) -> Self {
        let cache = Cache::in_memory().unwrap();
        let auth = Arc::new(FakeAuthenticator::new());
        let store = Arc::new(store);
        let session = Arc::new(SessionState::new(
            auth.clone(),
            store.clone(),
            cache.clone(),
        ));
        let gateway = Arc::new(MockGateway::new(session.clone()));

        gateway.respond(TASK_LIST, Ok(tasks_page(vec![])));
        gateway.respond(STATISTIC, Ok(statistic_json(0, 0)));
        gateway.respond(VPN, Ok(vpn_json(vec![])));
        for kind in [TASK_CREATE, TASK_PAUSE, TASK_RESUME, TASK_DELETE] {
            gateway.respond(kind, Ok(Value::Null));
        }

        let engine = SyncEngine::new(
            session.clone(),
            gateway.clone(),
            cache.clone(),
            RefreshSettings::default(),
        );

        Self {
            cache,
            auth,
            store,
            session,
            gateway,
            engine,
        }
    }

    pub async fn login(&self) {
        self.login_as("admin").await;
    }

    pub async fn login_as(&self, account: &str) {
        self.session
            .login(station(), account, "secret")
            .await
            .unwrap();
    }
}

pub fn station() -> StationAddress {
    StationAddress::new("nas.local", 5000)
}

/// Yield until `condition` holds, failing after a generous bound
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Spawn `fut` and give it a chance to start
pub async fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(fut);
    tokio::task::yield_now().await;
    handle
}

// ============ Payload fixtures ============

pub fn task_json(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "title": format!("title {}", id),
        "size": 1000,
        "status": status,
        "type": "bt",
        "username": "admin",
        "additional": {
            "detail": { "destination": "downloads", "uri": format!("magnet:?xt={}", id) },
            "transfer": { "size_downloaded": 250, "size_uploaded": 0, "speed_download": 10, "speed_upload": 0 }
        }
    })
}

pub fn tasks_page(tasks: Vec<Value>) -> Value {
    json!({ "offset": 0, "total": tasks.len(), "tasks": tasks })
}

pub fn statistic_json(down: u64, up: u64) -> Value {
    json!({ "speed_download": down, "speed_upload": up })
}

pub fn vpn_json(profiles: Vec<Value>) -> Value {
    json!({
        "has_fail": false,
        "result": [{
            "api": "SYNO.Entry.Request",
            "success": true,
            "data": {
                "has_fail": false,
                "result": [
                    { "api": "SYNO.Core.Network.VPN.OpenVPN", "success": true, "data": profiles }
                ]
            }
        }]
    })
}

pub fn search_page_json(running: bool, items: Vec<Value>) -> Value {
    json!({
        "has_fail": false,
        "result": [{ "success": true, "data": { "is_running": running, "results": items } }]
    })
}

pub fn search_item_json(id: i64, peers: i64) -> Value {
    json!({ "result_id": id, "title": format!("result {}", id), "peers": peers, "size": 42 })
}
