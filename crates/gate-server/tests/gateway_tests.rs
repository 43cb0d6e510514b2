//! Interceptor/binder tests with scripted authorizers and an in-memory
//! registry: identity round-trip, rejection paths, and interleaving.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Method};
use gate_protocol::{ConnectionId, HandshakeOutcome, Rejection, RouteDescriptor, Verdict};
use gate_server::binder::CLOSE_UNKNOWN_IDENTITY;
use gate_server::{Authorizer, ConnectionBinder, CorrelationTable, HandshakeInterceptor, Registry};
use gate_transport::{Connection, HandshakeCompletion, UpgradeRequest};
use parking_lot::Mutex;
use tokio::sync::oneshot;

// ─────────────────────────────────────────────────────────────────────────────
// Test collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Stand-in for a socket: a label plus a shared log of close calls.
struct MockConnection {
    label: &'static str,
    closes: Arc<Mutex<Vec<(&'static str, u16)>>>,
}

impl Connection for MockConnection {
    async fn close(self, code: u16, _reason: &'static str) {
        self.closes.lock().push((self.label, code));
    }
}

#[derive(Default)]
struct MockRegistry {
    registered: Mutex<Vec<(&'static str, ConnectionId)>>,
    routes: Mutex<HashMap<String, RouteDescriptor>>,
}

impl MockRegistry {
    fn registered(&self) -> Vec<(&'static str, ConnectionId)> {
        self.registered.lock().clone()
    }
}

impl Registry for MockRegistry {
    type Connection = MockConnection;

    fn register(&self, connection: MockConnection, connection_id: ConnectionId) {
        self.registered.lock().push((connection.label, connection_id));
    }

    fn add_route(&self, route_key: &str, descriptor: RouteDescriptor) {
        self.routes.lock().insert(route_key.to_string(), descriptor);
    }
}

/// Returns a fixed result and counts calls.
struct ScriptedAuthorizer {
    calls: AtomicUsize,
    respond: fn() -> anyhow::Result<Verdict>,
}

impl ScriptedAuthorizer {
    fn new(respond: fn() -> anyhow::Result<Verdict>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            respond,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authorizer for ScriptedAuthorizer {
    async fn authorize(&self, _id: ConnectionId, _request: &UpgradeRequest) -> anyhow::Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)()
    }
}

/// Holds each request until its key's gate is opened, then allows it.
#[derive(Default)]
struct GatedAuthorizer {
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    seen: Mutex<Vec<(String, ConnectionId)>>,
}

impl GatedAuthorizer {
    fn gate(&self, key: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(key.to_string(), rx);
        tx
    }
}

impl Authorizer for GatedAuthorizer {
    async fn authorize(&self, id: ConnectionId, request: &UpgradeRequest) -> anyhow::Result<Verdict> {
        let key = request.correlation_key().map(|k| k.to_string()).unwrap_or_default();
        self.seen.lock().push((key.clone(), id));
        let gate = self.gates.lock().remove(&key);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(Verdict::allow())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn upgrade_request(key: Option<&str>) -> UpgradeRequest {
    let mut headers = HeaderMap::new();
    if let Some(key) = key {
        headers.insert("sec-websocket-key", HeaderValue::from_str(key).unwrap());
    }
    UpgradeRequest::new(Method::GET, "/".parse().unwrap(), headers)
}

fn table() -> Arc<CorrelationTable> {
    Arc::new(CorrelationTable::new(Duration::from_secs(10)))
}

fn connection(label: &'static str, closes: &Arc<Mutex<Vec<(&'static str, u16)>>>) -> MockConnection {
    MockConnection {
        label,
        closes: closes.clone(),
    }
}

async fn verify<A: Authorizer>(
    interceptor: &HandshakeInterceptor<A>,
    request: &UpgradeRequest,
) -> (Option<ConnectionId>, HandshakeOutcome) {
    let (completion, rx) = HandshakeCompletion::channel();
    let id = interceptor.verify(request, completion).await;
    (id, rx.await.expect("completion must be resolved"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_handshake_binds_same_identifier() {
    let table = table();
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let interceptor = HandshakeInterceptor::new(Arc::new(ScriptedAuthorizer::new(|| Ok(Verdict::allow()))), table.clone());
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let request = upgrade_request(Some("abc"));
    let (id, outcome) = verify(&interceptor, &request).await;
    let id = id.expect("accepted");
    assert_eq!(outcome, HandshakeOutcome::Accept);
    assert_eq!(table.len(), 1);

    let bound = binder.bind(connection("abc", &closes), &request).await;
    assert_eq!(bound, Some(id));
    assert_eq!(registry.registered(), vec![("abc", id)]);
    assert!(table.is_empty(), "entry is released once bound");
    assert!(closes.lock().is_empty());
}

#[tokio::test]
async fn identifier_is_recorded_before_authorizer_resolves() {
    let table = table();
    let authorizer = Arc::new(GatedAuthorizer::default());
    let release = authorizer.gate("pending");
    let interceptor = Arc::new(HandshakeInterceptor::new(authorizer.clone(), table.clone()));

    let (completion, rx) = HandshakeCompletion::channel();
    let task = {
        let interceptor = interceptor.clone();
        tokio::spawn(async move { interceptor.verify(&upgrade_request(Some("pending")), completion).await })
    };

    // Wait until the authorizer has been called, then inspect the table.
    while authorizer.seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }
    let (_, seen_id) = authorizer.seen.lock()[0].clone();
    let key = gate_protocol::CorrelationKey::new("pending").unwrap();
    assert_eq!(table.get(&key), Some(seen_id));

    release.send(()).unwrap();
    assert_eq!(task.await.unwrap(), Some(seen_id));
    assert_eq!(rx.await.unwrap(), HandshakeOutcome::Accept);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reject paths
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_key_is_rejected_without_authorizer() {
    let table = table();
    let authorizer = Arc::new(ScriptedAuthorizer::new(|| Ok(Verdict::allow())));
    let interceptor = HandshakeInterceptor::new(authorizer.clone(), table.clone());

    let (id, outcome) = verify(&interceptor, &upgrade_request(None)).await;
    assert!(id.is_none());
    let HandshakeOutcome::Reject(rejection) = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(rejection.status, Some(400));
    assert_eq!(authorizer.calls(), 0);
    assert!(table.is_empty());
}

#[tokio::test]
async fn denied_verdict_is_forwarded_unchanged() {
    let table = table();
    let interceptor = HandshakeInterceptor::new(
        Arc::new(ScriptedAuthorizer::new(|| {
            Ok(Verdict::deny().with_status(401).with_message("nope").with_header("X-Why", "token"))
        })),
        table.clone(),
    );

    let (id, outcome) = verify(&interceptor, &upgrade_request(Some("abc"))).await;
    assert!(id.is_none());
    let HandshakeOutcome::Reject(rejection) = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(rejection.status, Some(401));
    assert_eq!(rejection.message.as_deref(), Some("nope"));
    assert_eq!(rejection.headers.get("X-Why").map(String::as_str), Some("token"));
    assert!(table.is_empty(), "rejected entries are released immediately");
}

#[tokio::test]
async fn authorizer_fault_fails_closed() {
    let table = table();
    let interceptor = HandshakeInterceptor::new(
        Arc::new(ScriptedAuthorizer::new(|| Err(anyhow::anyhow!("backend unreachable")))),
        table.clone(),
    );

    let (id, outcome) = verify(&interceptor, &upgrade_request(Some("abc"))).await;
    assert!(id.is_none());
    assert_eq!(outcome, HandshakeOutcome::Reject(Rejection::bare()));
    assert!(table.is_empty());
}

#[tokio::test]
async fn rejected_handshake_never_registers() {
    let table = table();
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let interceptor = HandshakeInterceptor::new(
        Arc::new(ScriptedAuthorizer::new(|| Ok(Verdict::deny()))),
        table.clone(),
    );
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let request = upgrade_request(Some("abc"));
    let (_, outcome) = verify(&interceptor, &request).await;
    assert!(!outcome.is_accept());

    // Even if a connection event arrived for this request, it has no identity.
    assert!(binder.bind(connection("abc", &closes), &request).await.is_none());
    assert!(registry.registered().is_empty());
    assert_eq!(closes.lock().clone(), vec![("abc", CLOSE_UNKNOWN_IDENTITY)]);
}

#[tokio::test]
async fn reused_key_is_rejected_while_pending() {
    let table = table();
    let authorizer = Arc::new(GatedAuthorizer::default());
    let release = authorizer.gate("dup");
    let interceptor = Arc::new(HandshakeInterceptor::new(authorizer.clone(), table.clone()));

    let (first_completion, first_rx) = HandshakeCompletion::channel();
    let first = {
        let interceptor = interceptor.clone();
        tokio::spawn(async move { interceptor.verify(&upgrade_request(Some("dup")), first_completion).await })
    };
    while authorizer.seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }

    let (second_id, second_outcome) = verify(&*interceptor, &upgrade_request(Some("dup"))).await;
    assert!(second_id.is_none());
    let HandshakeOutcome::Reject(rejection) = second_outcome else {
        panic!("expected rejection");
    };
    assert_eq!(rejection.status, Some(400));

    // The first handshake's entry is untouched.
    release.send(()).unwrap();
    let first_id = first.await.unwrap().expect("first accepted");
    assert_eq!(first_rx.await.unwrap(), HandshakeOutcome::Accept);
    let key = gate_protocol::CorrelationKey::new("dup").unwrap();
    assert_eq!(table.get(&key), Some(first_id));
}

#[tokio::test]
async fn abandoned_handshake_releases_entry() {
    let table = table();
    let interceptor = HandshakeInterceptor::new(
        Arc::new(ScriptedAuthorizer::new(|| Ok(Verdict::allow()))),
        table.clone(),
    );

    let (completion, rx) = HandshakeCompletion::channel();
    drop(rx);
    let id = interceptor.verify(&upgrade_request(Some("gone")), completion).await;
    assert!(id.is_none());
    assert!(table.is_empty());
}

#[tokio::test]
async fn slow_authorizer_outlives_handshake_timeout() {
    let table = Arc::new(CorrelationTable::new(Duration::from_millis(20)));
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let authorizer = Arc::new(GatedAuthorizer::default());
    let release = authorizer.gate("slow");
    let interceptor = Arc::new(HandshakeInterceptor::new(authorizer.clone(), table.clone()));
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let request = Arc::new(upgrade_request(Some("slow")));
    let (completion, rx) = HandshakeCompletion::channel();
    let task = {
        let interceptor = interceptor.clone();
        let request = request.clone();
        tokio::spawn(async move { interceptor.verify(&request, completion).await })
    };
    while authorizer.seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }

    // Well past the timeout while the authorizer is still suspended.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(table.purge_expired(), 0);

    release.send(()).unwrap();
    let id = task.await.unwrap().expect("accepted");
    assert!(rx.await.unwrap().is_accept());
    assert_eq!(binder.bind(connection("slow", &closes), &request).await, Some(id));
    assert_eq!(registry.registered(), vec![("slow", id)]);
    assert!(closes.lock().is_empty());
}

#[tokio::test]
async fn reused_key_after_timeout_cannot_take_pending_identity() {
    let table = Arc::new(CorrelationTable::new(Duration::from_millis(20)));
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let authorizer = Arc::new(GatedAuthorizer::default());
    let release = authorizer.gate("K");
    let interceptor = Arc::new(HandshakeInterceptor::new(authorizer.clone(), table.clone()));
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let first_request = Arc::new(upgrade_request(Some("K")));
    let (completion, first_rx) = HandshakeCompletion::channel();
    let first = {
        let interceptor = interceptor.clone();
        let request = first_request.clone();
        tokio::spawn(async move { interceptor.verify(&request, completion).await })
    };
    while authorizer.seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    let (second_id, second_outcome) = verify(&*interceptor, &upgrade_request(Some("K"))).await;
    assert!(second_id.is_none());
    let HandshakeOutcome::Reject(rejection) = second_outcome else {
        panic!("expected rejection");
    };
    assert_eq!(rejection.status, Some(400));

    release.send(()).unwrap();
    let first_id = first.await.unwrap().expect("first accepted");
    assert!(first_rx.await.unwrap().is_accept());
    assert_eq!(binder.bind(connection("first", &closes), &first_request).await, Some(first_id));
    assert_eq!(registry.registered(), vec![("first", first_id)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Binder
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn correlation_miss_closes_connection() {
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let binder = ConnectionBinder::new(registry.clone(), table());

    assert!(binder.bind(connection("stray", &closes), &upgrade_request(Some("unknown"))).await.is_none());
    assert!(binder.bind(connection("nokey", &closes), &upgrade_request(None)).await.is_none());

    assert!(registry.registered().is_empty());
    assert_eq!(
        closes.lock().clone(),
        vec![("stray", CLOSE_UNKNOWN_IDENTITY), ("nokey", CLOSE_UNKNOWN_IDENTITY)]
    );
}

#[tokio::test]
async fn binder_returns_exact_inserted_identifier() {
    let table = table();
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let id = ConnectionId::generate();
    table
        .insert(gate_protocol::CorrelationKey::new("abc").unwrap(), id)
        .unwrap();
    table
        .insert(gate_protocol::CorrelationKey::new("other").unwrap(), ConnectionId::generate())
        .unwrap();

    assert_eq!(binder.bind(connection("abc", &closes), &upgrade_request(Some("abc"))).await, Some(id));
    assert_eq!(registry.registered(), vec![("abc", id)]);
    assert_eq!(table.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn interleaved_handshakes_keep_their_own_identity() {
    let table = table();
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let authorizer = Arc::new(GatedAuthorizer::default());
    let release_a = authorizer.gate("A");
    let interceptor = Arc::new(HandshakeInterceptor::new(authorizer.clone(), table.clone()));
    let binder = ConnectionBinder::new(registry.clone(), table.clone());

    let request_a = Arc::new(upgrade_request(Some("A")));
    let request_b = Arc::new(upgrade_request(Some("B")));

    // A starts first but its authorizer call stays suspended.
    let (completion_a, rx_a) = HandshakeCompletion::channel();
    let task_a = {
        let interceptor = interceptor.clone();
        let request = request_a.clone();
        tokio::spawn(async move { interceptor.verify(&request, completion_a).await })
    };
    while authorizer.seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }

    // B resolves and binds while A is still pending.
    let (id_b, outcome_b) = verify(&*interceptor, &request_b).await;
    let id_b = id_b.expect("B accepted");
    assert!(outcome_b.is_accept());
    assert_eq!(binder.bind(connection("B", &closes), &request_b).await, Some(id_b));

    release_a.send(()).unwrap();
    let id_a = task_a.await.unwrap().expect("A accepted");
    assert!(rx_a.await.unwrap().is_accept());
    assert_eq!(binder.bind(connection("A", &closes), &request_a).await, Some(id_a));

    assert_ne!(id_a, id_b);
    assert_eq!(registry.registered(), vec![("B", id_b), ("A", id_a)]);
    let seen: HashMap<_, _> = authorizer.seen.lock().iter().cloned().collect();
    assert_eq!(seen["A"], id_a);
    assert_eq!(seen["B"], id_b);
}

#[tokio::test]
async fn concurrent_handshakes_get_distinct_identifiers() {
    let table = table();
    let registry = Arc::new(MockRegistry::default());
    let closes = Arc::new(Mutex::new(Vec::new()));
    let interceptor = Arc::new(HandshakeInterceptor::new(
        Arc::new(ScriptedAuthorizer::new(|| Ok(Verdict::allow()))),
        table.clone(),
    ));
    let binder = Arc::new(ConnectionBinder::new(registry.clone(), table.clone()));

    const LABELS: [&str; 16] = [
        "k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7",
        "k8", "k9", "k10", "k11", "k12", "k13", "k14", "k15",
    ];

    let tasks: Vec<_> = LABELS
        .iter()
        .map(|&label| {
            let interceptor = interceptor.clone();
            let binder = binder.clone();
            let closes = closes.clone();
            tokio::spawn(async move {
                let request = upgrade_request(Some(label));
                let (id, _) = verify(&*interceptor, &request).await;
                let id = id.expect("accepted");
                let bound = binder.bind(connection(label, &closes), &request).await;
                assert_eq!(bound, Some(id));
                id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), LABELS.len());
    assert_eq!(registry.registered().len(), LABELS.len());
    assert!(table.is_empty());
}

#[test]
fn add_route_reaches_registry() {
    let registry = MockRegistry::default();
    registry.add_route("$default", RouteDescriptor::new("$default", "echo"));
    assert_eq!(registry.routes.lock()["$default"].handler, "echo");
}
