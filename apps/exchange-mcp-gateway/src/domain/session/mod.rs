//! Session Registry
//!
//! Tracks the live RPC sessions served by the transport layer.
//!
//! # Design
//!
//! The registry is the sole writer of session state:
//! - A session is created only by an initializing request that carries
//!   no identifier, and gets a fresh UUIDv4 that is never reused
//! - Continuation requests resolve an existing identifier or fail with
//!   [`SessionError`] without touching the map
//! - Closing marks the session closed, cancels its transport and removes
//!   it; closing twice is a no-op
//!
//! Each [`Session`] owns an outbound notification channel, a cancellation
//! token observed by in-flight requests and SSE streams, and a FIFO
//! admission lock that keeps requests on one session in arrival order.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{MutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default capacity of each session's outbound notification channel.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

// =============================================================================
// Session Identifier
// =============================================================================

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SessionError::UnknownSession(s.to_string()))
    }
}

// =============================================================================
// Session
// =============================================================================

/// Client details negotiated by the initializing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    /// Protocol version agreed with the client.
    pub protocol_version: String,
    /// Client name, if announced.
    pub name: Option<String>,
    /// Client version, if announced.
    pub version: Option<String>,
}

/// One live RPC session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    client: Mutex<Option<ClientInfo>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    outbound: broadcast::Sender<Value>,
    admission: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(outbound_capacity: usize) -> Self {
        let now = Utc::now();
        let (outbound, _) = broadcast::channel(outbound_capacity.max(1));
        Self {
            id: SessionId::generate(),
            created_at: now,
            last_activity: Mutex::new(now),
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            outbound,
            admission: tokio::sync::Mutex::new(()),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last request on this session.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    /// Record activity on the session.
    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    /// Client details, once initialized.
    #[must_use]
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client.lock().clone()
    }

    /// Store the negotiated client details.
    pub fn set_client_info(&self, info: ClientInfo) {
        *self.client.lock() = Some(info);
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the session closes.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to the session's outbound notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.outbound.subscribe()
    }

    /// Queue a notification for the session's listeners.
    ///
    /// Returns `false` if the session is closed or nobody is listening.
    pub fn notify(&self, message: Value) -> bool {
        !self.is_closed() && self.outbound.send(message).is_ok()
    }

    /// Wait for this session's turn to dispatch.
    ///
    /// Waiters are admitted in the order they called this method.
    pub async fn admit(&self) -> MutexGuard<'_, ()> {
        self.admission.lock().await
    }

    /// Returns `true` if this call performed the close.
    fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.cancel.cancel();
        }
        first
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Outcome of resolving a request against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    /// The session to dispatch on.
    pub session: Arc<Session>,
    /// Whether the session was created by this resolution.
    pub created: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Sessions currently live.
    pub active: usize,
    /// Sessions created since startup.
    pub total_created: u64,
    /// Sessions closed since startup.
    pub total_closed: u64,
}

/// Map of live sessions keyed by identifier.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    outbound_capacity: usize,
    total_created: AtomicU64,
    total_closed: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbound_capacity,
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
        }
    }

    /// Resolve an inbound request to a session.
    ///
    /// # Errors
    ///
    /// - `MissingSessionId` if no identifier was given on a non-initializing
    ///   request
    /// - `UnknownSession` if the identifier does not name a live session
    ///
    /// Neither error creates a session.
    pub fn resolve(
        &self,
        identifier: Option<&str>,
        initializing: bool,
    ) -> Result<ResolvedSession, SessionError> {
        match identifier {
            Some(raw) => {
                let id: SessionId = raw.parse()?;
                self.get(&id)
                    .map(|session| ResolvedSession {
                        session,
                        created: false,
                    })
                    .ok_or_else(|| SessionError::UnknownSession(raw.to_string()))
            }
            None if initializing => Ok(ResolvedSession {
                session: self.create(),
                created: true,
            }),
            None => Err(SessionError::MissingSessionId),
        }
    }

    fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.outbound_capacity));
        self.sessions.write().insert(session.id(), Arc::clone(&session));
        self.total_created.fetch_add(1, Ordering::Relaxed);
        session
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close a session.
    ///
    /// Returns `true` if a live session was closed; closing an unknown or
    /// already-closed session returns `false` and changes nothing.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) if session.mark_closed() => {
                self.total_closed.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Close every live session. Returns the number closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let closed = drained.iter().filter(|s| s.mark_closed()).count();
        self.total_closed.fetch_add(closed as u64, Ordering::Relaxed);
        closed
    }

    /// Send a notification to every live session.
    ///
    /// Returns the number of sessions with at least one listener.
    pub fn broadcast(&self, message: &Value) -> usize {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions
            .iter()
            .filter(|session| session.notify(message.clone()))
            .count()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Session-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Non-initializing request without a session identifier.
    #[error("missing session identifier")]
    MissingSessionId,
    /// Identifier does not name a live session.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// The session closed while the request was in flight.
    #[error("session closed: {0}")]
    Closed(SessionId),
    /// Failure on the session's transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Whether this error means the request named no usable session.
    #[must_use]
    pub const fn is_invalid_session(&self) -> bool {
        matches!(self, Self::MissingSessionId | Self::UnknownSession(_))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_creates_session() {
        let registry = SessionRegistry::default();

        let resolved = registry.resolve(None, true).unwrap();

        assert!(resolved.created);
        assert_eq!(registry.len(), 1);
        assert!(!resolved.session.is_closed());
    }

    #[test]
    fn continuation_reuses_session() {
        let registry = SessionRegistry::default();
        let id = registry.resolve(None, true).unwrap().session.id().to_string();

        let resolved = registry.resolve(Some(&id), false).unwrap();

        assert!(!resolved.created);
        assert_eq!(resolved.session.id().to_string(), id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_identifier_without_initialize_is_rejected() {
        let registry = SessionRegistry::default();

        let err = registry.resolve(None, false).unwrap_err();

        assert_eq!(err, SessionError::MissingSessionId);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_identifier_creates_nothing() {
        let registry = SessionRegistry::default();
        let stranger = SessionId::generate().to_string();

        let err = registry.resolve(Some(&stranger), true).unwrap_err();

        assert!(err.is_invalid_session());
        assert!(registry.is_empty());
        assert_eq!(registry.stats().total_created, 0);
    }

    #[test]
    fn malformed_identifier_is_unknown() {
        let registry = SessionRegistry::default();

        let err = registry.resolve(Some("not-a-uuid"), false).unwrap_err();

        assert_eq!(err, SessionError::UnknownSession("not-a-uuid".to_string()));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = SessionRegistry::default();
        let session = registry.resolve(None, true).unwrap().session;
        let token = session.cancellation();

        assert!(registry.close(&session.id()));
        assert!(!registry.close(&session.id()));

        assert!(session.is_closed());
        assert!(token.is_cancelled());
        assert!(registry.get(&session.id()).is_none());

        let stats = registry.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_closed, 1);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn closed_identifier_no_longer_resolves() {
        let registry = SessionRegistry::default();
        let id = registry.resolve(None, true).unwrap().session.id();
        registry.close(&id);

        let err = registry.resolve(Some(&id.to_string()), false).unwrap_err();

        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[test]
    fn close_all_cancels_everything() {
        let registry = SessionRegistry::default();
        let sessions: Vec<_> = (0..3)
            .map(|_| registry.resolve(None, true).unwrap().session)
            .collect();

        assert_eq!(registry.close_all(), 3);

        assert!(registry.is_empty());
        assert!(sessions.iter().all(|s| s.cancellation().is_cancelled()));
        assert_eq!(registry.stats().total_closed, 3);
    }

    #[test]
    fn notify_reaches_subscribers_until_closed() {
        let registry = SessionRegistry::default();
        let session = registry.resolve(None, true).unwrap().session;
        let mut rx = session.subscribe();

        assert_eq!(registry.broadcast(&serde_json::json!({"method": "ping"})), 1);
        assert_eq!(rx.try_recv().unwrap()["method"], "ping");

        registry.close(&session.id());
        assert!(!session.notify(serde_json::json!({})));
    }

    #[test]
    fn client_info_is_recorded() {
        let registry = SessionRegistry::default();
        let session = registry.resolve(None, true).unwrap().session;
        assert!(session.client_info().is_none());

        session.set_client_info(ClientInfo {
            protocol_version: "2025-06-18".to_string(),
            name: Some("inspector".to_string()),
            version: None,
        });

        assert_eq!(
            session.client_info().unwrap().name.as_deref(),
            Some("inspector")
        );
    }

    #[test]
    fn thread_safety_concurrent_initializations() {
        use std::collections::HashSet;
        use std::thread;

        let registry = Arc::new(SessionRegistry::default());
        let mut handles = vec![];

        for _ in 0..32 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.resolve(None, true).unwrap().session.id()
            }));
        }

        let ids: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids.len(), 32);
        assert_eq!(registry.len(), 32);
    }

    #[tokio::test]
    async fn admission_is_first_come_first_served() {
        let registry = SessionRegistry::default();
        let session = registry.resolve(None, true).unwrap().session;
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = session.admit().await;
        let mut handles = vec![];
        for i in 0..5 {
            let s = Arc::clone(&session);
            let o = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _turn = s.admit().await;
                o.lock().push(i);
            }));
            tokio::task::yield_now().await;
        }
        drop(guard);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
