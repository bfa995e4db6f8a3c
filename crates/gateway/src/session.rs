//! In-memory session registry.
//!
//! The only state shared across requests. Each session owns one engine and
//! one transport; a watcher task per session logs transport errors and
//! evicts the session once its transport's close token fires.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    futures::future::join_all,
    tana_mcp::{EngineFactory, ProtocolEngine},
    thiserror::Error,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::transport::{SessionTransport, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to create engine: {0:#}")]
    Engine(anyhow::Error),

    #[error("server is shutting down")]
    ShuttingDown,
}

/// One live conversation.
pub struct Session {
    pub id: String,
    pub engine: Arc<dyn ProtocolEngine>,
    pub transport: Arc<SessionTransport>,
    pub created_at: Instant,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("instance_id", &self.engine.instance_id())
            .field("closed", &self.transport.is_closed())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

/// Outcome of [`SessionRegistry::close_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl CloseReport {
    pub fn total(&self) -> usize {
        self.closed + self.failed + self.timed_out
    }
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Session>>>>;

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: SessionMap,
    factory: Arc<dyn EngineFactory>,
    keep_alive: Option<Duration>,
    /// Set once `close_all` starts; no session is created after that.
    closing: Arc<AtomicBool>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, keep_alive: Option<Duration>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory,
            keep_alive,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn resolve(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Build a session and register it.
    ///
    /// The engine and transport are built before the write lock is taken;
    /// lookup and insert then happen in one critical section. On a conflict
    /// the new pair is dropped and the live session is left untouched. Once
    /// `close_all` has started every call fails with `ShuttingDown`.
    pub async fn create(&self, explicit_id: Option<String>) -> Result<Arc<Session>, SessionError> {
        let id = explicit_id.unwrap_or_else(generate_session_id);
        let engine = self.factory.create().map_err(SessionError::Engine)?;
        let (transport, errors) =
            SessionTransport::new(id.clone(), Arc::clone(&engine), self.keep_alive);
        let session = Arc::new(Session {
            id: id.clone(),
            engine,
            transport,
            created_at: Instant::now(),
        });

        let mut sessions = self.sessions.write().await;
        if self.closing.load(Ordering::SeqCst) {
            debug!(session_id = %id, "refusing new session during shutdown");
            return Err(SessionError::ShuttingDown);
        }
        match sessions.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(session_id = %id, "session id already live, discarding new engine");
                return Err(SessionError::AlreadyExists(id));
            },
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            },
        }
        drop(sessions);

        self.spawn_watcher(&session, errors);
        info!(
            session_id = %id,
            instance_id = %session.engine.instance_id(),
            "session created"
        );
        Ok(session)
    }

    /// Remove a session without closing it. Idempotent.
    pub async fn evict(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = &removed {
            debug!(session_id = %id, age = ?session.created_at.elapsed(), "session evicted");
        }
        removed
    }

    /// Close every live session concurrently. The registry is empty after
    /// this returns, whatever the individual outcomes, and refuses new
    /// sessions from the moment it is drained.
    pub async fn close_all(&self, per_session_timeout: Duration) -> CloseReport {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            self.closing.store(true, Ordering::SeqCst);
            sessions.drain().map(|(_, session)| session).collect()
        };

        let outcomes = join_all(drained.iter().map(|session| async move {
            let outcome = tokio::time::timeout(per_session_timeout, session.transport.close()).await;
            (session.id.as_str(), outcome)
        }))
        .await;

        let mut report = CloseReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => report.closed += 1,
                Ok(Err(e)) => {
                    warn!(session_id = %id, error = %e, "session close failed");
                    report.failed += 1;
                },
                Err(_) => {
                    warn!(session_id = %id, timeout = ?per_session_timeout, "session close timed out");
                    report.timed_out += 1;
                },
            }
        }
        report
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    fn spawn_watcher(
        &self,
        session: &Arc<Session>,
        mut errors: mpsc::UnboundedReceiver<TransportError>,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let session_id = session.id.clone();
        let instance_id = session.engine.instance_id();
        let created_at = session.created_at;
        let transport = Arc::clone(&session.transport);
        let closed = transport.close_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(err) = errors.recv() => {
                        warn!(session_id = %session_id, error = %err, "transport error");
                    },
                    () = closed.cancelled() => break,
                }
            }
            while let Ok(err) = errors.try_recv() {
                warn!(session_id = %session_id, error = %err, "transport error");
            }

            if evict_instance(&sessions, &session_id, instance_id).await {
                info!(session_id = %session_id, age = ?created_at.elapsed(), "session closed");
            }
            if let Err(e) = transport.close().await {
                warn!(session_id = %session_id, error = %e, "engine close failed");
            }
        });
    }
}

/// Remove `id` only while it still maps to the engine `instance_id`, so a
/// late close of a replaced session never evicts its successor.
async fn evict_instance(sessions: &SessionMap, id: &str, instance_id: Uuid) -> bool {
    let mut map = sessions.write().await;
    let current = map
        .get(id)
        .is_some_and(|session| session.engine.instance_id() == instance_id);
    if current {
        map.remove(id);
    }
    current
}

pub fn generate_session_id() -> String {
    format!("mcp-session-{}", Uuid::new_v4())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        crate::testing::{RecordingFactory, wait_until},
    };

    fn registry() -> (SessionRegistry, Arc<RecordingFactory>) {
        let factory = Arc::new(RecordingFactory::default());
        (SessionRegistry::new(factory.clone(), None), factory)
    }

    #[tokio::test]
    async fn create_and_resolve() {
        let (registry, _) = registry();
        let session = registry.create(None).await.unwrap();
        assert!(session.id.starts_with("mcp-session-"));

        let found = registry.resolve(&session.id).await.unwrap();
        assert_eq!(found.engine.instance_id(), session.engine.instance_id());
        assert_eq!(registry.len().await, 1);
        assert!(registry.resolve("unknown-123").await.is_none());
        assert!(format!("{session:?}").contains("age"));
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let (registry, _) = registry();
        let a = registry.create(None).await.unwrap();
        let b = registry.create(None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(registry.ids().await.len(), 2);
    }

    #[tokio::test]
    async fn explicit_id_conflict_keeps_the_live_session() {
        let (registry, factory) = registry();
        let first = registry.create(Some("client-id".into())).await.unwrap();
        let err = registry.create(Some("client-id".into())).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(ref id) if id == "client-id"));

        assert_eq!(factory.created(), 2);
        let live = registry.resolve("client-id").await.unwrap();
        assert_eq!(live.engine.instance_id(), first.engine.instance_id());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_creation_for_one_id_yields_one_session() {
        let (registry, _) = registry();
        let attempts = (0..16).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.create(Some("racy".into())).await })
        });
        let results = join_all(attempts).await;
        let winners = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn engine_failure_is_reported() {
        let factory = Arc::new(RecordingFactory::failing());
        let registry = SessionRegistry::new(factory, None);
        let err = registry.create(None).await.unwrap_err();
        assert!(matches!(err, SessionError::Engine(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn transport_close_evicts_once() {
        let (registry, _) = registry();
        let session = registry.create(None).await.unwrap();
        session.transport.close().await.unwrap();

        let (registry_ref, id) = (&registry, session.id.as_str());
        wait_until(move || async move { registry_ref.resolve(id).await.is_none() }).await;
        // A second close notification is a no-op.
        session.transport.close().await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stale_close_does_not_evict_a_successor() {
        let (registry, _) = registry();
        let old = registry.create(Some("reused".into())).await.unwrap();
        // Replace the entry behind the watcher's back.
        registry.evict("reused").await.unwrap();
        let new = registry.create(Some("reused".into())).await.unwrap();

        old.transport.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let live = registry.resolve("reused").await.unwrap();
        assert_eq!(live.engine.instance_id(), new.engine.instance_id());
    }

    #[tokio::test]
    async fn client_disconnect_closes_the_engine() {
        let (registry, _) = registry();
        let session = registry.create(None).await.unwrap();
        // A drop guard firing looks exactly like this.
        session.transport.close_token().cancel();

        let engine = &session.engine;
        wait_until(move || async move { engine.is_closed() }).await;
        assert!(registry.resolve(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let (registry, _) = registry();
        let session = registry.create(None).await.unwrap();
        assert!(registry.evict(&session.id).await.is_some());
        assert!(registry.evict(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let (registry, _) = registry();
        let a = registry.create(None).await.unwrap();
        let b = registry.create(None).await.unwrap();

        let report = registry.close_all(Duration::from_secs(1)).await;
        assert_eq!(report, CloseReport {
            closed: 2,
            failed: 0,
            timed_out: 0
        });
        assert!(registry.is_empty().await);
        assert!(a.engine.is_closed());
        assert!(b.engine.is_closed());
    }

    #[tokio::test]
    async fn no_session_is_created_once_close_all_has_started() {
        let (registry, _) = registry();
        registry.create(None).await.unwrap();
        assert!(!registry.is_closing());

        registry.close_all(Duration::from_secs(1)).await;
        assert!(registry.is_closing());
        let err = registry.create(None).await.unwrap_err();
        assert!(matches!(err, SessionError::ShuttingDown));
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_gives_up_on_hanging_engines() {
        let factory = Arc::new(RecordingFactory::hanging());
        let registry = SessionRegistry::new(factory, None);
        registry.create(None).await.unwrap();
        registry.create(None).await.unwrap();

        let report = registry.close_all(Duration::from_secs(5)).await;
        assert_eq!(report.timed_out, 2);
        assert_eq!(report.total(), 2);
        assert!(registry.is_empty().await);
    }
}
