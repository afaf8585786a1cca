//! The process-wide session table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, instrument, warn};

use supervisor_core::errors::SupervisorError;
use supervisor_core::ids::SessionId;
use supervisor_core::provider::LlmProvider;
use supervisor_settings::{SessionMode, SupervisorSettings};
use supervisor_store::{HistoryScope, HistoryStoreFactory};

use crate::registry::ToolRegistry;
use crate::runtime::{AgentRuntime, RuntimeConfig};

#[derive(Clone, Debug)]
pub struct SessionManagerConfig {
    pub runtime: RuntimeConfig,
    pub mode: SessionMode,
    pub memory_id: Option<String>,
    pub default_actor_id: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            mode: SessionMode::InMemory,
            memory_id: None,
            default_actor_id: "default_user".into(),
        }
    }
}

impl SessionManagerConfig {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            runtime: RuntimeConfig::from_settings(settings),
            mode: settings.session.mode,
            memory_id: settings.memory_store.memory_id.clone(),
            default_actor_id: settings.memory_store.default_actor_id.clone(),
        }
    }
}

/// Snapshot of the session table for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveSessions {
    pub count: usize,
    pub ids: Vec<SessionId>,
}

/// Maps session ids to their runtimes, creating them on first use.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<AgentRuntime>>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    history: Option<Arc<dyn HistoryStoreFactory>>,
    config: SessionManagerConfig,
    sessions_created: AtomicU64,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            tools,
            history: None,
            config,
            sessions_created: AtomicU64::new(0),
        }
    }

    pub fn with_history_factory(mut self, factory: Arc<dyn HistoryStoreFactory>) -> Self {
        self.history = Some(factory);
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Return the runtime for `session_id`, creating it on a miss.
    ///
    /// Concurrent callers for the same unseen id all receive the same
    /// runtime. Construction happens under the shard lock and never
    /// suspends. On failure nothing is registered.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get_or_create(
        &self,
        session_id: &SessionId,
        actor_id: Option<&str>,
    ) -> Result<Arc<AgentRuntime>, SupervisorError> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let runtime = Arc::new(self.build(session_id, actor_id)?);
                let total = self.sessions_created.fetch_add(1, Ordering::Relaxed) + 1;
                info!(model = %self.provider.model(), sessions_created = total, "session created");
                Ok(Arc::clone(entry.insert(runtime).value()))
            }
        }
    }

    fn build(
        &self,
        session_id: &SessionId,
        actor_id: Option<&str>,
    ) -> Result<AgentRuntime, SupervisorError> {
        let actor = actor_id
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.config.default_actor_id.as_str())
            .to_string();

        let runtime = AgentRuntime::new(
            session_id.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&self.tools),
            &self.config.runtime,
        )
        .map_err(|e| e.into_supervisor(session_id))?
        .with_actor(Some(actor.clone()));

        if self.config.mode == SessionMode::InMemory {
            return Ok(runtime);
        }

        let memory_id = self
            .config
            .memory_id
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                SupervisorError::Configuration(
                    "memoryId is required when session mode is external_store".into(),
                )
            })?;
        let factory = self.history.as_ref().ok_or_else(|| {
            SupervisorError::Configuration("no history store configured".into())
        })?;

        let scope = HistoryScope {
            memory_id: memory_id.to_string(),
            actor_id: actor,
            session_id: session_id.clone(),
        };
        let store = factory.open(scope).map_err(|e| {
            warn!(error = %e, "failed to open history store");
            SupervisorError::Configuration(format!("failed to open history store: {e}"))
        })?;
        runtime
            .with_history(store)
            .map_err(|e| SupervisorError::Configuration(format!("failed to load history: {e}")))
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<AgentRuntime>> {
        self.sessions.get(session_id).map(|r| Arc::clone(r.value()))
    }

    /// Remove a session. Turns already running on it finish normally.
    pub fn evict(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "session evicted");
        }
        removed
    }

    /// Evict sessions idle for at least `ttl`. Busy sessions are kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, runtime| runtime.is_busy() || runtime.idle_for() < ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, ttl_secs = ttl.as_secs(), "evicted idle sessions");
        }
        evicted
    }

    pub fn list_active(&self) -> ActiveSessions {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ActiveSessions {
            count: ids.len(),
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Total runtimes constructed since startup.
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::turns::Role;
    use supervisor_llm::{MockProvider, MockResponse};
    use supervisor_store::{Database, SqliteHistoryFactory};

    fn manager(provider: MockProvider) -> SessionManager {
        SessionManager::new(
            Arc::new(provider),
            Arc::new(ToolRegistry::new()),
            SessionManagerConfig::default(),
        )
    }

    fn external(memory_id: Option<&str>) -> SessionManager {
        let config = SessionManagerConfig {
            mode: SessionMode::ExternalStore,
            memory_id: memory_id.map(String::from),
            ..SessionManagerConfig::default()
        };
        let factory = SqliteHistoryFactory::new(Database::in_memory().unwrap());
        SessionManager::new(
            Arc::new(MockProvider::echo()),
            Arc::new(ToolRegistry::new()),
            config,
        )
        .with_history_factory(Arc::new(factory))
    }

    #[test]
    fn same_id_returns_same_runtime() {
        let mgr = manager(MockProvider::echo());
        let id = SessionId::from_raw("s-1");
        let a = mgr.get_or_create(&id, None).unwrap();
        let b = mgr.get_or_create(&id, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.sessions_created(), 1);
        assert_eq!(a.actor_id(), Some("default_user"));
    }

    #[test]
    fn distinct_ids_get_distinct_runtimes() {
        let mgr = manager(MockProvider::echo());
        let a = mgr.get_or_create(&SessionId::from_raw("a"), None).unwrap();
        let b = mgr.get_or_create(&SessionId::from_raw("b"), Some("alice")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.actor_id(), Some("alice"));
        assert_eq!(mgr.sessions_created(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_yields_one_runtime() {
        let mgr = Arc::new(manager(MockProvider::echo()));
        let id = SessionId::from_raw("contended");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let id = id.clone();
                tokio::spawn(async move { mgr.get_or_create(&id, None).unwrap() })
            })
            .collect();

        let mut runtimes = Vec::new();
        for handle in handles {
            runtimes.push(handle.await.unwrap());
        }
        assert!(runtimes.iter().all(|r| Arc::ptr_eq(r, &runtimes[0])));
        assert_eq!(mgr.sessions_created(), 1);
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn evicted_runtime_keeps_working_for_holders() {
        let mgr = manager(MockProvider::echo());
        let id = SessionId::from_raw("s-1");
        let held = mgr.get_or_create(&id, None).unwrap();

        assert!(mgr.evict(&id));
        assert!(!mgr.evict(&id));
        assert!(mgr.get(&id).is_none());

        let out = held.run("still here").await.unwrap();
        assert_eq!(out.output, "Echo: still here");

        let fresh = mgr.get_or_create(&id, None).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(fresh.snapshot().is_empty());
    }

    #[test]
    fn list_active_reports_ids() {
        let mgr = manager(MockProvider::echo());
        for id in ["b", "a"] {
            mgr.get_or_create(&SessionId::from_raw(id), None).unwrap();
        }
        let active = mgr.list_active();
        assert_eq!(active.count, 2);
        assert_eq!(active.ids, vec![SessionId::from_raw("a"), SessionId::from_raw("b")]);

        let json = serde_json::to_value(&active).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["ids"][0], "a");
    }

    #[test]
    fn external_store_without_memory_id_is_configuration_error() {
        let mgr = external(None);
        let err = mgr
            .get_or_create(&SessionId::from_raw("s-1"), None)
            .unwrap_err();
        assert_eq!(err.type_name(), "ConfigurationError");
        assert!(mgr.is_empty());
        assert_eq!(mgr.sessions_created(), 0);
    }

    #[test]
    fn external_store_without_factory_is_configuration_error() {
        let config = SessionManagerConfig {
            mode: SessionMode::ExternalStore,
            memory_id: Some("mem".into()),
            ..SessionManagerConfig::default()
        };
        let mgr = SessionManager::new(
            Arc::new(MockProvider::echo()),
            Arc::new(ToolRegistry::new()),
            config,
        );
        let err = mgr.get_or_create(&SessionId::new(), None).unwrap_err();
        assert_eq!(err.type_name(), "ConfigurationError");
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn external_store_restores_history_after_eviction() {
        let mgr = external(Some("mem-1"));
        let id = SessionId::from_raw("s-1");

        let rt = mgr.get_or_create(&id, None).unwrap();
        rt.run("Hi").await.unwrap();
        assert!(mgr.evict(&id));

        let restored = mgr.get_or_create(&id, None).unwrap();
        let roles: Vec<Role> = restored.snapshot().iter().map(|t| t.role()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);

        // another actor does not see it
        let other = mgr.get_or_create(&SessionId::from_raw("s-2"), Some("bob")).unwrap();
        assert!(other.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted() {
        let mgr = manager(MockProvider::new(vec![MockResponse::stream_text("ok")]));
        let stale = SessionId::from_raw("stale");
        mgr.get_or_create(&stale, None).unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let fresh = SessionId::from_raw("fresh");
        mgr.get_or_create(&fresh, None).unwrap();

        assert_eq!(mgr.evict_idle(Duration::from_secs(5)), 1);
        assert!(mgr.get(&stale).is_none());
        assert!(mgr.get(&fresh).is_some());
    }
}
