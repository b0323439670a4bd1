//! Authoritative per-connection sessions on the connector process.

use super::{Session, SessionExport, SessionId, Settings};
use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Write-through hook for session settings.
///
/// A frontend may be configured with a persistent store; `push` on a
/// frontend session writes the named setting through to it. Without a
/// store, pushes are in-memory no-ops.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: SessionId, key: &str, value: &Value) -> anyhow::Result<()>;
}

/// The authoritative session for one client connection.
///
/// Mutations are visible to every subsequent request on the same connection:
/// the session is shared as `Arc<FrontendSession>` and synchronized
/// internally.
pub struct FrontendSession {
    id: SessionId,
    frontend_id: String,
    uid: RwLock<Option<String>>,
    settings: RwLock<Settings>,
    store: Option<Arc<dyn SessionStore>>,
}

impl FrontendSession {
    pub fn new(
        id: SessionId,
        frontend_id: impl Into<String>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            frontend_id: frontend_id.into(),
            uid: RwLock::new(None),
            settings: RwLock::new(Settings::new()),
            store,
        })
    }

    /// Binds a user id to this session.
    pub fn bind(&self, uid: &str) {
        *self.uid.write() = Some(uid.to_string());
    }

    /// Clears the bound user id.
    pub fn unbind(&self) {
        *self.uid.write() = None;
    }

    /// Writes the named setting through to the configured store.
    pub async fn push(&self, key: &str) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let value = self
            .get(key)
            .ok_or_else(|| anyhow!("no setting {key:?} on session {}", self.id))?;
        store.save(self.id, key, &value).await
    }

    /// Writes every setting through to the configured store.
    pub async fn push_all(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let settings = self.settings.read().clone();
        for (key, value) in &settings {
            store.save(self.id, key, value).await?;
        }
        Ok(())
    }
}

impl Session for FrontendSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn frontend_id(&self) -> String {
        self.frontend_id.clone()
    }

    fn uid(&self) -> Option<String> {
        self.uid.read().clone()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.settings.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.settings.write().insert(key.to_string(), value);
    }

    fn export(&self) -> SessionExport {
        SessionExport {
            id: self.id,
            frontend_id: self.frontend_id.clone(),
            uid: self.uid.read().clone(),
            settings: self.settings.read().clone(),
        }
    }
}

/// Registry of live sessions on a frontend process.
///
/// Tracks sessions by id and keeps a uid index in step with bind/unbind so
/// user-targeted pushes can locate every connection of a user.
pub struct SessionRegistry {
    frontend_id: String,
    next_id: AtomicU64,
    sessions: DashMap<SessionId, Arc<FrontendSession>>,
    by_uid: DashMap<String, Vec<SessionId>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionRegistry {
    pub fn new(frontend_id: impl Into<String>) -> Self {
        Self {
            frontend_id: frontend_id.into(),
            next_id: AtomicU64::new(1),
            sessions: DashMap::new(),
            by_uid: DashMap::new(),
            store: None,
        }
    }

    /// Attaches a persistent store used by session pushes.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Creates and registers a session for a new connection.
    pub fn create(&self) -> Arc<FrontendSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = FrontendSession::new(id, self.frontend_id.clone(), self.store.clone());
        self.sessions.insert(id, session.clone());
        debug!(session_id = id, "session created");
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<FrontendSession>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Every session currently bound to the given user id.
    pub fn get_by_uid(&self, uid: &str) -> Vec<Arc<FrontendSession>> {
        let Some(ids) = self.by_uid.get(uid) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Binds a user id to a session and indexes it. Returns false when the
    /// session is unknown.
    pub fn bind(&self, id: SessionId, uid: &str) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        if let Some(old) = session.uid() {
            self.drop_uid_entry(&old, id);
        }
        session.bind(uid);
        self.by_uid.entry(uid.to_string()).or_default().push(id);
        true
    }

    /// Clears a session's user id and removes it from the index. Returns
    /// false when the session is unknown.
    pub fn unbind(&self, id: SessionId) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        if let Some(uid) = session.uid() {
            self.drop_uid_entry(&uid, id);
        }
        session.unbind();
        true
    }

    /// Removes a closed connection's session.
    pub fn remove(&self, id: SessionId) -> Option<Arc<FrontendSession>> {
        let (_, session) = self.sessions.remove(&id)?;
        if let Some(uid) = session.uid() {
            self.drop_uid_entry(&uid, id);
        }
        debug!(session_id = id, "session removed");
        Some(session)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn drop_uid_entry(&self, uid: &str, id: SessionId) {
        if let Some(mut ids) = self.by_uid.get_mut(uid) {
            ids.retain(|candidate| *candidate != id);
            if ids.is_empty() {
                drop(ids);
                self.by_uid.remove(uid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSessionStore;
    use serde_json::json;

    #[tokio::test]
    async fn push_writes_the_named_setting_through() {
        let store = Arc::new(MockSessionStore::default());
        let registry = SessionRegistry::new("connector-1").with_store(store.clone());
        let session = registry.create();
        session.set("score", json!(42));
        session.set("room", json!("lobby"));

        session.push("score").await.unwrap();

        let saves = store.saves.lock().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0], (session.id(), "score".to_string(), json!(42)));
    }

    #[tokio::test]
    async fn push_all_writes_every_setting_through() {
        let store = Arc::new(MockSessionStore::default());
        let session = FrontendSession::new(3, "connector-1", Some(store.clone()));
        session.set("score", json!(7));
        session.set("room", json!("lobby"));

        session.push_all().await.unwrap();

        let mut saves = store.saves.lock().await.clone();
        saves.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            saves,
            vec![
                (3, "room".to_string(), json!("lobby")),
                (3, "score".to_string(), json!(7)),
            ]
        );
    }

    #[tokio::test]
    async fn push_of_a_missing_setting_is_an_error() {
        let store = Arc::new(MockSessionStore::default());
        let session = FrontendSession::new(4, "connector-1", Some(store.clone()));

        assert!(session.push("ghost").await.is_err());
        assert!(store.saves.lock().await.is_empty());
    }

    #[tokio::test]
    async fn push_without_a_store_is_a_no_op() {
        let session = FrontendSession::new(5, "connector-1", None);
        session.set("score", json!(1));
        session.push("score").await.unwrap();
        session.push_all().await.unwrap();
    }

    #[test]
    fn set_then_get_round_trips() {
        let session = FrontendSession::new(7, "connector-1", None);
        session.set("score", json!(42));
        assert_eq!(session.get("score"), Some(json!(42)));
        assert_eq!(session.get("missing"), None);
    }

    #[test]
    fn export_carries_identity_and_settings() {
        let session = FrontendSession::new(7, "connector-1", None);
        session.bind("u99");
        session.set("room", json!("lobby"));

        let export = session.export();
        assert_eq!(export.id, 7);
        assert_eq!(export.frontend_id, "connector-1");
        assert_eq!(export.uid.as_deref(), Some("u99"));
        assert_eq!(export.settings.get("room"), Some(&json!("lobby")));
    }

    #[test]
    fn registry_bind_keeps_uid_index_consistent() {
        let registry = SessionRegistry::new("connector-1");
        let a = registry.create();
        let b = registry.create();

        assert!(registry.bind(a.id(), "u1"));
        assert!(registry.bind(b.id(), "u1"));
        assert_eq!(registry.get_by_uid("u1").len(), 2);

        assert!(registry.unbind(a.id()));
        assert_eq!(registry.get_by_uid("u1").len(), 1);
        assert_eq!(a.uid(), None);

        registry.remove(b.id());
        assert!(registry.get_by_uid("u1").is_empty());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn rebinding_moves_the_index_entry() {
        let registry = SessionRegistry::new("connector-1");
        let session = registry.create();
        registry.bind(session.id(), "u1");
        registry.bind(session.id(), "u2");

        assert!(registry.get_by_uid("u1").is_empty());
        assert_eq!(registry.get_by_uid("u2").len(), 1);
        assert_eq!(session.uid().as_deref(), Some("u2"));
    }
}
