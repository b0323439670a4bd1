//! Per-request session snapshots on backend processes.

use super::{Session, SessionExport, SessionId, Settings};
use crate::error::RpcError;
use crate::rpc::SessionRpc;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// A backend's view of a frontend session for the duration of one request.
///
/// `set` and `get` touch only the local snapshot. Changes reach the
/// authoritative session solely through [`push`](BackendSession::push) and
/// [`push_all`](BackendSession::push_all); unpushed changes are discarded
/// when the snapshot goes out of scope.
pub struct BackendSession {
    id: SessionId,
    frontend_id: String,
    uid: RwLock<Option<String>>,
    settings: RwLock<Settings>,
    rpc: Arc<dyn SessionRpc>,
}

impl BackendSession {
    pub fn from_export(export: SessionExport, rpc: Arc<dyn SessionRpc>) -> Arc<Self> {
        Arc::new(Self {
            id: export.id,
            frontend_id: export.frontend_id,
            uid: RwLock::new(export.uid),
            settings: RwLock::new(export.settings),
            rpc,
        })
    }

    /// Binds a user id on the authoritative session, then mirrors it locally.
    pub async fn bind(&self, uid: &str) -> Result<(), RpcError> {
        self.rpc.bind(&self.frontend_id, self.id, uid).await?;
        *self.uid.write() = Some(uid.to_string());
        Ok(())
    }

    /// Clears the user id on the authoritative session, then locally.
    pub async fn unbind(&self, uid: &str) -> Result<(), RpcError> {
        self.rpc.unbind(&self.frontend_id, self.id, uid).await?;
        *self.uid.write() = None;
        Ok(())
    }

    /// Pushes one setting to the originating frontend.
    ///
    /// A key never set locally pushes `null`, overwriting the authoritative
    /// value like any other push.
    pub async fn push(&self, key: &str) -> Result<(), RpcError> {
        let value = self.get(key).unwrap_or(Value::Null);
        self.rpc.push(&self.frontend_id, self.id, key, value).await
    }

    /// Pushes every local setting to the originating frontend.
    pub async fn push_all(&self) -> Result<(), RpcError> {
        let settings = self.settings.read().clone();
        self.rpc.push_all(&self.frontend_id, self.id, settings).await
    }
}

impl Session for BackendSession {
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

/// Builds backend session snapshots from forwarded exports.
///
/// One factory per backend process, constructed with the process's session
/// RPC handle so every snapshot can reach its originating frontend.
pub struct BackendSessionFactory {
    rpc: Arc<dyn SessionRpc>,
}

impl BackendSessionFactory {
    pub fn new(rpc: Arc<dyn SessionRpc>) -> Self {
        Self { rpc }
    }

    pub fn create(&self, export: SessionExport) -> Arc<BackendSession> {
        BackendSession::from_export(export, self.rpc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSessionRpc;
    use serde_json::json;

    fn export() -> SessionExport {
        SessionExport {
            id: 7,
            frontend_id: "connector-1".into(),
            uid: Some("u1".into()),
            settings: Settings::new(),
        }
    }

    #[tokio::test]
    async fn local_set_does_not_reach_the_frontend() {
        let rpc = Arc::new(MockSessionRpc::default());
        let session = BackendSession::from_export(export(), rpc.clone());

        session.set("score", json!(42));
        assert_eq!(session.get("score"), Some(json!(42)));
        assert!(rpc.pushes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn push_sends_the_named_key() {
        let rpc = Arc::new(MockSessionRpc::default());
        let session = BackendSession::from_export(export(), rpc.clone());

        session.set("score", json!(42));
        session.push("score").await.unwrap();

        let pushes = rpc.pushes.lock().await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0], ("connector-1".into(), 7, "score".into(), json!(42)));
    }

    #[tokio::test]
    async fn export_round_trips_through_a_snapshot() {
        let rpc = Arc::new(MockSessionRpc::default());
        let mut source = export();
        source.settings.insert("room".into(), json!("lobby"));

        let session = BackendSession::from_export(source.clone(), rpc);
        assert_eq!(session.export(), source);
    }

    #[tokio::test]
    async fn factory_snapshots_share_one_rpc_handle() {
        let rpc = Arc::new(MockSessionRpc::default());
        let factory = BackendSessionFactory::new(rpc.clone());

        let first = factory.create(export());
        let mut other = export();
        other.id = 8;
        let second = factory.create(other);

        first.push("a").await.unwrap();
        second.push("b").await.unwrap();
        let pushes = rpc.pushes.lock().await;
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].1, 7);
        assert_eq!(pushes[1].1, 8);
    }

    #[tokio::test]
    async fn bind_mirrors_after_the_rpc_succeeds() {
        let rpc = Arc::new(MockSessionRpc::default());
        let session = BackendSession::from_export(export(), rpc.clone());

        session.bind("u2").await.unwrap();
        assert_eq!(session.uid().as_deref(), Some("u2"));
        assert_eq!(rpc.binds.lock().await.len(), 1);
    }
}
