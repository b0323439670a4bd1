//! Recording fakes for the RPC seams.
//!
//! Used by this crate's own tests and handy for host applications testing
//! their filters and handlers without a live transport.

use crate::error::RpcError;
use crate::message::{Message, Response};
use crate::rpc::{SessionRpc, SysRpc};
use crate::session::{SessionExport, SessionId, SessionRef, SessionStore, Settings};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// One recorded forward, in call order.
#[derive(Debug, Clone)]
pub struct ForwardCall {
    pub server_type: String,
    pub route: String,
    pub body: Value,
    pub export: SessionExport,
}

/// A [`SysRpc`] that records every forward and replies with a canned result.
pub struct MockSysRpc {
    pub calls: Mutex<Vec<ForwardCall>>,
    reply: Result<Response, RpcError>,
}

impl Default for MockSysRpc {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Ok(json!({ "status": "ok" })),
        }
    }
}

impl MockSysRpc {
    pub fn with_reply(reply: Response) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Ok(reply),
        }
    }

    pub fn with_error(err: RpcError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Err(err),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl SysRpc for MockSysRpc {
    async fn forward_message(
        &self,
        server_type: &str,
        _session: &SessionRef,
        msg: &Message,
        export: SessionExport,
    ) -> Result<Response, RpcError> {
        self.calls.lock().await.push(ForwardCall {
            server_type: server_type.to_string(),
            route: msg.route.clone(),
            body: msg.body.clone(),
            export,
        });
        self.reply.clone()
    }
}

/// A [`SessionStore`] that records every write-through.
#[derive(Default)]
pub struct MockSessionStore {
    pub saves: Mutex<Vec<(SessionId, String, Value)>>,
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn save(&self, session_id: SessionId, key: &str, value: &Value) -> anyhow::Result<()> {
        self.saves
            .lock()
            .await
            .push((session_id, key.to_string(), value.clone()));
        Ok(())
    }
}

/// A [`SessionRpc`] that records pushes and bind traffic.
#[derive(Default)]
pub struct MockSessionRpc {
    pub pushes: Mutex<Vec<(String, SessionId, String, Value)>>,
    pub push_alls: Mutex<Vec<(String, SessionId, Settings)>>,
    pub binds: Mutex<Vec<(String, SessionId, String)>>,
    pub unbinds: Mutex<Vec<(String, SessionId, String)>>,
}

#[async_trait]
impl SessionRpc for MockSessionRpc {
    async fn push(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        key: &str,
        value: Value,
    ) -> Result<(), RpcError> {
        self.pushes.lock().await.push((
            frontend_id.to_string(),
            session_id,
            key.to_string(),
            value,
        ));
        Ok(())
    }

    async fn push_all(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        settings: Settings,
    ) -> Result<(), RpcError> {
        self.push_alls
            .lock()
            .await
            .push((frontend_id.to_string(), session_id, settings));
        Ok(())
    }

    async fn bind(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        uid: &str,
    ) -> Result<(), RpcError> {
        self.binds
            .lock()
            .await
            .push((frontend_id.to_string(), session_id, uid.to_string()));
        Ok(())
    }

    async fn unbind(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        uid: &str,
    ) -> Result<(), RpcError> {
        self.unbinds
            .lock()
            .await
            .push((frontend_id.to_string(), session_id, uid.to_string()));
        Ok(())
    }
}
