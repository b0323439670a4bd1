//! RPC facade traits at the boundary of the dispatch core.
//!
//! The transport itself (connection management, wire format, peer discovery)
//! lives outside this crate. The dispatch engine only needs two seams: a way
//! to forward a message to a peer server of a given type, and a way for a
//! backend to push session mutations back to the originating frontend.

use crate::error::RpcError;
use crate::message::{Message, Response};
use crate::session::{SessionExport, SessionId, SessionRef, Settings};
use async_trait::async_trait;
use serde_json::Value;

/// Cross-process message forwarding, indexed by peer server type.
#[async_trait]
pub trait SysRpc: Send + Sync {
    /// Forwards a client message to a peer server of `server_type` and
    /// awaits its reply.
    ///
    /// `session` is the local handle for the transport's routing decisions;
    /// `export` is the plain-data snapshot actually sent to the peer.
    async fn forward_message(
        &self,
        server_type: &str,
        session: &SessionRef,
        msg: &Message,
        export: SessionExport,
    ) -> Result<Response, RpcError>;
}

/// Push-back channel from a backend to the frontend owning a session.
///
/// Each call atomically overwrites the named keys on the authoritative
/// session. Concurrent pushes of the same key from different processes are
/// last-writer-wins; no transactionality is promised.
#[async_trait]
pub trait SessionRpc: Send + Sync {
    async fn push(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        key: &str,
        value: Value,
    ) -> Result<(), RpcError>;

    async fn push_all(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        settings: Settings,
    ) -> Result<(), RpcError>;

    async fn bind(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        uid: &str,
    ) -> Result<(), RpcError>;

    async fn unbind(
        &self,
        frontend_id: &str,
        session_id: SessionId,
        uid: &str,
    ) -> Result<(), RpcError>;
}
