//! Session abstractions as seen by the dispatch engine.
//!
//! A frontend session is the authoritative, mutable per-connection state
//! living on the connector process that accepted the client. A backend
//! session is a per-request snapshot of that state handed to a backend
//! handler, with explicit push-back RPCs for the few mutations a backend is
//! allowed to make. The engine itself treats both uniformly through the
//! [`Session`] trait: it reads identity, threads the session through filter
//! chains, and exports it for forwarding.

pub mod backend;
pub mod frontend;

pub use backend::{BackendSession, BackendSessionFactory};
pub use frontend::{FrontendSession, SessionRegistry, SessionStore};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of a session, unique within its frontend process.
pub type SessionId = u64;

/// Flat key-value settings bag attached to a session.
pub type Settings = HashMap<String, Value>;

/// Plain-data view of a session, suitable for forwarding across processes.
///
/// This is the wire shape handed to the RPC layer when a request is
/// forwarded and the shape a backend rebuilds its snapshot from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub id: SessionId,
    #[serde(rename = "frontendId")]
    pub frontend_id: String,
    pub uid: Option<String>,
    pub settings: Settings,
}

/// Common surface of frontend and backend sessions.
///
/// Methods take `&self`; both implementations are internally synchronized so
/// a session handle can be cloned into spawned tasks (the global after
/// chain runs on one).
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    /// Identifier of the frontend process that owns the connection.
    fn frontend_id(&self) -> String;

    /// The bound user id, if any.
    fn uid(&self) -> Option<String>;

    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    /// Plain-data view for forwarding, see [`SessionExport`].
    fn export(&self) -> SessionExport;
}

/// Shared session handle threaded through filters and handlers.
pub type SessionRef = Arc<dyn Session>;
