//! Handler registry and invocation.
//!
//! Handlers are the user code a route ultimately addresses. The host
//! registers them in a [`HandlerSet`] before the server starts; the server
//! materialises the set into a read-only [`HandlerService`] for its own
//! server type. Unknown routes are rejected at this registry boundary.

use crate::error::DispatchError;
use crate::filter::BoxFuture;
use crate::message::{Message, Response, RouteRecord};
use crate::session::SessionRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// User code servicing one route method.
///
/// Handlers receive the message and the session and produce a reply. They
/// are trusted user code: the engine adds no exception barrier beyond the
/// error propagation of the dispatch path itself.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        msg: &Message,
        session: &SessionRef,
    ) -> Result<Response, DispatchError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a Message, &'a SessionRef) -> BoxFuture<'a, Result<Response, DispatchError>>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        msg: &Message,
        session: &SessionRef,
    ) -> Result<Response, DispatchError> {
        (self.0)(msg, session).await
    }
}

type MethodMap = HashMap<String, Arc<dyn Handler>>;

/// Mutable registry of `handler name -> method name -> handler`, populated
/// by the host before start.
#[derive(Default)]
pub struct HandlerSet {
    handlers: HashMap<String, MethodMap>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler object under `handler.method`. Re-registering a
    /// method replaces the previous entry.
    pub fn register(&mut self, handler: &str, method: &str, implementation: Arc<dyn Handler>) {
        self.handlers
            .entry(handler.to_string())
            .or_default()
            .insert(method.to_string(), implementation);
    }

    /// Registers a closure under `handler.method`.
    pub fn register_fn<F>(&mut self, handler: &str, method: &str, f: F)
    where
        F: for<'a> Fn(&'a Message, &'a SessionRef) -> BoxFuture<'a, Result<Response, DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(handler, method, Arc::new(FnHandler(f)));
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn into_inner(self) -> HashMap<String, MethodMap> {
        self.handlers
    }
}

/// Read-only handler registry for one server type.
pub struct HandlerService {
    server_type: String,
    handlers: HashMap<String, MethodMap>,
}

impl HandlerService {
    pub fn new(server_type: &str, set: HandlerSet) -> Self {
        Self {
            server_type: server_type.to_string(),
            handlers: set.into_inner(),
        }
    }

    /// Looks up the route's handler method and invokes it.
    pub async fn handle(
        &self,
        route: &RouteRecord,
        msg: &Message,
        session: &SessionRef,
    ) -> Result<Response, DispatchError> {
        let handler = self
            .handlers
            .get(&route.handler)
            .and_then(|methods| methods.get(&route.method))
            .ok_or_else(|| DispatchError::HandlerNotFound(route.route.clone()))?;
        debug!(
            server_type = %self.server_type,
            route = %route.route,
            "invoking handler"
        );
        handler.handle(msg, session).await
    }

    pub fn contains(&self, handler: &str, method: &str) -> bool {
        self.handlers
            .get(handler)
            .is_some_and(|methods| methods.contains_key(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FrontendSession;
    use serde_json::json;

    fn session() -> SessionRef {
        FrontendSession::new(1, "connector-1", None)
    }

    #[tokio::test]
    async fn invokes_the_registered_method() {
        let mut set = HandlerSet::new();
        set.register_fn("player", "login", |msg, _session| {
            let who = msg.body.get("name").cloned().unwrap_or_default();
            Box::pin(async move { Ok(json!({ "welcome": who })) })
        });
        let service = HandlerService::new("area", set);

        let route = RouteRecord::parse("area.player.login").unwrap();
        let msg = Message::new("area.player.login", json!({ "name": "kit" }));
        let resp = service.handle(&route, &msg, &session()).await.unwrap();
        assert_eq!(resp, json!({ "welcome": "kit" }));
    }

    #[tokio::test]
    async fn missing_method_is_an_error() {
        let mut set = HandlerSet::new();
        set.register_fn("player", "login", |_msg, _session| {
            Box::pin(async { Ok(json!(null)) })
        });
        let service = HandlerService::new("area", set);

        let route = RouteRecord::parse("area.player.logout").unwrap();
        let msg = Message::new("area.player.logout", json!({}));
        let err = service.handle(&route, &msg, &session()).await.unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound(_)));
        assert!(service.contains("player", "login"));
        assert!(!service.contains("player", "logout"));
    }
}
