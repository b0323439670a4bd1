//! Filter chains around handler invocation.
//!
//! Filters are user-supplied interceptors. A before filter runs ahead of the
//! handler and may veto the request; an after filter runs once a reply (or
//! error) exists and is a cleanup hook. Both come in two interchangeable
//! forms: a plain boxed async closure, or an object implementing the hook
//! trait. A [`FilterService`] holds one ordered chain of each kind.
//!
//! Chain semantics:
//!
//! * The before chain walks in registration order. Each filter is entered
//!   only after the previous one resolved; an `Err` stops the walk and
//!   becomes the chain result. A filter may stage a reply in
//!   [`RequestContext::resp`] before erroring, and the staged reply travels
//!   with the error to the responder. A filter whose future never resolves
//!   stalls its request indefinitely; the engine does not police this.
//! * The after chain walks most-recently-registered first. Afters always all
//!   run, error or not: an `Err` replaces the error being carried but never
//!   stops the walk. The carried error after the last filter is the chain
//!   result.

use crate::error::DispatchError;
use crate::message::{Message, Response};
use crate::session::SessionRef;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// BoxFuture type alias for async filter closures and handler bodies.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Mutable per-request state threaded through both chains and the handler.
pub struct RequestContext {
    pub msg: Message,
    pub session: SessionRef,
    /// Reply staged by the handler, an error hook, or a filter.
    pub resp: Option<Response>,
    /// Free-form options a before filter may attach for the responder.
    pub opts: Option<Value>,
}

impl RequestContext {
    pub fn new(msg: Message, session: SessionRef) -> Self {
        Self {
            msg,
            session,
            resp: None,
            opts: None,
        }
    }
}

/// Object form of a before filter.
#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, ctx: &mut RequestContext) -> Result<(), DispatchError>;
}

/// Object form of an after filter.
///
/// `err` is the error currently carried by the request, if any. Returning
/// `Ok(())` carries it onward unchanged; returning `Err` replaces it.
#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn after(
        &self,
        err: Option<&DispatchError>,
        ctx: &mut RequestContext,
    ) -> Result<(), DispatchError>;
}

/// Hook invoked when an error escapes the before chain or the handler.
///
/// The hook receives the error, the message, any staged reply, and the
/// session. Returning `Ok(resp)` recovers the request with that reply;
/// returning `Err` keeps the request failed with the returned error.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        err: DispatchError,
        msg: &Message,
        resp: Option<Response>,
        session: &SessionRef,
    ) -> Result<Response, DispatchError>;
}

/// Plain-closure form of a before filter.
pub type BeforeFn = Arc<
    dyn for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<(), DispatchError>>
        + Send
        + Sync,
>;

/// Plain-closure form of an after filter.
pub type AfterFn = Arc<
    dyn for<'a> Fn(
            Option<&'a DispatchError>,
            &'a mut RequestContext,
        ) -> BoxFuture<'a, Result<(), DispatchError>>
        + Send
        + Sync,
>;

/// A before filter in either of its two forms.
#[derive(Clone)]
pub enum BeforeFilter {
    Plain(BeforeFn),
    Hook(Arc<dyn BeforeHook>),
}

impl BeforeFilter {
    pub fn plain<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<(), DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        BeforeFilter::Plain(Arc::new(f))
    }

    pub fn hook(hook: Arc<dyn BeforeHook>) -> Self {
        BeforeFilter::Hook(hook)
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<(), DispatchError> {
        match self {
            BeforeFilter::Plain(f) => f(ctx).await,
            BeforeFilter::Hook(h) => h.before(ctx).await,
        }
    }
}

/// An after filter in either of its two forms.
#[derive(Clone)]
pub enum AfterFilter {
    Plain(AfterFn),
    Hook(Arc<dyn AfterHook>),
}

impl AfterFilter {
    pub fn plain<F>(f: F) -> Self
    where
        F: for<'a> Fn(
                Option<&'a DispatchError>,
                &'a mut RequestContext,
            ) -> BoxFuture<'a, Result<(), DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        AfterFilter::Plain(Arc::new(f))
    }

    pub fn hook(hook: Arc<dyn AfterHook>) -> Self {
        AfterFilter::Hook(hook)
    }

    async fn call(
        &self,
        err: Option<&DispatchError>,
        ctx: &mut RequestContext,
    ) -> Result<(), DispatchError> {
        match self {
            AfterFilter::Plain(f) => f(err, ctx).await,
            AfterFilter::Hook(h) => h.after(err, ctx).await,
        }
    }
}

/// Ordered before and after chains.
///
/// Registration is open until the owning server starts; the server then
/// takes the service behind an `Arc` and the chains are never mutated again.
#[derive(Default)]
pub struct FilterService {
    befores: Vec<BeforeFilter>,
    afters: Vec<AfterFilter>,
}

impl FilterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a service from configuration lists, preserving the
    /// registration-order semantics of `add_before` and `add_after`.
    pub fn from_lists(befores: Vec<BeforeFilter>, afters: Vec<AfterFilter>) -> Self {
        let mut service = Self::new();
        for filter in befores {
            service.add_before(filter);
        }
        for filter in afters {
            service.add_after(filter);
        }
        service
    }

    /// Appends a before filter; befores run in registration order.
    pub fn add_before(&mut self, filter: BeforeFilter) {
        self.befores.push(filter);
    }

    /// Prepends an after filter; the most recently registered after runs
    /// first.
    pub fn add_after(&mut self, filter: AfterFilter) {
        self.afters.insert(0, filter);
    }

    pub fn before_count(&self) -> usize {
        self.befores.len()
    }

    pub fn after_count(&self) -> usize {
        self.afters.len()
    }

    /// Walks the before chain. The first `Err` short-circuits the walk.
    pub async fn run_before(&self, ctx: &mut RequestContext) -> Result<(), DispatchError> {
        for filter in &self.befores {
            filter.call(ctx).await?;
        }
        Ok(())
    }

    /// Walks the after chain, carrying `err` through every filter.
    ///
    /// Afters are cleanup handlers: all of them run regardless of errors.
    /// Returns the error carried out of the last filter.
    pub async fn run_after(
        &self,
        mut err: Option<DispatchError>,
        ctx: &mut RequestContext,
    ) -> Option<DispatchError> {
        for filter in &self.afters {
            if let Err(e) = filter.call(err.as_ref(), ctx).await {
                err = Some(e);
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FrontendSession, SessionRef};
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx() -> RequestContext {
        let session: SessionRef = FrontendSession::new(1, "connector-1", None);
        RequestContext::new(Message::new("area.player.login", json!({})), session)
    }

    fn recording_before(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> BeforeFilter {
        BeforeFilter::plain(move |_ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    fn recording_after(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> AfterFilter {
        AfterFilter::plain(move |_err, _ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn befores_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = FilterService::new();
        service.add_before(recording_before(log.clone(), "first"));
        service.add_before(recording_before(log.clone(), "second"));

        service.run_before(&mut ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn before_error_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = FilterService::new();
        service.add_before(BeforeFilter::plain(|_ctx| {
            Box::pin(async { Err(DispatchError::custom("denied")) })
        }));
        service.add_before(recording_before(log.clone(), "unreached"));

        let err = service.run_before(&mut ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "denied");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn afters_run_most_recent_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = FilterService::new();
        service.add_after(recording_after(log.clone(), "older"));
        service.add_after(recording_after(log.clone(), "newer"));

        let err = service.run_after(None, &mut ctx()).await;
        assert!(err.is_none());
        assert_eq!(*log.lock().unwrap(), vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn after_error_does_not_stop_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = FilterService::new();
        service.add_after(recording_after(log.clone(), "last"));
        service.add_after(AfterFilter::plain(|_err, _ctx| {
            Box::pin(async { Err(DispatchError::custom("cleanup failed")) })
        }));

        let err = service.run_after(None, &mut ctx()).await.unwrap();
        assert_eq!(err.to_string(), "cleanup failed");
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[tokio::test]
    async fn afters_see_the_carried_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut service = FilterService::new();
        service.add_after(AfterFilter::plain(move |err, _ctx| {
            let seen = seen_clone.clone();
            let msg = err.map(|e| e.to_string());
            Box::pin(async move {
                seen.lock().unwrap().push(msg);
                Ok(())
            })
        }));

        service
            .run_after(Some(DispatchError::custom("boom")), &mut ctx())
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![Some("boom".to_string())]);
    }

    #[tokio::test]
    async fn hook_and_plain_forms_interleave() {
        struct Stamp(Arc<Mutex<Vec<&'static str>>>);

        #[async_trait]
        impl BeforeHook for Stamp {
            async fn before(&self, _ctx: &mut RequestContext) -> Result<(), DispatchError> {
                self.0.lock().unwrap().push("hook");
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut service = FilterService::new();
        service.add_before(recording_before(log.clone(), "plain"));
        service.add_before(BeforeFilter::hook(Arc::new(Stamp(log.clone()))));

        service.run_before(&mut ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["plain", "hook"]);
    }
}
