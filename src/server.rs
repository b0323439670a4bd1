//! The dispatch server: lifecycle state machine and request orchestration.
//!
//! One dispatch server lives inside every server process. It owns the two
//! filter services (global and per-server), the handler service for its own
//! server type, and the cron scheduler. Requests enter through
//! [`global_handle`](DispatchServer::global_handle) (the full dispatch path,
//! deciding between local handling and cross-process forwarding) or
//! [`handle`](DispatchServer::handle) (the already-routed path the RPC layer
//! uses to deliver a forwarded message).
//!
//! # Lifecycle
//!
//! `Inited -> Started -> Stopped`, no resurrection. `start` builds the
//! engine from configuration and registers crons without arming them;
//! `after_start` arms the cron clock once the rest of the process is ready;
//! `stop` flips the state and leaves in-flight work to the surrounding
//! collaborators.

use crate::config::{DispatchConfig, ServerContext};
use crate::cron::{load_cron_file, CronCommand, CronEntry, CronId, CronJobSet, CronScheduler};
use crate::error::{CronError, DispatchError};
use crate::filter::{ErrorHandler, FilterService, RequestContext};
use crate::handler::{HandlerService, HandlerSet};
use crate::message::{Message, Response, RouteRecord};
use crate::rpc::SysRpc;
use crate::session::SessionRef;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a dispatch server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Inited,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Pending,
    Completed,
    Failed,
}

/// At-most-once latch for a request's reply.
///
/// Every outcome branch of the dispatch path funnels through [`seal`];
/// a second seal attempt is a programming error, logged and dropped so the
/// first reply stands.
#[derive(Debug)]
struct ReplyGuard {
    state: ReplyState,
}

impl ReplyGuard {
    fn new() -> Self {
        Self {
            state: ReplyState::Pending,
        }
    }

    /// Seals the reply, turning the carried error and staged response into
    /// the caller-facing result. Returns `None` when already sealed.
    fn seal(
        &mut self,
        err: Option<DispatchError>,
        resp: Option<Response>,
    ) -> Option<Result<Response, DispatchError>> {
        if self.state != ReplyState::Pending {
            error!("reply already sealed, duplicate dropped");
            return None;
        }
        match err {
            Some(e) => {
                self.state = ReplyState::Failed;
                Some(Err(e))
            }
            None => {
                self.state = ReplyState::Completed;
                Some(Ok(resp.unwrap_or(Value::Null)))
            }
        }
    }
}

/// Everything handed to `new` that `start` consumes.
struct PendingParts {
    config: DispatchConfig,
    handlers: HandlerSet,
    cron_jobs: CronJobSet,
    cron_rx: mpsc::UnboundedReceiver<CronCommand>,
}

/// The started server's request machinery, immutable once built.
struct Engine {
    global_filters: FilterService,
    server_filters: FilterService,
    handlers: HandlerService,
    global_error_handler: Option<Arc<dyn ErrorHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    cron: Arc<CronScheduler>,
}

impl Engine {
    /// The local-handle path: per-server befores, the handler, per-server
    /// afters. The per-server error handler hooks errors escaping the
    /// befores or the handler; afters always run and their final error is
    /// the path's error.
    async fn local_handle(
        &self,
        route: &RouteRecord,
        ctx: &mut RequestContext,
    ) -> Option<DispatchError> {
        let mut err = match self.server_filters.run_before(ctx).await {
            Ok(()) => match self.handlers.handle(route, &ctx.msg, &ctx.session).await {
                Ok(resp) => {
                    ctx.resp = Some(resp);
                    None
                }
                Err(e) => Some(e),
            },
            Err(e) => Some(e),
        };
        if let Some(e) = err.take() {
            err = self.run_error_hook(self.error_handler.as_ref(), e, ctx).await;
        }
        self.server_filters.run_after(err, ctx).await
    }

    async fn run_error_hook(
        &self,
        hook: Option<&Arc<dyn ErrorHandler>>,
        err: DispatchError,
        ctx: &mut RequestContext,
    ) -> Option<DispatchError> {
        match hook {
            Some(handler) => {
                match handler
                    .handle(err, &ctx.msg, ctx.resp.take(), &ctx.session)
                    .await
                {
                    Ok(resp) => {
                        ctx.resp = Some(resp);
                        None
                    }
                    Err(e) => Some(e),
                }
            }
            None => {
                error!(route = %ctx.msg.route, "request failed: {err}");
                Some(err)
            }
        }
    }

    /// Runs the global after chain on its own task, once the reply is
    /// sealed. Errors are logged and never reach the caller.
    fn spawn_global_afters(self: Arc<Self>, err: Option<DispatchError>, mut ctx: RequestContext) {
        if self.global_filters.after_count() == 0 {
            return;
        }
        tokio::spawn(async move {
            if let Some(e) = self.global_filters.run_after(err, &mut ctx).await {
                error!(route = %ctx.msg.route, "global after filter error: {e}");
            }
        });
    }
}

/// Per-process dispatch server.
pub struct DispatchServer {
    ctx: ServerContext,
    sysrpc: Arc<dyn SysRpc>,
    state: RwLock<ServerState>,
    engine: RwLock<Option<Arc<Engine>>>,
    pending: Mutex<Option<PendingParts>>,
    cron_tx: mpsc::UnboundedSender<CronCommand>,
}

impl DispatchServer {
    /// Creates a server in the `Inited` state.
    ///
    /// Nothing is wired up until [`start`](DispatchServer::start): the
    /// configuration, handler set, and cron job set are held aside untouched.
    pub fn new(
        ctx: ServerContext,
        config: DispatchConfig,
        handlers: HandlerSet,
        cron_jobs: CronJobSet,
        sysrpc: Arc<dyn SysRpc>,
    ) -> Self {
        let (cron_tx, cron_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            sysrpc,
            state: RwLock::new(ServerState::Inited),
            engine: RwLock::new(None),
            pending: Mutex::new(Some(PendingParts {
                config,
                handlers,
                cron_jobs,
                cron_rx,
            })),
            cron_tx,
        }
    }

    pub fn server_type(&self) -> &str {
        &self.ctx.server_type
    }

    pub fn server_id(&self) -> &str {
        &self.ctx.server_id
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Sender half of the cron command channel, for the host's event bus.
    pub fn cron_sender(&self) -> mpsc::UnboundedSender<CronCommand> {
        self.cron_tx.clone()
    }

    /// Builds the engine and moves to `Started`.
    ///
    /// Filter services are constructed from the configuration lists, the
    /// handler registry is materialised, and cron entries are loaded from
    /// the configuration file (then the inline list) and registered. No
    /// cron fires yet; arming happens in [`after_start`](Self::after_start).
    ///
    /// Calling `start` on a server past `Inited` is a no-op.
    pub async fn start(&self) -> Result<(), CronError> {
        let mut state = self.state.write().await;
        if *state != ServerState::Inited {
            debug!(state = ?*state, "start ignored");
            return Ok(());
        }
        let Some(parts) = self.pending.lock().await.take() else {
            return Ok(());
        };
        let PendingParts {
            config,
            handlers,
            cron_jobs,
            cron_rx,
        } = parts;

        let global_filters = FilterService::from_lists(config.global_before, config.global_after);
        let server_filters = FilterService::from_lists(config.before, config.after);
        let handler_service = HandlerService::new(&self.ctx.server_type, handlers);

        let cron = Arc::new(
            CronScheduler::new(
                self.ctx.server_type.clone(),
                self.ctx.server_id.clone(),
                cron_jobs,
            )
            .await?,
        );
        let file_entries = load_cron_file(&self.ctx.base, &self.ctx.env, &self.ctx.server_type)?;
        cron.add_crons(file_entries).await;
        cron.add_crons(config.crons).await;
        cron.clone().drive_commands(cron_rx);

        *self.engine.write().await = Some(Arc::new(Engine {
            global_filters,
            server_filters,
            handlers: handler_service,
            global_error_handler: config.global_error_handler,
            error_handler: config.error_handler,
            cron,
        }));
        *state = ServerState::Started;
        info!(
            "🚀 Dispatch server started: {} ({})",
            self.ctx.server_id, self.ctx.server_type
        );
        Ok(())
    }

    /// Arms the cron clock.
    ///
    /// Kept separate from [`start`](Self::start) so no cron fires before the
    /// rest of the process is ready to take requests.
    pub async fn after_start(&self) -> Result<(), CronError> {
        let Some(engine) = self.engine_if_started().await else {
            warn!("after_start ignored, server not started");
            return Ok(());
        };
        engine.cron.start_clock().await?;
        info!("🕒 Crons armed on {}", self.ctx.server_id);
        Ok(())
    }

    /// Moves to `Stopped`. In-flight requests and armed crons are not
    /// cancelled here; the surrounding collaborators own teardown.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        *state = ServerState::Stopped;
        info!("🛑 Dispatch server stopped: {}", self.ctx.server_id);
    }

    /// The already-routed path: the caller (normally the RPC layer
    /// delivering a forwarded message) vouches that this process is the
    /// route's target. Global filters do not run; the per-server layer and
    /// the handler do.
    pub async fn handle(
        &self,
        msg: Message,
        session: SessionRef,
    ) -> Result<Response, DispatchError> {
        let Some(engine) = self.engine_if_started().await else {
            return Err(DispatchError::NotStarted);
        };
        let Some(route) = RouteRecord::parse(&msg.route) else {
            return Err(DispatchError::UnknownRoute(msg.route));
        };
        let mut ctx = RequestContext::new(msg, session);
        let err = engine.local_handle(&route, &mut ctx).await;
        match err {
            Some(e) => Err(e),
            None => Ok(ctx.resp.take().unwrap_or(Value::Null)),
        }
    }

    /// The full dispatch path.
    ///
    /// Global befores wrap the request; the route decides between the local
    /// path and a forward to a peer server of the route's type. The reply is
    /// sealed exactly once, then global afters run fire-and-forget: their
    /// errors are logged and never surface to the caller, unlike per-server
    /// after errors which do.
    pub async fn global_handle(
        &self,
        msg: Message,
        session: SessionRef,
    ) -> Result<Response, DispatchError> {
        let Some(engine) = self.engine_if_started().await else {
            return Err(DispatchError::NotStarted);
        };
        let Some(route) = RouteRecord::parse(&msg.route) else {
            return Err(DispatchError::UnknownRoute(msg.route));
        };
        let mut ctx = RequestContext::new(msg, session);
        let mut guard = ReplyGuard::new();

        let err = match engine.global_filters.run_before(&mut ctx).await {
            Err(e) => {
                engine
                    .run_error_hook(engine.global_error_handler.as_ref(), e, &mut ctx)
                    .await
            }
            Ok(()) => {
                if route.server_type != self.ctx.server_type {
                    self.forward(&route, &mut ctx).await
                } else {
                    engine.local_handle(&route, &mut ctx).await
                }
            }
        };

        let result = match guard.seal(err.clone(), ctx.resp.clone()) {
            Some(result) => result,
            // A fresh guard always accepts its first seal.
            None => Err(DispatchError::custom("duplicate reply")),
        };
        engine.spawn_global_afters(err, ctx);
        result
    }

    /// Admits and schedules cron entries at runtime.
    pub async fn add_crons(&self, entries: Vec<CronEntry>) {
        match self.engine_if_started().await {
            Some(engine) => engine.cron.add_crons(entries).await,
            None => warn!("add_crons ignored, server not started"),
        }
    }

    /// Cancels scheduled crons by id.
    pub async fn remove_crons(&self, ids: Vec<CronId>) {
        match self.engine_if_started().await {
            Some(engine) => engine.cron.remove_crons(&ids).await,
            None => warn!("remove_crons ignored, server not started"),
        }
    }

    /// Number of crons currently scheduled.
    pub async fn cron_job_count(&self) -> usize {
        match self.engine_if_started().await {
            Some(engine) => engine.cron.job_count().await,
            None => 0,
        }
    }

    /// Whether a cron with this id is currently scheduled.
    pub async fn has_cron(&self, id: &CronId) -> bool {
        match self.engine_if_started().await {
            Some(engine) => engine.cron.contains(id).await,
            None => false,
        }
    }

    async fn forward(
        &self,
        route: &RouteRecord,
        ctx: &mut RequestContext,
    ) -> Option<DispatchError> {
        debug!(route = %route.route, peer = %route.server_type, "forwarding request");
        let export = ctx.session.export();
        match self
            .sysrpc
            .forward_message(&route.server_type, &ctx.session, &ctx.msg, export)
            .await
        {
            Ok(resp) => {
                ctx.resp = Some(resp);
                None
            }
            Err(e) => {
                error!(route = %route.route, peer = %route.server_type, "forward failed: {e}");
                Some(DispatchError::Forward {
                    server_type: route.server_type.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn engine_if_started(&self) -> Option<Arc<Engine>> {
        if *self.state.read().await != ServerState::Started {
            return None;
        }
        self.engine.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_guard_seals_at_most_once() {
        let mut guard = ReplyGuard::new();
        let first = guard.seal(None, Some(json!({ "ok": true }))).unwrap();
        assert_eq!(first.unwrap(), json!({ "ok": true }));
        assert!(guard.seal(None, Some(json!({ "ok": false }))).is_none());
    }

    #[test]
    fn reply_guard_prefers_the_error() {
        let mut guard = ReplyGuard::new();
        let sealed = guard
            .seal(Some(DispatchError::custom("boom")), Some(json!(1)))
            .unwrap();
        assert!(sealed.is_err());
        assert!(guard.seal(None, None).is_none());
    }

    #[test]
    fn reply_guard_defaults_to_null_reply() {
        let mut guard = ReplyGuard::new();
        let sealed = guard.seal(None, None).unwrap();
        assert_eq!(sealed.unwrap(), Value::Null);
    }
}
