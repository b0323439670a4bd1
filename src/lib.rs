//! # Citadel Dispatch - Request-Processing Core
//!
//! The per-request dispatch engine of the Citadel multi-process game server
//! mesh. A Citadel cluster runs a fleet of cooperating processes (connector
//! frontends terminating client connections, typed backends servicing
//! forwarded requests) linked by a transparent RPC layer. This crate is the
//! engine inside every one of those processes: it parses logical routes,
//! runs filter chains around user handlers, decides between local handling
//! and cross-process forwarding, and schedules cron-driven invocations.
//!
//! ## Design Philosophy
//!
//! The engine contains **no game logic** and **no transport**. Handlers,
//! filters, and cron jobs are user code registered by the host before start;
//! the RPC layer is a pair of trait seams ([`SysRpc`], [`SessionRpc`]) the
//! host implements. The engine only orchestrates.
//!
//! ## Request Flow
//!
//! 1. A message arrives carrying a `serverType.handler.method` route
//! 2. The route is parsed into a [`RouteRecord`]; malformed routes fail fast
//! 3. Global before filters run in registration order, each able to veto
//! 4. Routes naming another server type are forwarded through [`SysRpc`];
//!    local routes run per-server befores, the handler, per-server afters
//! 5. The reply is sealed exactly once and returned to the caller
//! 6. Global after filters run fire-and-forget after the reply is sealed
//!
//! ## Components
//!
//! * **Route parser** - [`RouteRecord::parse`], total and side-effect free
//! * **Filter service** - ordered before/after chains with short-circuit
//!   and cleanup semantics ([`filter`])
//! * **Handler service** - the `handler -> method` registry for this
//!   process's server type ([`handler`])
//! * **Cron scheduler** - config-driven, time-triggered invocations of
//!   parameterless jobs ([`cron`])
//! * **Session proxies** - authoritative frontend sessions and per-request
//!   backend snapshots ([`session`])
//! * **Dispatch server** - the lifecycle state machine orchestrating all of
//!   the above ([`DispatchServer`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use citadel_dispatch::{
//!     DispatchConfig, DispatchServer, HandlerSet, Message, ServerContext,
//! };
//! use citadel_dispatch::cron::CronJobSet;
//! use citadel_dispatch::session::FrontendSession;
//! use citadel_dispatch::testing::MockSysRpc;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let mut handlers = HandlerSet::new();
//! handlers.register_fn("player", "login", |msg, _session| {
//!     let name = msg.body["name"].clone();
//!     Box::pin(async move { Ok(json!({ "welcome": name })) })
//! });
//!
//! let server = DispatchServer::new(
//!     ServerContext::new("area", "area-1"),
//!     DispatchConfig::new(),
//!     handlers,
//!     CronJobSet::new(),
//!     Arc::new(MockSysRpc::default()),
//! );
//! server.start().await?;
//! server.after_start().await?;
//!
//! let session = FrontendSession::new(1, "connector-1", None);
//! let reply = server
//!     .global_handle(
//!         Message::new("area.player.login", json!({ "name": "kit" })),
//!         session,
//!     )
//!     .await?;
//! assert_eq!(reply, json!({ "welcome": "kit" }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! One request's before chain, handler, and after chain run sequentially on
//! its own task; each filter is entered only after the previous one
//! resolved. Nothing is promised across concurrent requests. Filter chains
//! and the handler registry are frozen at `start`; cron state mutates only
//! under its own lock.

pub use config::{DispatchConfig, ServerContext};
pub use cron::{CronCommand, CronEntry, CronId, CronJob, CronJobSet};
pub use error::{CronError, DispatchError, RpcError};
pub use filter::{
    AfterFilter, AfterHook, BeforeFilter, BeforeHook, BoxFuture, ErrorHandler, FilterService,
    RequestContext,
};
pub use handler::{Handler, HandlerService, HandlerSet};
pub use message::{Message, Response, RouteRecord};
pub use rpc::{SessionRpc, SysRpc};
pub use server::{DispatchServer, ServerState};
pub use session::{
    BackendSession, BackendSessionFactory, FrontendSession, Session, SessionExport, SessionId,
    SessionRef, SessionRegistry, SessionStore,
};

pub mod config;
pub mod cron;
pub mod error;
pub mod filter;
pub mod handler;
pub mod logging;
pub mod message;
pub mod rpc;
pub mod server;
pub mod session;
pub mod testing;
