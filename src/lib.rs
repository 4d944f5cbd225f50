//! # querylog
//!
//! Per-request SQL debug logging for a small async HTTP/1.1 framework.
//!
//! With debug mode on, every HTTP request and console command writes one block to
//! the log listing the statements it executed, bindings substituted and timings
//! prefixed, under a summary of the route action (or command exit code), the
//! statement count and the total runtime. With debug mode off nothing is
//! registered and nothing is captured.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use querylog::{Method, Response, Router, StatusCode};
//! use querylog::config::Config;
//! use querylog::context::Context;
//! use querylog::database::{Binding, QueryLog};
//! use querylog::events::Dispatcher;
//! use querylog::kernel::Kernel;
//! use querylog::query_log::QueryLogSubscriber;
//! use querylog::server::Server;
//! use querylog::sink::TracingSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let query_log = Arc::new(QueryLog::new());
//!     let events = Arc::new(Dispatcher::new());
//!
//!     Arc::new(QueryLogSubscriber::new(&config, query_log.clone(), Arc::new(TracingSink)))
//!         .subscribe(&events);
//!
//!     let mut router = Router::new();
//!     router.action(Method::Get, "/users/:id", "UserController@show", |ctx: Context| async move {
//!         let id: i64 = ctx.params().get("id").and_then(|id| id.parse().ok()).unwrap_or(0);
//!         if let Some(db) = ctx.db() {
//!             db.run("select * from users where id = ?", vec![Binding::from(id)], || ());
//!         }
//!         Response::new(StatusCode::Ok)
//!     });
//!
//!     let kernel = Arc::new(Kernel::new(router, query_log, events));
//!     Server::bind("127.0.0.1:8080").await?.serve(kernel).await?;
//!     Ok(())
//! }
//! ```

// ── Framework ─────────────────────────────────────────────────────────────────
pub mod config;
pub mod console;
pub mod context;
pub mod database;
pub mod events;
pub mod http;
pub mod kernel;
pub mod router;
pub mod server;

// ── Query debug log ───────────────────────────────────────────────────────────
pub mod query_log;
pub mod sink;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Method, Request, Response, StatusCode};
pub use query_log::QueryLogSubscriber;
pub use router::Router;
pub use server::{Server, ServerError};
