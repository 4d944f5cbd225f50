//! Query log demo.
//!
//! Run with debug logging for the `querylog` target:
//!
//! ```text
//! APP_DEBUG=true RUST_LOG=querylog=debug cargo run --example query_log
//! curl 'http://127.0.0.1:8080/users/5?tab=posts%20new'
//! ```
//!
//! The console command runs once at startup, so its block appears immediately.

use std::sync::Arc;

use querylog::{
    Method, Response, StatusCode,
    config::Config,
    console::Console,
    context::Context,
    database::{Binding, QueryLog},
    events::Dispatcher,
    kernel::Kernel,
    query_log::QueryLogSubscriber,
    router::Router,
    server::Server,
    sink::TracingSink,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let query_log = Arc::new(QueryLog::new());
    let events = Arc::new(Dispatcher::new());

    let subscriber = Arc::new(QueryLogSubscriber::new(
        &config,
        query_log.clone(),
        Arc::new(TracingSink),
    ));
    subscriber.subscribe(&events);
    if !subscriber.is_enabled() {
        info!("APP_DEBUG is off; no query log will be written");
    }

    let mut console = Console::new(query_log.clone(), events.clone());
    console.command("users:prune", |ctx| {
        ctx.db().run(
            "delete from users where active = ? and last_seen < ?",
            vec![false.into(), chrono::Local::now().into()],
            || (),
        );
        0
    });
    console.call("users:prune", Vec::<String>::new())?;

    let mut router = Router::new();
    router.action(
        Method::Get,
        "/users/:id",
        "UserController@show",
        |ctx: Context| async move {
            let id: i64 = ctx
                .params()
                .get("id")
                .and_then(|id| id.parse().ok())
                .unwrap_or_default();
            let tab = ctx.request().query_param("tab").unwrap_or("profile").to_owned();
            if let Some(db) = ctx.db() {
                db.run("select * from users where id = ? limit 1", vec![Binding::from(id)], || ());
                db.run(
                    "select * from posts where user_id = ? and title like '%rust%' and tab = ?",
                    vec![id.into(), tab.clone().into()],
                    || (),
                );
            }
            Response::new(StatusCode::Ok).body(format!("user {id} ({tab})"))
        },
    );
    router.get("/health", |_ctx: Context| async {
        Response::new(StatusCode::Ok).body("ok")
    });

    let kernel = Arc::new(Kernel::new(router, query_log, events));
    Server::bind("127.0.0.1:8080").await?.serve(kernel).await?;
    Ok(())
}
