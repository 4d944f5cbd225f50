//! HTTP kernel — turns a parsed [`Request`] into a [`Response`] and publishes the
//! request lifecycle.
//!
//! For every request the kernel allocates a [`UnitId`], resolves the route, fires
//! [`RouteMatched`] before the handler runs and [`RequestHandled`] once the response
//! exists. Handlers receive a [`Context`] whose [`Connection`] attributes their
//! statements to the request.
//!
//! [`Connection`]: crate::database::Connection

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Request, Response, StatusCode,
    context::Context,
    database::QueryLog,
    events::{Dispatcher, RequestHandled, RouteMatched, UnitId},
    router::{RouteAction, Router},
};

/// Dispatches requests through a [`Router`] while publishing lifecycle events.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use querylog::{Response, Router, StatusCode};
/// use querylog::context::Context;
/// use querylog::database::QueryLog;
/// use querylog::events::Dispatcher;
/// use querylog::kernel::Kernel;
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::Ok) });
///
/// let kernel = Kernel::new(router, Arc::new(QueryLog::new()), Arc::new(Dispatcher::new()));
/// ```
pub struct Kernel {
    router: Router,
    query_log: Arc<QueryLog>,
    events: Arc<Dispatcher>,
}

impl Kernel {
    pub fn new(router: Router, query_log: Arc<QueryLog>, events: Arc<Dispatcher>) -> Self {
        Self {
            router,
            query_log,
            events,
        }
    }

    pub fn events(&self) -> &Arc<Dispatcher> {
        &self.events
    }

    /// Handles one request.
    ///
    /// Unmatched requests get `404 Not Found`; [`RequestHandled`] is fired for them
    /// too, with no action. If the handler panics, or the returned future is
    /// dropped before completing, [`RequestHandled`] still fires with status 500.
    pub async fn handle(&self, request: Request) -> Response {
        let unit = UnitId::next();
        let mut handled = HandledGuard {
            events: &self.events,
            event: Some(RequestHandled {
                unit,
                method: request.method().clone(),
                full_url: request.full_url(),
                action: None,
                status: StatusCode::InternalServerError.as_u16(),
            }),
        };

        let response = match self.router.resolve(&request) {
            Some(matched) => {
                debug!(unit = %unit, action = %matched.action, "route matched");
                self.events.dispatch(&RouteMatched {
                    unit,
                    method: request.method().clone(),
                    path: request.path().to_owned(),
                    action: matched.action.clone(),
                });
                handled.set_action(matched.action);

                let ctx = Context::with_params(request, matched.params)
                    .with_connection(self.query_log.connection(unit));
                (matched.handler)(ctx).await
            }
            None => {
                debug!(unit = %unit, path = %request.path(), "no route matched");
                Response::new(StatusCode::NotFound)
            }
        };

        handled.fire(response.status());
        response
    }
}

/// Fires [`RequestHandled`] exactly once, even when the handler unwinds.
struct HandledGuard<'a> {
    events: &'a Dispatcher,
    event: Option<RequestHandled>,
}

impl HandledGuard<'_> {
    fn set_action(&mut self, action: RouteAction) {
        if let Some(event) = self.event.as_mut() {
            event.action = Some(action);
        }
    }

    fn fire(&mut self, status: StatusCode) {
        if let Some(mut event) = self.event.take() {
            event.status = status.as_u16();
            self.events.dispatch(&event);
        }
    }
}

impl Drop for HandledGuard<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            warn!(unit = %event.unit, url = %event.full_url, "handler did not complete");
            self.events.dispatch(&event);
        }
    }
}
