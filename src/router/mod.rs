//! Routes: method + path pattern + the action that answers them.
//!
//! Patterns are matched segment by segment. Empty segments are ignored, so
//! trailing slashes do not matter.
//!
//! | Pattern      | Matches                  | Captures                      |
//! |--------------|--------------------------|-------------------------------|
//! | `/users`     | `/users`, `/users/`      |                               |
//! | `/users/:id` | `/users/42`              | `id = "42"`                   |
//! | `/files/*`   | `/files/docs/readme.txt` | `wildcard = "/docs/readme.txt"` |
//!
//! Each route records its [`RouteAction`]: a controller reference when added
//! through [`Router::action`], otherwise [`RouteAction::Closure`]. The first
//! registered route that matches wins.

use std::{fmt, pin::Pin, sync::Arc};

use crate::{
    Method, Request, Response,
    context::{Context, Parameters},
};

pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Implemented for every `Fn(Context) -> impl Future<Output = Response>` that can
/// be shared across tasks.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(self(ctx))
    }
}

/// What a route dispatches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// A named reference, conventionally `Controller@method`.
    Named(String),
    /// An anonymous closure.
    Closure,
}

impl RouteAction {
    /// Label used in logs: the reference itself, or `"Closure"`.
    pub fn label(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Closure => "Closure",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Trailing `*`: swallows the rest of the path.
    Rest,
}

#[derive(Debug, Clone)]
struct Pattern(Vec<Segment>);

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| match part {
                "*" => Segment::Rest,
                _ => match part.strip_prefix(':') {
                    Some(name) => Segment::Param(name.to_owned()),
                    None => Segment::Literal(part.to_owned()),
                },
            })
            .collect();
        Self(segments)
    }

    fn matches(&self, path: &str) -> Option<Parameters> {
        let mut parts = path.split('/').filter(|part| !part.is_empty());
        let mut params = Parameters::new();

        for segment in &self.0 {
            match segment {
                Segment::Rest => {
                    let rest: String = parts.by_ref().map(|part| format!("/{part}")).collect();
                    params.insert("wildcard".to_owned(), rest);
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.next()? != literal {
                        return None;
                    }
                }
                Segment::Param(name) => params.insert(name.clone(), parts.next()?.to_owned()),
            }
        }

        parts.next().is_none().then_some(params)
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    action: RouteAction,
    handler: Handler,
}

/// A route that matched a request, with the parameters it captured.
#[derive(Clone)]
pub struct MatchedRoute {
    pub action: RouteAction,
    pub params: Parameters,
    pub handler: Handler,
}

impl fmt::Debug for MatchedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedRoute")
            .field("action", &self.action)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered route table.
///
/// # Examples
///
/// ```rust,no_run
/// use querylog::{Method, Router, Response, StatusCode};
/// use querylog::context::Context;
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::Ok) });
///
/// router.action(Method::Get, "/users/:id", "UserController@show", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a closure route for `GET path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Get, path, RouteAction::Closure, handler);
    }

    /// Adds a closure route for `POST path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Post, path, RouteAction::Closure, handler);
    }

    /// Adds a route reported under `name`, e.g. `"UserController@show"`.
    pub fn action(
        &mut self,
        method: Method,
        path: &str,
        name: impl Into<String>,
        handler: impl IntoHandler,
    ) {
        self.add(method, path, RouteAction::Named(name.into()), handler);
    }

    fn add(&mut self, method: Method, path: &str, action: RouteAction, handler: impl IntoHandler) {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            action,
            handler: Arc::new(move |ctx| handler.call(ctx)),
        });
    }

    /// First route whose method and pattern both match `request`.
    pub fn resolve(&self, request: &Request) -> Option<MatchedRoute> {
        self.routes
            .iter()
            .filter(|route| &route.method == request.method())
            .find_map(|route| {
                let params = route.pattern.matches(request.path())?;
                Some(MatchedRoute {
                    action: route.action.clone(),
                    params,
                    handler: Arc::clone(&route.handler),
                })
            })
    }
}
