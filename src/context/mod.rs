//! What a route handler receives: the request, its path parameters and, when
//! the kernel tracks the request, its database connection.

use std::collections::HashMap;

use crate::{Request, database::Connection, events::UnitId};

/// Path parameters captured by the matched route.
#[derive(Default, Debug, Clone)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

#[derive(Debug)]
pub struct Context {
    request: Request,
    params: Parameters,
    db: Option<Connection>,
}

impl Context {
    /// Untracked context with no path parameters.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, Parameters::new())
    }

    pub fn with_params(request: Request, params: Parameters) -> Self {
        Self {
            request,
            params,
            db: None,
        }
    }

    /// Attaches the connection of the request's unit of work.
    #[must_use]
    pub fn with_connection(mut self, db: Connection) -> Self {
        self.db = Some(db);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The request's database connection, when the kernel attached one.
    ///
    /// Statements run through it are captured for the request's query log.
    pub fn db(&self) -> Option<&Connection> {
        self.db.as_ref()
    }

    pub fn unit(&self) -> Option<UnitId> {
        self.db.as_ref().map(Connection::unit)
    }
}
