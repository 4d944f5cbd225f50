//! SQL query debug log.
//!
//! [`QueryLogSubscriber`] listens to the framework lifecycle and, for every HTTP
//! request or console command, writes one block listing each SQL statement the
//! unit of work executed (bindings substituted, execution time prefixed) under a
//! summary header:
//!
//! ```text
//!
//! ============ GET : http://localhost/users/5 ============
//!
//! ACTION: UserController@show
//! SQL COUNT: 1
//! SQL RUNTIME: 0.42 ms
//!
//! [0.42 ms] select * from users where id = 5
//! ```
//!
//! The subscriber only exists for debugging. Built from a [`Config`] whose
//! `debug` flag is off, it registers nothing and every handler returns at once.
//!
//! Statements are not captured here; the database layer records them through
//! [`QueryCapture`] and the subscriber only switches capture on, drains it and
//! formats what it gets. See [`format`] for how bindings are rendered.

pub mod buffer;
pub mod format;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, trace};

use crate::{
    config::Config,
    database::QueryCapture,
    events::{
        CommandFinished, CommandStarting, Dispatcher, ListenerId, RequestHandled, RouteMatched,
        UnitId,
    },
    http::url_decode,
    sink::LogSink,
};

pub use buffer::LogBuffer;
pub use format::Summary;

/// Writes the SQL executed by each request or command to a [`LogSink`].
///
/// One [`LogBuffer`] is kept per in-flight [`UnitId`], so a single subscriber can
/// serve overlapping requests on a multi-threaded server.
///
/// Lifecycle per unit: a starting event (`RouteMatched`, `CommandStarting`) resets the
/// unit's buffer, clears stale records and enables capture; the finishing event
/// (`RequestHandled`, `CommandFinished`) drains the records, emits the block once and
/// drops the buffer.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use querylog::config::Config;
/// use querylog::database::QueryLog;
/// use querylog::events::{CommandFinished, CommandStarting, Dispatcher, UnitId};
/// use querylog::query_log::QueryLogSubscriber;
/// use querylog::sink::MemorySink;
///
/// let log = Arc::new(QueryLog::new());
/// let sink = Arc::new(MemorySink::new());
/// let events = Dispatcher::new();
///
/// let subscriber = Arc::new(QueryLogSubscriber::new(
///     &Config { debug: true },
///     log.clone(),
///     sink.clone(),
/// ));
/// subscriber.subscribe(&events);
///
/// let unit = UnitId::next();
/// events.dispatch(&CommandStarting { unit, command: "users:count".into() });
/// log.connection(unit).log_query("select count(*) from users", vec![], 0.5);
/// events.dispatch(&CommandFinished { unit, command: "users:count".into(), exit_code: 0 });
///
/// let messages = sink.messages();
/// assert!(messages[0].contains("SQL COUNT: 1"));
/// assert!(messages[0].ends_with("[0.5 ms] select count(*) from users\n"));
/// ```
pub struct QueryLogSubscriber {
    enabled: bool,
    capture: Arc<dyn QueryCapture>,
    sink: Arc<dyn LogSink>,
    buffers: Mutex<HashMap<UnitId, LogBuffer>>,
}

impl QueryLogSubscriber {
    /// Builds a subscriber. The debug flag is read here and never again.
    pub fn new(config: &Config, capture: Arc<dyn QueryCapture>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            enabled: config.debug,
            capture,
            sink,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers the four lifecycle handlers on `events`.
    ///
    /// Returns the listener handles, or an empty list when disabled.
    pub fn subscribe(self: &Arc<Self>, events: &Dispatcher) -> Vec<ListenerId> {
        if !self.enabled {
            debug!("query log disabled; not subscribing");
            return Vec::new();
        }

        let on_route = Arc::clone(self);
        let on_request = Arc::clone(self);
        let on_starting = Arc::clone(self);
        let on_finished = Arc::clone(self);

        vec![
            events.listen(move |e: &RouteMatched| on_route.route_matched(e)),
            events.listen(move |e: &RequestHandled| on_request.request_handled(e)),
            events.listen(move |e: &CommandStarting| on_starting.command_starting(e)),
            events.listen(move |e: &CommandFinished| on_finished.command_finished(e)),
        ]
    }

    pub fn route_matched(&self, event: &RouteMatched) {
        if self.enabled {
            self.prepare(event.unit);
        }
    }

    pub fn request_handled(&self, event: &RequestHandled) {
        if !self.enabled {
            return;
        }
        let summary = Summary::Request {
            method: event.method.to_string(),
            url: url_decode(&event.full_url).into_owned(),
            action: event
                .action
                .as_ref()
                .map(|action| action.label().to_owned())
                .unwrap_or_default(),
        };
        self.record(event.unit, &summary);
    }

    pub fn command_starting(&self, event: &CommandStarting) {
        if self.enabled {
            self.prepare(event.unit);
        }
    }

    pub fn command_finished(&self, event: &CommandFinished) {
        if !self.enabled {
            return;
        }
        let summary = Summary::Command {
            command: event.command.clone(),
            exit_code: event.exit_code,
        };
        self.record(event.unit, &summary);
    }

    /// Number of units started but not yet flushed.
    pub fn in_flight(&self) -> usize {
        self.buffers().len()
    }

    fn prepare(&self, unit: UnitId) {
        self.buffers().insert(unit, LogBuffer::new());
        self.capture.flush(unit);
        self.capture.enable(unit);
        trace!(unit = %unit, "query capture enabled");
    }

    fn record(&self, unit: UnitId, summary: &Summary) {
        let records = self.capture.drain(unit);
        let mut buffer = self.buffers().remove(&unit).unwrap_or_default();
        buffer.extend(&records);

        trace!(unit = %unit, count = buffer.count(), runtime_ms = buffer.runtime(), "flushing query log");
        self.sink.debug(&buffer.finish(summary));
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<UnitId, LogBuffer>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        Method,
        database::{Binding, QueryLog, QueryRecord},
        router::RouteAction,
        sink::MemorySink,
    };

    struct Harness {
        log: Arc<QueryLog>,
        sink: Arc<MemorySink>,
        subscriber: Arc<QueryLogSubscriber>,
    }

    fn harness(debug: bool) -> Harness {
        let log = Arc::new(QueryLog::new());
        let sink = Arc::new(MemorySink::new());
        let subscriber = Arc::new(QueryLogSubscriber::new(
            &Config { debug },
            log.clone(),
            sink.clone(),
        ));
        Harness {
            log,
            sink,
            subscriber,
        }
    }

    fn matched(unit: UnitId, action: RouteAction) -> RouteMatched {
        RouteMatched {
            unit,
            method: Method::Get,
            path: "/search".into(),
            action,
        }
    }

    fn handled(unit: UnitId, url: &str, action: Option<RouteAction>) -> RequestHandled {
        RequestHandled {
            unit,
            method: Method::Get,
            full_url: url.into(),
            action,
            status: 200,
        }
    }

    #[test]
    fn disabled_handlers_do_nothing() {
        let h = harness(false);
        let unit = UnitId::next();

        h.subscriber.route_matched(&matched(unit, RouteAction::Closure));
        assert!(!h.log.is_enabled(unit));

        h.subscriber.request_handled(&handled(unit, "/", None));
        h.subscriber.command_starting(&CommandStarting {
            unit,
            command: "migrate".into(),
        });
        assert!(!h.log.is_enabled(unit));
        h.subscriber.command_finished(&CommandFinished {
            unit,
            command: "migrate".into(),
            exit_code: 0,
        });

        assert!(h.sink.messages().is_empty());
        assert_eq!(h.subscriber.in_flight(), 0);
    }

    #[test]
    fn disabled_subscriber_registers_nothing() {
        let h = harness(false);
        let events = Dispatcher::new();
        assert!(h.subscriber.subscribe(&events).is_empty());
        assert!(!events.has_listeners::<RouteMatched>());
        assert!(!events.has_listeners::<CommandFinished>());
    }

    #[test]
    fn enabled_subscriber_registers_four_listeners() {
        let h = harness(true);
        let events = Dispatcher::new();
        assert_eq!(h.subscriber.subscribe(&events).len(), 4);
        assert!(events.has_listeners::<RouteMatched>());
        assert!(events.has_listeners::<RequestHandled>());
        assert!(events.has_listeners::<CommandStarting>());
        assert!(events.has_listeners::<CommandFinished>());
    }

    #[test]
    fn zero_queries_emit_empty_summary() {
        let h = harness(true);
        let unit = UnitId::next();
        h.subscriber.command_starting(&CommandStarting {
            unit,
            command: "inspire".into(),
        });
        h.subscriber.command_finished(&CommandFinished {
            unit,
            command: "inspire".into(),
            exit_code: 0,
        });

        assert_eq!(
            h.sink.messages(),
            vec![
                "\n============ inspire ============\n\n\
                 EXIT CODE: 0\nSQL COUNT: 0\nSQL RUNTIME: 0 ms\n\n"
            ]
        );
    }

    #[test]
    fn request_block_with_statements() {
        let h = harness(true);
        let unit = UnitId::next();
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();

        h.subscriber
            .route_matched(&matched(unit, RouteAction::Named("SearchController@index".into())));
        let db = h.log.connection(unit);
        db.log_query("SELECT * FROM t WHERE id = ?", vec![Binding::Int(5)], 1.25);
        db.log_query(
            "update t set active = ?, seen_at = ? where id = ?",
            vec![true.into(), at.into(), 5.into()],
            2.0,
        );
        h.subscriber.request_handled(&handled(
            unit,
            "http://localhost/search?q=a%20b",
            Some(RouteAction::Named("SearchController@index".into())),
        ));

        assert_eq!(
            h.sink.messages(),
            vec![
                "\n============ GET : http://localhost/search?q=a b ============\n\n\
                 ACTION: SearchController@index\nSQL COUNT: 2\nSQL RUNTIME: 3.25 ms\n\n\
                 [1.25 ms] SELECT * FROM t WHERE id = 5\n\
                 [2 ms] update t set active = 1, seen_at = 2024-01-02 03:04:05 where id = 5\n"
            ]
        );
        assert_eq!(h.subscriber.in_flight(), 0);
        assert!(!h.log.is_enabled(unit));
    }

    #[test]
    fn runtime_sum_has_no_float_noise() {
        let h = harness(true);
        let unit = UnitId::next();
        h.subscriber.command_starting(&CommandStarting {
            unit,
            command: "report".into(),
        });
        let db = h.log.connection(unit);
        db.log_query("select 1", vec![], 1.1);
        db.log_query("select 2", vec![], 2.2);
        h.subscriber.command_finished(&CommandFinished {
            unit,
            command: "report".into(),
            exit_code: 0,
        });

        assert!(h.sink.messages()[0].contains("\nSQL RUNTIME: 3.3 ms\n\n[1.1 ms] select 1\n[2.2 ms] select 2\n"));
    }

    #[test]
    fn unmatched_request_reports_empty_action() {
        let h = harness(true);
        let unit = UnitId::next();
        h.subscriber
            .request_handled(&handled(unit, "/search?q=a+b", None));

        let messages = h.sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("\n============ GET : /search?q=a b ============\n"));
        assert!(messages[0].contains("\nACTION: \nSQL COUNT: 0\nSQL RUNTIME: 0 ms\n"));
    }

    #[test]
    fn closure_action_reported_as_closure() {
        let h = harness(true);
        let unit = UnitId::next();
        h.subscriber.route_matched(&matched(unit, RouteAction::Closure));
        h.subscriber
            .request_handled(&handled(unit, "/search", Some(RouteAction::Closure)));
        assert!(h.sink.messages()[0].contains("\nACTION: Closure\n"));
    }

    #[test]
    fn consecutive_units_do_not_leak() {
        let h = harness(true);

        let first = UnitId::next();
        h.subscriber.command_starting(&CommandStarting {
            unit: first,
            command: "one".into(),
        });
        h.log.connection(first).log_query("select 1", vec![], 4.0);
        h.subscriber.command_finished(&CommandFinished {
            unit: first,
            command: "one".into(),
            exit_code: 0,
        });

        let second = UnitId::next();
        h.subscriber.command_starting(&CommandStarting {
            unit: second,
            command: "two".into(),
        });
        h.subscriber.command_finished(&CommandFinished {
            unit: second,
            command: "two".into(),
            exit_code: 1,
        });

        let messages = h.sink.messages();
        assert!(messages[0].contains("SQL COUNT: 1\nSQL RUNTIME: 4 ms"));
        assert!(messages[1].contains("EXIT CODE: 1\nSQL COUNT: 0\nSQL RUNTIME: 0 ms\n\n"));
        assert!(!messages[1].contains("select 1"));
    }

    #[test]
    fn restart_discards_stale_records() {
        let h = harness(true);
        let unit = UnitId::next();
        let start = CommandStarting {
            unit,
            command: "sync".into(),
        };

        h.subscriber.command_starting(&start);
        h.log.connection(unit).log_query("select stale", vec![], 1.0);
        h.subscriber.command_starting(&start);
        h.log.connection(unit).log_query("select fresh", vec![], 1.0);
        h.subscriber.command_finished(&CommandFinished {
            unit,
            command: "sync".into(),
            exit_code: 0,
        });

        let message = &h.sink.messages()[0];
        assert!(message.contains("select fresh"));
        assert!(!message.contains("select stale"));
    }

    #[test]
    fn overlapping_units_are_isolated() {
        let h = harness(true);
        let (a, b) = (UnitId::next(), UnitId::next());

        h.subscriber.route_matched(&matched(a, RouteAction::Closure));
        h.subscriber.route_matched(&matched(b, RouteAction::Closure));
        assert_eq!(h.subscriber.in_flight(), 2);

        h.log.connection(a).log_query("select 'a'", vec![], 1.0);
        h.log.connection(b).log_query("select 'b'", vec![], 1.0);

        h.subscriber.request_handled(&handled(b, "/b", Some(RouteAction::Closure)));
        h.subscriber.request_handled(&handled(a, "/a", Some(RouteAction::Closure)));

        let messages = h.sink.messages();
        assert!(messages[0].contains("select 'b'") && !messages[0].contains("select 'a'"));
        assert!(messages[1].contains("select 'a'") && !messages[1].contains("select 'b'"));
    }

    #[test]
    fn uses_injected_capture() {
        struct Canned;

        impl QueryCapture for Canned {
            fn enable(&self, _: UnitId) {}
            fn disable(&self, _: UnitId) {}
            fn is_enabled(&self, _: UnitId) -> bool {
                true
            }
            fn drain(&self, _: UnitId) -> Vec<QueryRecord> {
                vec![QueryRecord::new("select ?", vec![Binding::Null], 0.5)]
            }
            fn flush(&self, _: UnitId) {}
        }

        let sink = Arc::new(MemorySink::new());
        let subscriber = QueryLogSubscriber::new(&Config { debug: true }, Arc::new(Canned), sink.clone());
        subscriber.command_finished(&CommandFinished {
            unit: UnitId::next(),
            command: "canned".into(),
            exit_code: 0,
        });
        assert!(sink.messages()[0].ends_with("[0.5 ms] select \n"));
    }
}
