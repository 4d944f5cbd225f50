//! Database layer — query capture for debug logging.
//!
//! The framework does not ship a driver; applications execute statements through
//! their driver of choice and route the call through a [`Connection`], which times
//! it and records a [`QueryRecord`] into the shared [`QueryLog`] while capture is
//! enabled for the connection's unit of work.
//!
//! Capture is off by default and is switched on per [`UnitId`] through the
//! [`QueryCapture`] trait, so concurrent requests never see each other's
//! statements.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use chrono::{DateTime, NaiveDateTime, TimeZone};
use tracing::trace;

use crate::events::UnitId;

/// A positional value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl From<bool> for Binding {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! int_binding {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Binding {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

int_binding!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Binding {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Binding {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Binding {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Binding {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for Binding {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

/// Zoned timestamps bind as their wall-clock time in their own zone.
impl<Tz: TimeZone> From<DateTime<Tz>> for Binding {
    fn from(value: DateTime<Tz>) -> Self {
        Self::DateTime(value.naive_local())
    }
}

impl<T: Into<Binding>> From<Option<T>> for Binding {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One executed statement as captured by the query log.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    /// SQL text with `?` positional placeholders.
    pub sql: String,
    pub bindings: Vec<Binding>,
    /// Elapsed time in milliseconds.
    pub time: f64,
}

impl QueryRecord {
    pub fn new(sql: impl Into<String>, bindings: Vec<Binding>, time: f64) -> Self {
        Self {
            sql: sql.into(),
            bindings,
            time,
        }
    }
}

/// Source of captured statements, switched on and off per unit of work.
///
/// Implementations must never fail: an unavailable backend simply reports no
/// records.
pub trait QueryCapture: Send + Sync {
    /// Starts recording statements executed on behalf of `unit`.
    fn enable(&self, unit: UnitId);

    /// Stops recording for `unit` and discards anything captured.
    fn disable(&self, unit: UnitId);

    /// Returns `true` while statements for `unit` are being recorded.
    fn is_enabled(&self, unit: UnitId) -> bool;

    /// Takes every record captured for `unit`, in execution order, and stops
    /// recording for it.
    fn drain(&self, unit: UnitId) -> Vec<QueryRecord>;

    /// Discards records captured for `unit` without changing whether it records.
    fn flush(&self, unit: UnitId);
}

/// In-memory [`QueryCapture`] implementation shared by every [`Connection`].
#[derive(Default)]
pub struct QueryLog {
    slots: Mutex<HashMap<UnitId, Vec<QueryRecord>>>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection whose statements are attributed to `unit`.
    pub fn connection(self: &Arc<Self>, unit: UnitId) -> Connection {
        Connection {
            unit,
            log: Arc::clone(self),
        }
    }

    /// Appends `record` to the slot of `unit` if capture is enabled for it.
    ///
    /// Returns `true` when the record was kept.
    pub fn record(&self, unit: UnitId, record: QueryRecord) -> bool {
        match self.slots().get_mut(&unit) {
            Some(slot) => {
                trace!(unit = %unit, sql = %record.sql, time_ms = record.time, "query captured");
                slot.push(record);
                true
            }
            None => false,
        }
    }

    /// Number of units currently capturing.
    pub fn active_units(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<UnitId, Vec<QueryRecord>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl QueryCapture for QueryLog {
    fn enable(&self, unit: UnitId) {
        self.slots().entry(unit).or_default();
    }

    fn disable(&self, unit: UnitId) {
        self.slots().remove(&unit);
    }

    fn is_enabled(&self, unit: UnitId) -> bool {
        self.slots().contains_key(&unit)
    }

    fn drain(&self, unit: UnitId) -> Vec<QueryRecord> {
        self.slots().remove(&unit).unwrap_or_default()
    }

    fn flush(&self, unit: UnitId) {
        if let Some(slot) = self.slots().get_mut(&unit) {
            slot.clear();
        }
    }
}

impl fmt::Debug for QueryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryLog")
            .field("active_units", &self.active_units())
            .finish()
    }
}

/// A database handle bound to one unit of work.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use querylog::database::{Binding, QueryCapture, QueryLog};
/// use querylog::events::UnitId;
///
/// let log = Arc::new(QueryLog::new());
/// let unit = UnitId::next();
/// log.enable(unit);
///
/// let db = log.connection(unit);
/// let rows = db.run("select * from users where id = ?", vec![Binding::from(5)], || vec!["alice"]);
/// assert_eq!(rows, vec!["alice"]);
///
/// let records = log.drain(unit);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].sql, "select * from users where id = ?");
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    unit: UnitId,
    log: Arc<QueryLog>,
}

impl Connection {
    /// Returns the unit of work this connection records for.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Runs `execute` (the actual driver call), timing it and recording the
    /// statement. The driver's result is returned untouched.
    ///
    /// The recorded time is rounded to two decimal places of a millisecond.
    pub fn run<T>(
        &self,
        sql: impl Into<String>,
        bindings: Vec<Binding>,
        execute: impl FnOnce() -> T,
    ) -> T {
        let start = Instant::now();
        let result = execute();
        let time = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
        self.log_query(sql, bindings, time);
        result
    }

    /// Records a statement that was timed elsewhere. `time` is in milliseconds.
    pub fn log_query(&self, sql: impl Into<String>, bindings: Vec<Binding>, time: f64) {
        self.log
            .record(self.unit, QueryRecord::new(sql, bindings, time));
    }
}
