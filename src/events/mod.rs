//! Lifecycle events and a synchronous publish/subscribe dispatcher.
//!
//! The kernels fire four events around every tracked unit of work:
//!
//! | Event               | Fired by           | When                                   |
//! |---------------------|--------------------|----------------------------------------|
//! | [`RouteMatched`]    | [`Kernel`]         | a route matched, before its handler    |
//! | [`RequestHandled`]  | [`Kernel`]         | the response has been produced         |
//! | [`CommandStarting`] | [`Console`]        | before a command body runs             |
//! | [`CommandFinished`] | [`Console`]        | after the command returned an exit code|
//!
//! Every payload carries the [`UnitId`] of the request or command it belongs to so
//! listeners can keep per-unit state on a multi-threaded host.
//!
//! [`Kernel`]: crate::kernel::Kernel
//! [`Console`]: crate::console::Console

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{Method, router::RouteAction};

/// Correlation key for one tracked unit of work (an HTTP request or a command run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

impl UnitId {
    /// Allocates a process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_UNIT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for UnitId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A route matched the incoming request; its handler is about to run.
#[derive(Debug, Clone)]
pub struct RouteMatched {
    pub unit: UnitId,
    pub method: Method,
    pub path: String,
    pub action: RouteAction,
}

/// The HTTP kernel produced a response for a request.
///
/// `action` is `None` when no route matched.
#[derive(Debug, Clone)]
pub struct RequestHandled {
    pub unit: UnitId,
    pub method: Method,
    /// Absolute URL including the query string, still percent-encoded.
    pub full_url: String,
    pub action: Option<RouteAction>,
    pub status: u16,
}

/// A console command is about to run.
#[derive(Debug, Clone)]
pub struct CommandStarting {
    pub unit: UnitId,
    pub command: String,
}

/// A console command returned.
#[derive(Debug, Clone)]
pub struct CommandFinished {
    pub unit: UnitId,
    pub command: String,
    pub exit_code: i32,
}

/// Handle returned by [`Dispatcher::listen`]; pass it to [`Dispatcher::forget`] to
/// unregister the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    event: TypeId,
    seq: u64,
}

type ErasedListener = Arc<dyn Fn(&dyn Any) + Send + Sync + 'static>;

/// Synchronous, type-keyed event dispatcher.
///
/// Listeners are stored per event type and invoked in registration order on the
/// thread that calls [`dispatch`](Self::dispatch). The registry lock is released
/// before listeners run, so a listener may register or forget listeners itself.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// use querylog::events::{CommandStarting, Dispatcher, UnitId};
///
/// let events = Dispatcher::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// events.listen(move |_: &CommandStarting| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// events.dispatch(&CommandStarting { unit: UnitId::next(), command: "migrate".into() });
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<TypeId, Vec<(u64, ErasedListener)>>>,
    seq: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`.
    pub fn listen<E, F>(&self, handler: F) -> ListenerId
    where
        E: Any,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let event = TypeId::of::<E>();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let erased: ErasedListener = Arc::new(move |payload: &dyn Any| {
            if let Some(event) = payload.downcast_ref::<E>() {
                handler(event);
            }
        });

        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(event)
            .or_default()
            .push((seq, erased));

        ListenerId { event, seq }
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn forget(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(bucket) = listeners.get_mut(&id.event) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(seq, _)| *seq != id.seq);
        bucket.len() < before
    }

    /// Returns `true` if at least one listener is registered for `E`.
    pub fn has_listeners<E: Any>(&self) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|bucket| !bucket.is_empty())
    }

    /// Delivers `event` to every listener registered for its type.
    pub fn dispatch<E: Any>(&self, event: &E) {
        let snapshot: Vec<ErasedListener> = match self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&TypeId::of::<E>())
        {
            Some(bucket) => bucket.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        for listener in snapshot {
            listener(event as &dyn Any);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("Dispatcher")
            .field("event_types", &listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn starting(command: &str) -> CommandStarting {
        CommandStarting {
            unit: UnitId::from(7),
            command: command.to_owned(),
        }
    }

    #[test]
    fn unit_ids_are_unique() {
        let a = UnitId::next();
        let b = UnitId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn unit_id_display() {
        assert_eq!(UnitId::from(42).to_string(), "#42");
    }

    #[test]
    fn dispatch_without_listeners_is_noop() {
        let events = Dispatcher::new();
        events.dispatch(&starting("noop"));
        assert!(!events.has_listeners::<CommandStarting>());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let events = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            events.listen(move |e: &CommandStarting| {
                order.lock().unwrap().push(format!("{tag}:{}", e.command));
            });
        }

        events.dispatch(&starting("migrate"));
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first:migrate".to_owned(), "second:migrate".to_owned()]
        );
    }

    #[test]
    fn listeners_only_see_their_event_type() {
        let events = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        events.listen(move |_: &CommandFinished| *counter.lock().unwrap() += 1);

        events.dispatch(&starting("migrate"));
        assert_eq!(*hits.lock().unwrap(), 0);

        events.dispatch(&CommandFinished {
            unit: UnitId::from(7),
            command: "migrate".into(),
            exit_code: 0,
        });
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn forget_unregisters() {
        let events = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let id = events.listen(move |_: &CommandStarting| *counter.lock().unwrap() += 1);

        assert!(events.has_listeners::<CommandStarting>());
        assert!(events.forget(id));
        assert!(!events.forget(id));
        assert!(!events.has_listeners::<CommandStarting>());

        events.dispatch(&starting("migrate"));
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
