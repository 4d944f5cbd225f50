//! Console kernel — named commands run with lifecycle events around them.
//!
//! Each [`Console::call`] is one tracked unit of work: [`CommandStarting`] is fired
//! before the command body runs and [`CommandFinished`] after it returns its exit
//! code. Commands reach the database through [`CommandContext::db`], which
//! attributes their statements to the run.

use std::{collections::BTreeMap, fmt, sync::Arc};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    database::{Connection, QueryLog},
    events::{CommandFinished, CommandStarting, Dispatcher, UnitId},
};

/// Errors produced by the console kernel.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("command \"{name}\" is not defined")]
    UnknownCommand { name: String },
}

/// What a running command can reach.
#[derive(Debug)]
pub struct CommandContext {
    name: String,
    args: Vec<String>,
    db: Connection,
}

impl CommandContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Database connection whose statements are attributed to this run.
    pub fn db(&self) -> &Connection {
        &self.db
    }
}

type Command = Arc<dyn Fn(&mut CommandContext) -> i32 + Send + Sync + 'static>;

/// Registry and runner for console commands.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use querylog::console::Console;
/// use querylog::database::QueryLog;
/// use querylog::events::Dispatcher;
///
/// let mut console = Console::new(Arc::new(QueryLog::new()), Arc::new(Dispatcher::new()));
/// console.command("greet", |ctx| {
///     println!("hello {}", ctx.args().join(" "));
///     0
/// });
///
/// assert_eq!(console.call("greet", ["world"]).unwrap(), 0);
/// assert!(console.call("missing", Vec::<String>::new()).is_err());
/// ```
pub struct Console {
    commands: BTreeMap<String, Command>,
    query_log: Arc<QueryLog>,
    events: Arc<Dispatcher>,
}

impl Console {
    pub fn new(query_log: Arc<QueryLog>, events: Arc<Dispatcher>) -> Self {
        Self {
            commands: BTreeMap::new(),
            query_log,
            events,
        }
    }

    /// Registers `command` under `name`, replacing any previous definition.
    pub fn command<F>(&mut self, name: impl Into<String>, command: F)
    where
        F: Fn(&mut CommandContext) -> i32 + Send + Sync + 'static,
    {
        self.commands.insert(name.into(), Arc::new(command));
    }

    /// Names of every registered command, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Runs the command registered as `name` and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::UnknownCommand`] without firing any event when no
    /// command is registered under `name`.
    ///
    /// # Panics
    ///
    /// A panicking command is not caught. [`CommandFinished`] is still fired,
    /// with exit code 1, before the panic continues.
    pub fn call<I, S>(&self, name: &str, args: I) -> Result<i32, ConsoleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self
            .commands
            .get(name)
            .cloned()
            .ok_or_else(|| ConsoleError::UnknownCommand {
                name: name.to_owned(),
            })?;

        let unit = UnitId::next();
        debug!(unit = %unit, command = name, "command starting");
        self.events.dispatch(&CommandStarting {
            unit,
            command: name.to_owned(),
        });
        let mut finished = FinishedGuard {
            events: &self.events,
            event: Some(CommandFinished {
                unit,
                command: name.to_owned(),
                exit_code: ABORTED,
            }),
        };

        let mut ctx = CommandContext {
            name: name.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
            db: self.query_log.connection(unit),
        };
        let exit_code = command(&mut ctx);

        info!(unit = %unit, command = name, exit_code, "command finished");
        finished.fire(exit_code);
        Ok(exit_code)
    }
}

/// Exit code reported for a command that panicked.
const ABORTED: i32 = 1;

/// Fires [`CommandFinished`] exactly once, with [`ABORTED`] if the command unwinds.
struct FinishedGuard<'a> {
    events: &'a Dispatcher,
    event: Option<CommandFinished>,
}

impl FinishedGuard<'_> {
    fn fire(&mut self, exit_code: i32) {
        if let Some(mut event) = self.event.take() {
            event.exit_code = exit_code;
            self.events.dispatch(&event);
        }
    }
}

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            warn!(unit = %event.unit, command = %event.command, "command panicked");
            self.events.dispatch(&event);
        }
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{panic::AssertUnwindSafe, sync::Mutex};

    use super::*;

    fn console() -> (Console, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let on_start = Arc::clone(&seen);
        events.listen(move |e: &CommandStarting| {
            on_start.lock().unwrap().push(format!("start {}", e.command));
        });
        let on_finish = Arc::clone(&seen);
        events.listen(move |e: &CommandFinished| {
            on_finish
                .lock()
                .unwrap()
                .push(format!("finish {} {}", e.command, e.exit_code));
        });

        (Console::new(Arc::new(QueryLog::new()), events), seen)
    }

    #[test]
    fn call_fires_events_around_command() {
        let (mut console, seen) = console();
        let trace = Arc::clone(&seen);
        console.command("report", move |ctx| {
            trace
                .lock()
                .unwrap()
                .push(format!("run {}", ctx.args().join(",")));
            3
        });

        assert_eq!(console.call("report", ["a", "b"]).unwrap(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["start report", "run a,b", "finish report 3"]
        );
    }

    #[test]
    fn unknown_command_fires_nothing() {
        let (console, seen) = console();
        let err = console.call("nope", Vec::<String>::new()).unwrap_err();
        assert_eq!(err.to_string(), "command \"nope\" is not defined");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn each_run_is_its_own_unit() {
        let (mut console, _) = console();
        let units = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&units);
        console.command("unit", move |ctx| {
            record.lock().unwrap().push(ctx.db().unit());
            0
        });

        console.call("unit", Vec::<String>::new()).unwrap();
        console.call("unit", Vec::<String>::new()).unwrap();
        let units = units.lock().unwrap();
        assert_ne!(units[0], units[1]);
    }

    #[test]
    fn names_are_sorted() {
        let (mut console, _) = console();
        console.command("b", |_| 0);
        console.command("a", |ctx| i32::from(ctx.name() != "a"));
        assert_eq!(console.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(console.call("a", Vec::<String>::new()).unwrap(), 0);
    }

    #[test]
    fn panicking_command_still_finishes() {
        let (mut console, seen) = console();
        console.command("explode", |_| panic!("command exploded"));

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            console.call("explode", Vec::<String>::new())
        }));
        assert!(outcome.is_err());
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["start explode", "finish explode 1"]
        );
    }
}
