//! Text rendering for captured statements and per-unit summaries.
//!
//! The interpolated SQL is meant for a human reading a log. Bound values are
//! inserted verbatim, without quoting or escaping, so the result is not a safe
//! reconstruction of the executed statement and must never be run.

use crate::database::{Binding, QueryRecord};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Significant digits kept when printing a millisecond value.
const MILLIS_PRECISION: i32 = 14;

/// Renders a millisecond value the way it appears in log lines (`1.23`, `0`).
///
/// At most 14 significant digits are printed and trailing zeros are dropped, so
/// summing `1.1` and `2.2` shows `3.3` rather than the binary float noise.
pub fn format_millis(ms: f64) -> String {
    if ms == 0.0 {
        return "0".to_owned();
    }
    if !ms.is_finite() {
        return ms.to_string();
    }

    let magnitude = ms.abs().log10().floor() as i32 + 1;
    let decimals = (MILLIS_PRECISION - magnitude).max(0) as usize;
    let fixed = format!("{ms:.decimals$}");
    if !fixed.contains('.') {
        return fixed;
    }
    fixed.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// Renders one binding for substitution.
///
/// Date/times use `YYYY-MM-DD HH:MM:SS`, booleans become `0`/`1`, `NULL` becomes
/// an empty string and everything else uses its `Display` form.
pub fn prepare_binding(binding: &Binding) -> String {
    match binding {
        Binding::Null => String::new(),
        Binding::Bool(value) => u8::from(*value).to_string(),
        Binding::Int(value) => value.to_string(),
        Binding::Float(value) => value.to_string(),
        Binding::Text(value) => value.clone(),
        Binding::DateTime(value) => value.format(DATETIME_FORMAT).to_string(),
    }
}

pub fn prepare_bindings(bindings: &[Binding]) -> Vec<String> {
    bindings.iter().map(prepare_binding).collect()
}

/// Replaces each `?` in `sql`, left to right, with the next prepared binding.
///
/// Placeholders without a binding are left as `?`; extra bindings are ignored.
/// Every other character is copied unchanged; `%` needs no escaping because no
/// format string is ever built from the SQL text.
///
/// ```
/// use querylog::database::Binding;
/// use querylog::query_log::format::interpolate;
///
/// let sql = interpolate("select '100%' where id = ?", &[Binding::Int(7)]);
/// assert_eq!(sql, "select '100%' where id = 7");
/// ```
pub fn interpolate(sql: &str, bindings: &[Binding]) -> String {
    let prepared = prepare_bindings(bindings);
    let extra: usize = prepared.iter().map(String::len).sum();
    let mut values = prepared.iter();
    let mut out = String::with_capacity(sql.len() + extra);

    for ch in sql.chars() {
        if ch != '?' {
            out.push(ch);
            continue;
        }
        match values.next() {
            Some(value) => out.push_str(value),
            None => out.push('?'),
        }
    }

    out
}

/// Renders one statement as a log line: `[<time> ms] <sql>\n`.
pub fn format_entry(record: &QueryRecord) -> String {
    format!(
        "[{} ms] {}\n",
        format_millis(record.time),
        interpolate(&record.sql, &record.bindings)
    )
}

/// Header describing the unit of work a block of statements belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Request {
        method: String,
        /// Already percent-decoded.
        url: String,
        /// Empty when no route matched.
        action: String,
    },
    Command {
        command: String,
        exit_code: i32,
    },
}

impl Summary {
    /// Renders the header followed by `body`.
    pub fn render(&self, count: usize, runtime: f64, body: &str) -> String {
        let runtime = format_millis(runtime);
        match self {
            Self::Request {
                method,
                url,
                action,
            } => format!(
                "\n============ {method} : {url} ============\n\n\
                 ACTION: {action}\n\
                 SQL COUNT: {count}\n\
                 SQL RUNTIME: {runtime} ms\n\n\
                 {body}"
            ),
            Self::Command { command, exit_code } => format!(
                "\n============ {command} ============\n\n\
                 EXIT CODE: {exit_code}\n\
                 SQL COUNT: {count}\n\
                 SQL RUNTIME: {runtime} ms\n\n\
                 {body}"
            ),
        }
    }
}
