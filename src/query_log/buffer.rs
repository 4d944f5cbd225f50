use crate::database::QueryRecord;

use super::format::{Summary, format_entry};

/// Formatted statements of one unit of work and their combined runtime.
///
/// Every pushed record adds its line to the body, its time to the runtime and
/// one to the count, so the three never disagree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogBuffer {
    body: String,
    runtime: f64,
    count: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &QueryRecord) {
        self.body.push_str(&format_entry(record));
        self.runtime += record.time;
        self.count += 1;
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Total elapsed milliseconds of every pushed record.
    pub fn runtime(&self) -> f64 {
        self.runtime
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Consumes the buffer into the final log block.
    pub fn finish(self, summary: &Summary) -> String {
        summary.render(self.count, self.runtime, &self.body)
    }
}

impl<'a> Extend<&'a QueryRecord> for LogBuffer {
    fn extend<I: IntoIterator<Item = &'a QueryRecord>>(&mut self, records: I) {
        for record in records {
            self.push(record);
        }
    }
}
