use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use console::style;

use crate::engine::TaskExecution;

/// Build diagnostics and performance metrics.
///
/// Returned by every graph run; maps task names to their execution metrics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Total number of files written by tasks that succeeded.
    pub fn written(&self) -> usize {
        self.execution_times
            .values()
            .filter_map(|t| t.outcome)
            .map(|o| o.written)
            .sum()
    }

    /// Wall time between the first task start and the last task end.
    pub fn elapsed(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub(crate) fn log(&self) {
        for line in self.to_string().lines() {
            tracing::debug!("{line}");
        }
        tracing::info!(
            tasks = self.execution_times.len(),
            written = self.written(),
            "finished in {:?}",
            self.elapsed()
        );
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut rows: Vec<_> = self.execution_times.iter().collect();
        rows.sort_by_key(|(_, t)| t.start);

        for (name, t) in rows {
            let status = match t.outcome {
                Some(o) => style(format!("{} written", o.written)).green(),
                None => style("failed".to_string()).red(),
            };
            writeln!(f, "{name:<16} {:>6}ms  {status}", t.duration.as_millis())?;
        }

        Ok(())
    }
}
