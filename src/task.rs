use std::fmt::Debug;

use crate::error::TaskError;

/// What a task did. Only used for reporting and for deciding whether a
/// browser reload is worth sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Files written into the output tree.
    pub written: usize,
    /// Files inspected but left untouched because their content was already
    /// up to date.
    pub unchanged: usize,
}

impl Outcome {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, changed: bool) {
        if changed {
            self.written += 1;
        } else {
            self.unchanged += 1;
        }
    }

    pub fn changed(&self) -> bool {
        self.written > 0
    }
}

/// A named, idempotent unit of build work over a filesystem subtree.
///
/// Tasks capture their mode and paths at construction time and hold no other
/// state, so running one twice against the same sources reproduces the same
/// output.
pub trait Task: Send + Sync {
    /// Unique name, e.g. `copy:img` or `scss:style`.
    fn name(&self) -> &str;

    /// Execute the task.
    fn run(&self) -> Result<Outcome, TaskError>;

    /// Whether a failure of this task must abort the run under every
    /// failure policy.
    fn fatal(&self) -> bool {
        false
    }

    /// Whether connected browsers should reload after a successful run.
    fn reloads(&self) -> bool {
        false
    }
}

impl Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name())
    }
}
