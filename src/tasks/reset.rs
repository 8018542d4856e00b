use camino::Utf8PathBuf;

use crate::error::TaskError;
use crate::task::{Outcome, Task};

/// Deletes and recreates the output directory.
#[derive(Debug, Clone)]
pub struct Reset {
    out: Utf8PathBuf,
}

impl Reset {
    pub fn new(out: impl Into<Utf8PathBuf>) -> Self {
        Self { out: out.into() }
    }
}

impl Task for Reset {
    fn name(&self) -> &str {
        "reset"
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        crate::io::reset(&self.out)?;
        Ok(Outcome::default())
    }

    fn fatal(&self) -> bool {
        true
    }
}
