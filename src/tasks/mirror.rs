use std::fmt::{self, Display, Formatter};
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use thiserror::Error;

use crate::Mode;
use crate::error::TaskError;
use crate::io::{as_overhead, glob_files, write_atomic};
use crate::task::{Outcome, Task};
use crate::tasks::image::{ImageError, compress};

/// Pattern of mirrored files, relative to the mirrored directory.
const FILES: &str = "**/*.*";

/// Failure of a single mirrored file.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Errors of the mirror step. Per-file failures don't stop the batch; they
/// are collected and reported together once every file has been processed.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Couldn't list files.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error(transparent)]
    Files(FailedFiles),
}

#[derive(Debug)]
pub struct FailedFiles(pub Vec<(Utf8PathBuf, FileError)>);

impl Display for FailedFiles {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s) failed to copy:", self.0.len())?;
        for (path, err) in &self.0 {
            write!(f, "\n  {path}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FailedFiles {}

/// How files pass from source to output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Byte for byte.
    Verbatim,
    /// Through the image compressors.
    Compress,
}

/// Copies every file of a source subtree into the matching output subtree,
/// preserving relative structure.
#[derive(Debug, Clone)]
pub struct Mirror {
    name: String,
    from: Utf8PathBuf,
    to: Utf8PathBuf,
    transfer: Transfer,
}

impl Mirror {
    /// Mirror `<src>/<dir>` into `<out>/<dir>` verbatim.
    pub fn new(dir: &str, src: &Utf8Path, out: &Utf8Path) -> Self {
        Self {
            name: format!("copy:{dir}"),
            from: src.join(dir),
            to: out.join(dir),
            transfer: Transfer::Verbatim,
        }
    }

    /// Mirror `<src>/<dir>` into `<out>/<dir>`, compressing in production.
    pub fn images(dir: &str, src: &Utf8Path, out: &Utf8Path, mode: Mode) -> Self {
        let transfer = if mode.is_production() {
            Transfer::Compress
        } else {
            Transfer::Verbatim
        };

        Self {
            transfer,
            ..Self::new(dir, src, out)
        }
    }

    pub fn transfer(&self) -> Transfer {
        self.transfer
    }

    fn copy_file(&self, path: &Utf8Path) -> Result<bool, FileError> {
        let relative = path.strip_prefix(&self.from).unwrap_or(path);
        let target = self.to.join(relative);

        let data = fs::read(path)?;
        let data = match self.transfer {
            Transfer::Verbatim => data,
            Transfer::Compress => compress(path, &data)?,
        };

        Ok(write_atomic(&target, data)?)
    }
}

impl Task for Mirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        let s = Instant::now();

        if !self.from.is_dir() {
            tracing::debug!("{} does not exist, nothing to copy", self.from);
            return Ok(Outcome::skipped());
        }

        let files = glob_files(&self.from, FILES).map_err(MirrorError::Glob)?;

        let results: Vec<_> = files
            .into_par_iter()
            .map(|path| {
                let result = self.copy_file(&path);
                (path, result)
            })
            .collect();

        let mut outcome = Outcome::default();
        let mut failed = Vec::new();

        for (path, result) in results {
            match result {
                Ok(changed) => outcome.record(changed),
                Err(err) => {
                    tracing::warn!("{}: couldn't copy {path}: {err}", self.name);
                    failed.push((path, err));
                }
            }
        }

        if !failed.is_empty() {
            return Err(MirrorError::Files(FailedFiles(failed)).into());
        }

        tracing::info!(
            "{}: {} written, {} unchanged {}",
            self.name,
            outcome.written,
            outcome.unchanged,
            as_overhead(s)
        );

        Ok(outcome)
    }
}
