use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{ArchiveError, TaskError};
use crate::io::{as_overhead, glob_files, temp_file_in};
use crate::task::{Outcome, Task};

/// Packages the output tree into a single zip file.
#[derive(Debug, Clone)]
pub struct Archive {
    out: Utf8PathBuf,
    target: Utf8PathBuf,
}

impl Archive {
    pub fn new(out: impl Into<Utf8PathBuf>, target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            out: out.into(),
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }
}

impl Task for Archive {
    fn name(&self) -> &str {
        "zip"
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        let s = Instant::now();

        if self.target.exists() {
            fs::remove_file(&self.target).map_err(ArchiveError::Remove)?;
        }

        let files = glob_files(&self.out, "**/*").map_err(ArchiveError::Glob)?;
        let count = files.len();

        let dir = match self.target.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let temp = temp_file_in(dir, ".zip").map_err(ArchiveError::Io)?;

        write_zip(&self.out, &files, temp.as_file())?;
        temp.persist(&self.target).map_err(|e| ArchiveError::Io(e.error))?;

        tracing::info!("zip: {} entries into {} {}", count, self.target, as_overhead(s));

        Ok(Outcome {
            written: 1,
            unchanged: 0,
        })
    }
}

/// Entries are added in sorted order with a fixed timestamp, so the same
/// tree always produces the same bytes.
fn write_zip(base: &Utf8Path, files: &[Utf8PathBuf], dest: &File) -> Result<(), ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(BufWriter::new(dest));

    for file in files {
        let relative = file.strip_prefix(base).unwrap_or(file);
        let entry = relative
            .components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(entry, options)?;
        zip.write_all(&fs::read(file)?)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}
