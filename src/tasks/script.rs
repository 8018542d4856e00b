use std::process::{Command, Stdio};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::Mode;
use crate::error::TaskError;
use crate::io::{as_overhead, write_atomic};
use crate::task::{Outcome, Task};

/// Errors that can occur when bundling JavaScript.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The bundler executable could not be started.
    #[error("Couldn't run '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The bundler returned a non-zero exit code.
    #[error("Esbuild execution failed:\n{0}")]
    Esbuild(String),

    /// Failed to parse the bundler diagnostics as UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Writing the bundle failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bundles `<src>/js/main.js` with its static imports into `<out>/js/main.js`
/// through the `esbuild` executable.
#[derive(Debug, Clone)]
pub struct Bundle {
    entry: Utf8PathBuf,
    output: Utf8PathBuf,
    mode: Mode,
    esbuild: String,
}

impl Bundle {
    pub const ENTRY: &'static str = "js/main.js";

    pub fn new(src: &Utf8Path, out: &Utf8Path, mode: Mode, esbuild: impl Into<String>) -> Self {
        Self {
            entry: src.join(Self::ENTRY),
            output: out.join(Self::ENTRY),
            mode,
            esbuild: esbuild.into(),
        }
    }

    pub fn output(&self) -> &Utf8Path {
        &self.output
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.esbuild);
        cmd.arg(self.entry.as_str())
            .arg("--bundle")
            .arg("--format=iife")
            .arg("--log-level=error");

        match self.mode {
            Mode::Production => cmd.arg("--minify"),
            Mode::Development => cmd.arg("--sourcemap=inline"),
        };

        cmd
    }

    fn compile(&self) -> Result<Vec<u8>, ScriptError> {
        let output = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ScriptError::Spawn {
                program: self.esbuild.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8(output.stderr)?;
            return Err(ScriptError::Esbuild(stderr.trim_end().to_string()));
        }

        Ok(output.stdout)
    }
}

impl Task for Bundle {
    fn name(&self) -> &str {
        "js"
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        let s = Instant::now();

        if !self.entry.is_file() {
            tracing::warn!("js: entry {} not found, skipping", self.entry);
            return Ok(Outcome::skipped());
        }

        let data = self.compile()?;
        let changed = write_atomic(&self.output, data).map_err(ScriptError::Io)?;

        tracing::info!("js: bundled {} {}", self.output, as_overhead(s));

        let mut outcome = Outcome::default();
        outcome.record(changed);
        Ok(outcome)
    }

    fn reloads(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn args(bundle: &Bundle) -> Vec<String> {
        bundle
            .command()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_flags_follow_mode() {
        let src = Utf8Path::new("src");
        let out = Utf8Path::new("public");

        let dev = args(&Bundle::new(src, out, Mode::Development, "esbuild"));
        let prod = args(&Bundle::new(src, out, Mode::Production, "esbuild"));

        assert_eq!(dev[0], "src/js/main.js");
        assert!(dev.contains(&"--bundle".to_string()));
        assert!(dev.contains(&"--sourcemap=inline".to_string()));
        assert!(!dev.contains(&"--minify".to_string()));
        assert!(prod.contains(&"--minify".to_string()));
        assert!(!prod.contains(&"--sourcemap=inline".to_string()));
    }

    #[test]
    fn test_missing_entry_is_skipped() {
        let (_guard, root) = project();
        let task = Bundle::new(
            &root.join("src"),
            &root.join("public"),
            Mode::Development,
            "sitepipe-missing-esbuild",
        );

        assert_eq!(task.run().unwrap(), Outcome::skipped());
        assert!(!task.output().exists());
    }

    #[test]
    fn test_missing_bundler_is_js_error() {
        let (_guard, root) = project();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::write(root.join("src/js/main.js"), "console.log(1);").unwrap();

        let task = Bundle::new(
            &root.join("src"),
            &root.join("public"),
            Mode::Production,
            "sitepipe-missing-esbuild",
        );
        let err = task.run().unwrap_err();

        assert_eq!(err.title(), "JS");
        assert!(matches!(err, TaskError::Script(ScriptError::Spawn { .. })));
        assert!(!task.output().exists());
    }
}
