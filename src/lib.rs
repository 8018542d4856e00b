#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod alert;
pub mod engine;
mod error;
mod io;
mod pipeline;
mod task;
pub mod tasks;

use camino::{Utf8Path, Utf8PathBuf};

pub use crate::error::*;
pub use crate::io::{Hash32, tree_digest};
pub use crate::pipeline::{Tasks, build, deploy_zip, dev};
pub use crate::task::{Outcome, Task};

/// Controls compression, minification, prefixing and source maps in every
/// task. Chosen once at startup and passed to each task on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Fast builds with source maps, no compression.
    #[default]
    Development,
    /// Compressed images, prefixed stylesheets, minified scripts.
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        self == Mode::Production
    }
}

/// Where the pipeline reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Project root, canonicalized.
    pub root: Utf8PathBuf,
    /// Source tree, `<root>/src`.
    pub src: Utf8PathBuf,
    /// Output tree, `<root>/public`.
    pub out: Utf8PathBuf,
    /// Basename of the root, used to name the archive.
    pub name: String,
}

impl Layout {
    pub const SRC: &'static str = "src";
    pub const OUT: &'static str = "public";

    /// Resolve the layout for a project rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Utf8Path>) -> Result<Self, SitepipeError> {
        let root = root.as_ref();
        let root = root
            .canonicalize_utf8()
            .map_err(|e| SitepipeError::Root(root.to_string(), e))?;

        let name = root.file_name().unwrap_or("site").to_string();

        Ok(Self {
            src: root.join(Self::SRC),
            out: root.join(Self::OUT),
            name,
            root,
        })
    }

    /// `<root>/<name>.zip`
    pub fn archive(&self) -> Utf8PathBuf {
        self.root.join(format!("{}.zip", self.name))
    }
}

/// Everything a pipeline needs to know, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub layout: Layout,
    /// HTTP port of the development server.
    pub port: u16,
    /// Name or path of the `esbuild` executable.
    pub esbuild: String,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 3000;

    pub fn new(layout: Layout, mode: Mode) -> Self {
        Self {
            mode,
            layout,
            port: Self::DEFAULT_PORT,
            esbuild: String::from("esbuild"),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_esbuild(mut self, esbuild: impl Into<String>) -> Self {
        self.esbuild = esbuild.into();
        self
    }
}
