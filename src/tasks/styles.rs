use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;

use crate::Mode;
use crate::error::TaskError;
use crate::io::{as_overhead, write_atomic};
use crate::task::{Outcome, Task};

/// Browser support targets for vendor prefixing in production.
pub const BROWSERS: &[&str] = &["last 3 versions"];

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The browserslist query could not be resolved.
    #[error("Invalid browser targets: {0}")]
    Targets(String),

    /// Vendor prefixing failed on the compiled output.
    #[error("Prefixing error: {0}")]
    Prefix(String),
}

/// Compiles a single SCSS entry point into a compressed CSS file.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    name: String,
    entry: Utf8PathBuf,
    output: Utf8PathBuf,
    mode: Mode,
}

impl Stylesheet {
    /// `<src>/scss/<stem>.scss` → `<out>/css/<stem><suffix>.css`
    pub fn new(stem: &str, suffix: &str, src: &Utf8Path, out: &Utf8Path, mode: Mode) -> Self {
        Self {
            name: format!("scss:{stem}"),
            entry: src.join("scss").join(format!("{stem}.scss")),
            output: out.join("css").join(format!("{stem}{suffix}.css")),
            mode,
        }
    }

    pub fn output(&self) -> &Utf8Path {
        &self.output
    }
}

impl Task for Stylesheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        let s = Instant::now();

        if !self.entry.is_file() {
            tracing::warn!("{}: entry {} not found, skipping", self.name, self.entry);
            return Ok(Outcome::skipped());
        }

        let css = compile(&self.entry, self.mode)?;

        // Only reached on success, a broken stylesheet never touches the
        // previous output.
        let changed = write_atomic(&self.output, css).map_err(StyleError::Io)?;

        tracing::info!("{}: compiled {} {}", self.name, self.output, as_overhead(s));

        let mut outcome = Outcome::default();
        outcome.record(changed);
        Ok(outcome)
    }

    fn reloads(&self) -> bool {
        true
    }
}

/// Compile `entry` to compressed CSS for the given mode.
pub fn compile(entry: &Utf8Path, mode: Mode) -> Result<String, StyleError> {
    let opts = grass::Options::default().style(grass::OutputStyle::Compressed);
    let css = grass::from_path(entry, &opts)?;

    match mode {
        Mode::Production => prefix(&css),
        Mode::Development => {
            let scss = fs::read_to_string(entry)?;
            Ok(with_source_map(css, entry, &scss))
        }
    }
}

/// Add vendor prefixes for [`BROWSERS`], keeping the output minified.
///
/// Grid layout is not translated to the old `-ms-grid` syntax, so IE 10 and
/// 11 receive unprefixed grid declarations.
pub fn prefix(css: &str) -> Result<String, StyleError> {
    let browsers =
        Browsers::from_browserslist(BROWSERS).map_err(|e| StyleError::Targets(e.to_string()))?;
    let targets = Targets {
        browsers,
        ..Targets::default()
    };

    let mut sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| StyleError::Prefix(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| StyleError::Prefix(e.to_string()))?;

    let result = sheet
        .to_css(PrinterOptions {
            minify: true,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Prefix(e.to_string()))?;

    Ok(result.code)
}

/// Append an inline source map naming the entry stylesheet and embedding its
/// source.
///
/// The map only identifies the source file. Its `mappings` are empty because
/// the compiler does not report positions, so browser tools cannot map a rule
/// back to a line.
fn with_source_map(mut css: String, entry: &Utf8Path, source: &str) -> String {
    let file = entry.with_extension("css");
    let map = serde_json::json!({
        "version": 3,
        "file": file.file_name().unwrap_or("style.css"),
        "sources": [entry.file_name().unwrap_or("style.scss")],
        "sourcesContent": [source],
        "names": [],
        "mappings": "",
    });

    let encoded = utf8_percent_encode(&map.to_string(), NON_ALPHANUMERIC).to_string();

    if !css.is_empty() && !css.ends_with('\n') {
        css.push('\n');
    }
    css.push_str("/*# sourceMappingURL=data:application/json;charset=utf-8,");
    css.push_str(&encoded);
    css.push_str(" */\n");
    css
}
