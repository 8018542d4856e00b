//! HTML assembly: include directives and the image path placeholder.
//!
//! ```html
//! @@include('partials/header.html', { "title": "Home" })
//! <img src="@img/logo.svg">
//! ```
//!
//! Includes resolve relative to the including file and may nest. Inside an
//! included file `@@title` is replaced with the value passed in the
//! directive's JSON object. Finally every `@img/` becomes `./img/`.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::TaskError;
use crate::io::{as_overhead, glob_files, normalize_path, write_atomic};
use crate::task::{Outcome, Task};

const DIRECTIVE: &str = "@@include(";
const MAX_DEPTH: usize = 32;

/// Placeholder for the image base path in source HTML.
pub const IMG_TOKEN: &str = "@img/";
/// What [`IMG_TOKEN`] is rewritten to.
pub const IMG_PATH: &str = "./img/";

#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("Couldn't list HTML files.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("{file}: couldn't read file.\n{source}")]
    Read {
        file: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("{file}: couldn't write output.\n{source}")]
    Write {
        file: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("{file}: malformed include directive: {message}")]
    Directive { file: Utf8PathBuf, message: String },

    #[error("{file}: couldn't include '{target}'.\n{source}")]
    Include {
        file: Utf8PathBuf,
        target: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("{file}: include cycle: {}", .chain.join(" -> "))]
    Cycle { file: Utf8PathBuf, chain: Vec<String> },

    #[error("{file}: includes nested too deeply")]
    Depth { file: Utf8PathBuf },

    #[error(transparent)]
    Pages(FailedPages),
}

/// Pages that could not be assembled or written. The remaining pages of the
/// batch are still written.
#[derive(Debug)]
pub struct FailedPages(pub Vec<HtmlError>);

impl Display for FailedPages {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} page(s) failed:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FailedPages {}

/// Assembles every top-level `*.html` of the source directory into the
/// output root.
#[derive(Debug, Clone)]
pub struct Html {
    src: Utf8PathBuf,
    out: Utf8PathBuf,
}

impl Html {
    pub fn new(src: impl Into<Utf8PathBuf>, out: impl Into<Utf8PathBuf>) -> Self {
        Self {
            src: src.into(),
            out: out.into(),
        }
    }
}

impl Html {
    fn write_page(&self, file: &Utf8Path) -> Result<bool, HtmlError> {
        let text = assemble(file)?;
        let target = self.out.join(file.file_name().unwrap_or("index.html"));

        write_atomic(&target, text).map_err(|source| HtmlError::Write {
            file: file.to_owned(),
            source,
        })
    }
}

impl Task for Html {
    fn name(&self) -> &str {
        "html"
    }

    fn run(&self) -> Result<Outcome, TaskError> {
        let s = Instant::now();
        let mut outcome = Outcome::default();

        let mut failed = Vec::new();

        for file in glob_files(&self.src, "*.html").map_err(HtmlError::Glob)? {
            match self.write_page(&file) {
                Ok(changed) => outcome.record(changed),
                Err(err) => {
                    tracing::warn!("html: {err}");
                    failed.push(err);
                }
            }
        }

        if !failed.is_empty() {
            return Err(HtmlError::Pages(FailedPages(failed)).into());
        }

        tracing::info!("html: {} written {}", outcome.written, as_overhead(s));

        Ok(outcome)
    }

    fn reloads(&self) -> bool {
        true
    }
}

/// Read `file`, expand its includes and rewrite the image placeholder.
pub fn assemble(file: &Utf8Path) -> Result<String, HtmlError> {
    let text = fs::read_to_string(file).map_err(|source| HtmlError::Read {
        file: file.to_owned(),
        source,
    })?;

    let mut stack = vec![normalize_path(file)];
    let text = expand(&text, file, &mut stack)?;

    Ok(rewrite_img(&text))
}

/// Replace every occurrence of [`IMG_TOKEN`], and nothing else.
pub fn rewrite_img(text: &str) -> String {
    text.replace(IMG_TOKEN, IMG_PATH)
}

fn expand(text: &str, file: &Utf8Path, stack: &mut Vec<Utf8PathBuf>) -> Result<String, HtmlError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(DIRECTIVE) {
        out.push_str(&rest[..pos]);
        let args = &rest[pos + DIRECTIVE.len()..];

        let (directive, used) = parse_directive(args).map_err(|message| HtmlError::Directive {
            file: file.to_owned(),
            message,
        })?;
        rest = &args[used..];

        let base = file.parent().unwrap_or(Utf8Path::new(""));
        let target = normalize_path(&base.join(&directive.path));

        if stack.contains(&target) {
            let mut chain: Vec<_> = stack.iter().map(ToString::to_string).collect();
            chain.push(target.to_string());
            return Err(HtmlError::Cycle {
                file: file.to_owned(),
                chain,
            });
        }

        if stack.len() > MAX_DEPTH {
            return Err(HtmlError::Depth {
                file: file.to_owned(),
            });
        }

        let source = fs::read_to_string(&target).map_err(|source| HtmlError::Include {
            file: file.to_owned(),
            target: target.clone(),
            source,
        })?;
        let source = substitute(&source, &directive.context);

        stack.push(target.clone());
        let expanded = expand(&source, &target, stack)?;
        stack.pop();

        out.push_str(&expanded);
    }

    out.push_str(rest);
    Ok(out)
}

/// Replace `@@key` with the matching context value. Longer keys go first so
/// that `@@title` does not clobber `@@titleSuffix`.
fn substitute(text: &str, context: &Map<String, Value>) -> String {
    let mut keys: Vec<_> = context.keys().collect();
    keys.sort_by_key(|key| std::cmp::Reverse(key.len()));

    let mut text = text.to_string();
    for key in keys {
        let value = match &context[key.as_str()] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text = text.replace(&format!("@@{key}"), &value);
    }
    text
}

#[derive(Debug, PartialEq)]
struct Directive {
    path: String,
    context: Map<String, Value>,
}

/// Parse the arguments following `@@include(`, returning the directive and
/// the number of bytes consumed, including the closing parenthesis.
fn parse_directive(args: &str) -> Result<(Directive, usize), String> {
    let bytes = args.as_bytes();
    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    let mut i = skip_ws(0);
    let quote = match bytes.get(i) {
        Some(&q) if q == b'\'' || q == b'"' => q,
        _ => return Err("expected a quoted path".into()),
    };
    let start = i + 1;
    let len = args[start..]
        .find(quote as char)
        .ok_or_else(|| String::from("unterminated path"))?;
    let path = args[start..start + len].to_string();
    if path.is_empty() {
        return Err("empty path".into());
    }
    i = skip_ws(start + len + 1);

    let mut context = Map::new();
    if bytes.get(i) == Some(&b',') {
        i = skip_ws(i + 1);
        if bytes.get(i) != Some(&b'{') {
            return Err("expected a JSON object after ','".into());
        }
        let end = i + balanced_object(&args[i..])?;
        context = serde_json::from_str(&args[i..end]).map_err(|e| e.to_string())?;
        i = skip_ws(end);
    }

    if bytes.get(i) != Some(&b')') {
        return Err("expected ')'".into());
    }

    Ok((Directive { path, context }, i + 1))
}

/// Length of the JSON object at the start of `text`, honoring strings.
fn balanced_object(text: &str) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
    }

    Err("unterminated JSON object".into())
}
