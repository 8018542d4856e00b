use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::RecvError;

use thiserror::Error;

use crate::tasks::html::HtmlError;
use crate::tasks::mirror::MirrorError;
use crate::tasks::script::ScriptError;
use crate::tasks::styles::StyleError;

#[derive(Debug, Error)]
pub enum SitepipeError {
    #[error("Invalid project root '{0}':\n{1}")]
    Root(String, std::io::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Error while building the site.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

/// Deleting and recreating the output directory failed. Always fatal.
#[derive(Debug, Error)]
pub enum ResetError {
    #[error("Couldn't remove the output directory.\n{0}")]
    Remove(std::io::Error),

    #[error("Couldn't create the output directory.\n{0}")]
    Create(std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Couldn't remove the previous archive.\n{0}")]
    Remove(std::io::Error),

    #[error("Couldn't list the output directory.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Failure of a single task, tagged with the concern that produced it.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Reset(#[from] ResetError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Html(#[from] HtmlError),

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Task panicked: {0}")]
    Panic(String),
}

impl TaskError {
    /// Label used when the error is surfaced as an alert.
    pub fn title(&self) -> &'static str {
        match self {
            TaskError::Reset(_) => "RESET",
            TaskError::Mirror(_) => "COPY",
            TaskError::Html(_) => "HTML",
            TaskError::Style(_) => "SCSS",
            TaskError::Script(_) => "JS",
            TaskError::Archive(_) => "ZIP",
            TaskError::Panic(_) => "TASK",
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error(transparent)]
    Tasks(#[from] TaskFailures),
}

/// Every task failure collected during one graph run.
#[derive(Debug)]
pub struct TaskFailures(pub Vec<(String, TaskError)>);

impl TaskFailures {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

impl Display for TaskFailures {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (name, err)) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Task '{name}':\n{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskFailures {}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
