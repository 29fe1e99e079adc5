#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

pub use anyhow::Error as ActionError;
use thiserror::Error;

/// Problems with the shape of the task graph. All of these are detected
/// before any action runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependency between tasks: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Task '{0}' not found")]
    UnknownTask(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task '{task}':\n{source}")]
    ActionFailure {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to build runtime")]
    Runtime(#[from] std::io::Error),
}

impl RunError {
    /// Name of the task whose action failed, if this is an action failure.
    pub fn task(&self) -> Option<&str> {
        match self {
            RunError::ActionFailure { task, .. } => Some(task),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't read or write a file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Transform failed on '{0}':\n{1}")]
    Transform(String, anyhow::Error),
}

#[derive(Debug, Error)]
#[error("Couldn't remove '{0}':\n{1}")]
pub struct ClearError(pub String, #[source] pub std::io::Error);

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Serve target '{0}' not found")]
    UnknownTarget(String),

    #[error("Prerequisites of '{0}' failed:\n{1}")]
    Prerequisite(String, RunError),

    #[error("Couldn't open the live reload socket:\n{0}")]
    Reload(std::io::Error),

    #[error("HTTP server stopped:\n{0}")]
    Server(anyhow::Error),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

#[derive(Debug, Error)]
pub enum TessenError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Couldn't compile watch pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Error while running tasks.\n{0}")]
    Run(#[from] RunError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Error while cleaning output directories:\n{0}")]
    Clear(#[from] ClearError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}
