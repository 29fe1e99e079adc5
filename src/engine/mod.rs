//! The task graph and everything that executes it.
//!
//! A [`Task`] is a named unit of work with declared dependencies. Tasks are
//! registered on a [`Blueprint`](crate::Blueprint) and frozen into a
//! [`TaskGraph`], a directed acyclic graph where every edge points from a
//! dependency to its dependent.
//!
//! ## Completion handles
//!
//! Every action, whether it was registered as synchronous or asynchronous, is
//! stored in the same shape: a function from [`TaskContext`] to a
//! [`Completion`], a boxed future resolving to the action's result. The
//! runner awaits it before any dependent may start. Synchronous actions are
//! wrapped into an already-resolved future, so the runner never has to know
//! which I/O idiom an action uses internally.

mod graph;
pub(crate) mod runner;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::{ArcStr, TaskContext};

pub use crate::engine::graph::TaskGraph;
pub use crate::engine::runner::reload::{Reloader, Signal};
pub use crate::engine::runner::serve::Serve;
pub use crate::engine::runner::watch::{Trigger, Triggered, WatchRule, WatchRules};
pub use crate::engine::runner::{Diagnostics, TaskExecution};

/// Result from a single executed action.
pub type TaskResult = anyhow::Result<()>;

/// A handle representing the asynchronous completion of an action.
pub type Completion = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

/// Type-erased action, shared between every run of the graph.
pub(crate) type Action = Arc<dyn Fn(TaskContext) -> Completion + Send + Sync>;

/// A registered task: its name, the names it depends on and its action.
#[derive(Clone)]
pub struct Task {
    pub(crate) name: ArcStr,
    pub(crate) dependencies: Vec<ArcStr>,
    pub(crate) action: Action,
}

impl Task {
    pub(crate) fn new<I, S>(name: &str, dependencies: I, action: Action) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(|d| d.as_ref().into()).collect(),
            action,
        }
    }

    /// Wraps a synchronous function into an action.
    pub(crate) fn from_fn<F>(func: F) -> Action
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        Arc::new(move |ctx: TaskContext| -> Completion {
            let result = {
                let _enter = ctx.span.enter();
                func(&ctx)
            };
            Box::pin(std::future::ready(result))
        })
    }

    /// Wraps a future-returning function into an action.
    pub(crate) fn from_async<F, Fut>(func: F) -> Action
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Arc::new(move |ctx: TaskContext| -> Completion { Box::pin(func(ctx)) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(AsRef::as_ref)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
