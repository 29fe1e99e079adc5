use std::collections::HashSet;
use std::future::Future;

use crate::core::{ArcStr, TaskContext};
use crate::engine::{Serve, Task, TaskGraph, TaskResult};
use crate::error::GraphError;

/// The blueprint of a build.
///
/// `Blueprint` is the registration phase: tasks and serve targets are added
/// to it by name, then [`Blueprint::finish`] validates every name and freezes
/// the result into an immutable [`TaskGraph`].
///
/// Duplicate names are rejected as soon as they are registered. Dependencies
/// may be registered in any order, so unknown names and cycles are reported
/// by `finish`, before anything can run.
///
/// # Example
///
/// ```rust
/// use tessen::Blueprint;
///
/// let mut config = Blueprint::new();
/// config
///     .register("styles", [] as [&str; 0], |_| Ok(()))?
///     .register("html", ["styles"], |_| Ok(()))?;
///
/// let graph = config.finish()?;
/// assert_eq!(graph.plan(["html"])?, vec!["styles", "html"]);
/// # Ok::<(), tessen::GraphError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    tasks: Vec<Task>,
    serves: Vec<(ArcStr, Serve)>,
    names: HashSet<ArcStr>,
}

impl Blueprint {
    /// Creates a new, empty blueprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task with a synchronous action.
    pub fn register<I, S, F>(
        &mut self,
        name: &str,
        dependencies: I,
        action: F,
    ) -> Result<&mut Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.add_task(Task::new(name, dependencies, Task::from_fn(action)))
    }

    /// Registers a task whose action completes asynchronously. The returned
    /// future is awaited before any dependent task starts.
    pub fn register_async<I, S, F, Fut>(
        &mut self,
        name: &str,
        dependencies: I,
        action: F,
    ) -> Result<&mut Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.add_task(Task::new(name, dependencies, Task::from_async(action)))
    }

    /// Registers a serve target. Serve targets share the namespace of tasks,
    /// since both are selected by name from the command line.
    pub fn serve(&mut self, name: &str, serve: Serve) -> Result<&mut Self, GraphError> {
        let name = self.claim(name)?;
        self.serves.push((name, serve));
        Ok(self)
    }

    /// Validates all names and freezes the blueprint into a [`TaskGraph`].
    pub fn finish(self) -> Result<TaskGraph, GraphError> {
        TaskGraph::new(self.tasks, self.serves)
    }

    fn add_task(&mut self, mut task: Task) -> Result<&mut Self, GraphError> {
        if task.dependencies.iter().any(|d| *d == task.name) {
            return Err(GraphError::CyclicDependency(vec![
                task.name.to_string(),
                task.name.to_string(),
            ]));
        }

        task.name = self.claim(&task.name)?;
        self.tasks.push(task);
        Ok(self)
    }

    fn claim(&mut self, name: &str) -> Result<ArcStr, GraphError> {
        let name = ArcStr::from(name);
        if !self.names.insert(name.clone()) {
            return Err(GraphError::DuplicateTask(name.to_string()));
        }
        Ok(name)
    }
}

impl std::fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blueprint")
            .field("tasks", &self.tasks)
            .field("serves", &self.serves.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_duplicate_task() {
        let mut config = Blueprint::new();
        config.register("styles", NONE, |_| Ok(())).unwrap();

        let err = config.register("styles", NONE, |_| Ok(())).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("styles".into()));
    }

    #[test]
    fn test_duplicate_serve_target() {
        let mut config = Blueprint::new();
        config.register("serve", NONE, |_| Ok(())).unwrap();

        let err = config.serve("serve", Serve::new()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("serve".into()));
    }

    #[test]
    fn test_self_dependency() {
        let mut config = Blueprint::new();
        let err = config.register("a", ["a"], |_| Ok(())).unwrap_err();
        assert_eq!(err, GraphError::CyclicDependency(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut config = Blueprint::new();
        config.register("build", ["missing"], |_| Ok(())).unwrap();

        let err = config.finish().unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                task: "build".into(),
                dependency: "missing".into()
            }
        );
    }

    #[test]
    fn test_forward_reference() {
        let mut config = Blueprint::new();
        config
            .register("html", ["styles"], |_| Ok(()))
            .unwrap()
            .register("styles", NONE, |_| Ok(()))
            .unwrap();

        let graph = config.finish().unwrap();
        assert_eq!(graph.plan(["html"]).unwrap(), vec!["styles", "html"]);
    }
}
