mod diagnostics;
#[cfg(feature = "server")]
pub(crate) mod http;
pub(crate) mod reload;
pub(crate) mod serve;
pub(crate) mod watch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressStyle;
use tracing::{Instrument, Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Environment, TaskContext};
use crate::engine::{Reloader, TaskGraph};
use crate::error::RunError;

pub use diagnostics::{Diagnostics, TaskExecution};

/// Builds the runtime actions are driven on. It is single-threaded: the
/// task graph is the only thing which orders actions, so two of them never
/// run at the same time.
pub(crate) fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

impl TaskGraph {
    /// Runs `name` and all of its transitive dependencies in `Build` mode.
    pub fn run(&self, name: &str) -> Result<Diagnostics, RunError> {
        self.run_many([name])
    }

    /// Runs every task in `names` and their transitive dependencies, each of
    /// them exactly once, in `Build` mode.
    pub fn run_many<I, S>(&self, names: I) -> Result<Diagnostics, RunError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let env = Arc::new(Environment::build());
        runtime()?.block_on(self.execute(names, env, Reloader::disabled()))
    }

    /// Runs `name` and its dependencies on an existing runtime.
    pub async fn run_async(
        &self,
        name: &str,
        env: Arc<Environment>,
        reloader: Reloader,
    ) -> Result<Diagnostics, RunError> {
        self.execute([name], env, reloader).await
    }

    /// Executes the plan for `names`.
    ///
    /// The whole plan is computed up front, so an unknown name or a cycle
    /// fails the run before any action has been started. Actions are then
    /// awaited one by one in plan order, and the first failure stops the run:
    /// nothing scheduled after the failed task is started.
    pub(crate) async fn execute<I, S>(
        &self,
        names: I,
        env: Arc<Environment>,
        reloader: Reloader,
    ) -> Result<Diagnostics, RunError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order = self.schedule(names)?;

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(order.len() as u64);
        root_span.pb_set_style(&progress_style());
        root_span.pb_set_message("Running tasks...");

        async move {
            let mut executed = Vec::with_capacity(order.len());
            let mut execution_times = HashMap::with_capacity(order.len());

            for index in order {
                let task = &self.graph[index];

                let span = tracing::span!(Level::INFO, "task", name = %task.name);
                span.pb_set_message(&format!("Running {}", task.name));

                let context = TaskContext {
                    env: env.clone(),
                    name: task.name.clone(),
                    reloader: reloader.clone(),
                    span: span.clone(),
                };

                let start = Instant::now();
                let result = (task.action)(context).instrument(span).await;
                let duration = start.elapsed();

                if let Err(source) = result {
                    tracing::error!("{} failed after {:.2?}", task.name, duration);
                    return Err(RunError::ActionFailure {
                        task: task.name.to_string(),
                        source,
                    });
                }

                tracing::info!("finished {} in {:.2?}", task.name, duration);
                executed.push(task.name.clone());
                execution_times.insert(task.name.clone(), TaskExecution { start, duration });
                Span::current().pb_inc(1);
            }

            Ok(Diagnostics {
                executed,
                execution_times,
            })
        }
        .instrument(root_span)
        .await
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::Blueprint;

    const NONE: [&str; 0] = [];

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log) -> impl Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |ctx| {
            log.lock().unwrap().push(ctx.name().to_string());
            Ok(())
        }
    }

    #[test]
    fn test_build_runs_dependencies_first() {
        let log = Log::default();
        let mut config = Blueprint::new();
        config
            .register("inject", NONE, record(&log))
            .unwrap()
            .register("bundle", NONE, record(&log))
            .unwrap()
            .register("optimizeImages", NONE, record(&log))
            .unwrap()
            .register("copyExtras", NONE, record(&log))
            .unwrap()
            .register(
                "build",
                ["inject", "bundle", "optimizeImages", "copyExtras"],
                record(&log),
            )
            .unwrap();

        let graph = config.finish().unwrap();
        let diagnostics = graph.run("build").unwrap();

        let expected = ["inject", "bundle", "optimizeImages", "copyExtras", "build"];
        assert_eq!(*log.lock().unwrap(), expected);
        assert_eq!(diagnostics.executed(), expected);
        assert_eq!(diagnostics.execution_times.len(), 5);
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let log = Log::default();
        let mut config = Blueprint::new();
        config
            .register("styles", NONE, record(&log))
            .unwrap()
            .register("html", ["styles"], record(&log))
            .unwrap()
            .register("serve", ["styles"], record(&log))
            .unwrap()
            .register("all", ["html", "serve", "styles"], record(&log))
            .unwrap();

        config.finish().unwrap().run("all").unwrap();

        assert_eq!(*log.lock().unwrap(), ["styles", "html", "serve", "all"]);
    }

    #[test]
    fn test_failure_stops_dependents() {
        let log = Log::default();
        let mut config = Blueprint::new();
        config
            .register("styles", NONE, |_| anyhow::bail!("syntax error"))
            .unwrap()
            .register("html", ["styles"], record(&log))
            .unwrap()
            .register("build", ["html"], record(&log))
            .unwrap();

        let err = config.finish().unwrap().run("build").unwrap_err();

        assert_eq!(err.task(), Some("styles"));
        assert!(err.to_string().contains("syntax error"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_runs_nothing() {
        let log = Log::default();
        let mut config = Blueprint::new();
        config
            .register("a", ["b"], record(&log))
            .unwrap()
            .register("b", ["c"], record(&log))
            .unwrap()
            .register("c", ["a"], record(&log))
            .unwrap();

        let err = config.finish().unwrap_err();

        assert!(matches!(err, crate::GraphError::CyclicDependency(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_task_runs_nothing() {
        let log = Log::default();
        let mut config = Blueprint::new();
        config.register("a", NONE, record(&log)).unwrap();

        let err = config.finish().unwrap().run_many(["a", "b"]).unwrap_err();

        assert!(matches!(
            err,
            RunError::Graph(crate::GraphError::UnknownTask(ref name)) if name == "b"
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_completion_is_awaited() {
        let log = Log::default();
        let mut config = Blueprint::new();

        let async_log = log.clone();
        config
            .register_async("fetch", NONE, move |ctx| {
                let log = async_log.clone();
                async move {
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(format!("{} started", ctx.name()));
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(format!("{} done", ctx.name()));
                    Ok(())
                }
            })
            .unwrap()
            .register("use", ["fetch"], record(&log))
            .unwrap();

        let graph = config.finish().unwrap();
        graph
            .run_async("use", Arc::new(Environment::build()), Reloader::disabled())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            ["fetch started", "fetch done", "use"]
        );
    }

    #[test]
    fn test_context_sees_mode() {
        let mut config = Blueprint::new();
        config
            .register("check", NONE, |ctx| {
                anyhow::ensure!(!ctx.is_watching(), "expected build mode");
                Ok(())
            })
            .unwrap();

        config.finish().unwrap().run("check").unwrap();
    }
}
