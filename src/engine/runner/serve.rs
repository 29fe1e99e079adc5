use camino::Utf8PathBuf;

use crate::core::ArcStr;
use crate::engine::{WatchRule, WatchRules};

/// A serve target: what has to be built first, what is served, and which
/// file changes set off which tasks.
///
/// ```rust
/// use tessen::{Serve, WatchRule};
///
/// let serve = Serve::new()
///     .requires(["styles"])
///     .base_dir(".tmp")
///     .base_dir("app")
///     .route("/bower_components", "bower_components")
///     .watch(WatchRule::tasks(["app/styles/**/*.css"], ["styles"])?)
///     .watch(WatchRule::reload(["app/*.html"])?);
/// # Ok::<(), glob::PatternError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Serve {
    pub(crate) requires: Vec<ArcStr>,
    pub(crate) rules: WatchRules,
    pub(crate) base_dirs: Vec<Utf8PathBuf>,
    pub(crate) routes: Vec<(String, Utf8PathBuf)>,
    pub(crate) port: u16,
}

impl Default for Serve {
    fn default() -> Self {
        Self {
            requires: Vec::new(),
            rules: WatchRules::new(),
            base_dirs: Vec::new(),
            routes: Vec::new(),
            port: 9000,
        }
    }
}

impl Serve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks which run once before the server starts.
    pub fn requires<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.requires
            .extend(tasks.into_iter().map(|t| ArcStr::from(t.as_ref())));
        self
    }

    /// Adds a directory to serve from. Requests are resolved against the base
    /// directories in the order they were added.
    pub fn base_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.base_dirs.push(dir.into());
        self
    }

    /// Mounts `dir` under the URL prefix `route`.
    pub fn route(mut self, route: &str, dir: impl Into<Utf8PathBuf>) -> Self {
        self.routes.push((route.to_string(), dir.into()));
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn watch(mut self, rule: WatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &WatchRules {
        &self.rules
    }

    pub fn required(&self) -> Vec<&str> {
        self.requires.iter().map(AsRef::as_ref).collect()
    }
}

#[cfg(all(feature = "live", feature = "server"))]
mod session {
    use std::sync::Arc;

    use crate::core::Environment;
    use crate::engine::runner::{http, reload, runtime, watch};
    use crate::engine::{Reloader, TaskGraph};
    use crate::error::{RunError, ServeError};

    impl TaskGraph {
        /// Runs the serve target `name` until the watcher or the server
        /// stops.
        ///
        /// The prerequisites run first and a failure there is fatal. Once the
        /// server is up, changes are dispatched to the target's rules and a
        /// failing task is only reported.
        pub fn serve(&self, name: &str, port: Option<u16>) -> Result<(), ServeError> {
            let target = self
                .serve_target(name)
                .ok_or_else(|| ServeError::UnknownTarget(name.to_string()))?;

            let (env, reloader, _live) = if target.rules.is_empty() {
                (Environment::watch(None), Reloader::disabled(), None)
            } else {
                let live = reload::start().map_err(ServeError::Reload)?;
                let env = Environment::watch(Some(live.port));
                (env, live.reloader(), Some(live))
            };
            let env = Arc::new(env);

            if !target.requires.is_empty() {
                let prerequisite = |e| ServeError::Prerequisite(name.to_string(), e);
                let rt = runtime().map_err(|e| prerequisite(RunError::Runtime(e)))?;
                let diagnostics = rt
                    .block_on(self.execute(&target.requires, env.clone(), reloader.clone()))
                    .map_err(prerequisite)?;

                tracing::info!("prerequisites of {name} finished\n{diagnostics}");
            }

            let server = http::start(target, port.unwrap_or(target.port), env.refresh_script())
                .map_err(|e| ServeError::Server(e.into()))?;

            if !target.rules.is_empty() {
                watch::watch(self, &target.rules, env, reloader)?;
            }

            match server.join() {
                Ok(result) => result.map_err(ServeError::Server),
                Err(_) => Err(ServeError::Server(anyhow::anyhow!(
                    "HTTP server thread panicked"
                ))),
            }
        }
    }
}
