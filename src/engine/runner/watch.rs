//! Watch mode re-runs tasks when files change.
//!
//! 1. **Rules**: a [`WatchRule`] pairs glob patterns with a [`Trigger`],
//!    either a list of tasks or a plain live reload.
//! 2. **File watcher**: the `notify` crate monitors the static roots of all
//!    patterns recursively. Events are debounced, so a burst of saves arrives
//!    as one batch.
//! 3. **Dispatch**: every path of a batch is matched against every rule. The
//!    triggered tasks are deduplicated and run once, through the same runner
//!    as a regular build, then a reload is broadcast if a reload rule matched.
//!
//! ## Serialization
//!
//! The loop is the only consumer of the event channel and it blocks while a
//! batch is dispatched. Changes which happen during a run queue up in the
//! channel and are handled as the next batch, so two runs of the same task
//! never overlap.

use std::sync::Arc;

use camino::Utf8Path;
use glob::{MatchOptions, Pattern};

use crate::core::{ArcStr, Environment};
use crate::engine::{Diagnostics, Reloader, TaskGraph};
use crate::error::RunError;

/// What a matching change sets off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Run these tasks (with their dependencies).
    Tasks(Vec<ArcStr>),
    /// Only ask connected browsers to reload.
    Reload,
}

/// Glob patterns paired with a [`Trigger`].
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub(crate) patterns: Vec<Pattern>,
    pub(crate) trigger: Trigger,
}

impl WatchRule {
    /// Runs `tasks` when a file matching any of `globs` changes.
    pub fn tasks<G, T>(globs: G, tasks: T) -> Result<Self, glob::PatternError>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        let tasks = tasks.into_iter().map(|t| ArcStr::from(t.as_ref())).collect();
        Self::new(globs, Trigger::Tasks(tasks))
    }

    /// Reloads connected browsers when a file matching any of `globs` changes.
    pub fn reload<G>(globs: G) -> Result<Self, glob::PatternError>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
    {
        Self::new(globs, Trigger::Reload)
    }

    fn new<G>(globs: G, trigger: Trigger) -> Result<Self, glob::PatternError>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
    {
        let patterns = globs
            .into_iter()
            .map(|g| Pattern::new(g.as_ref()))
            .collect::<Result<_, _>>()?;

        Ok(Self { patterns, trigger })
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Matches a path relative to the working directory. A `*` stays within
    /// one path segment, only `**` crosses directories.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };

        self.patterns
            .iter()
            .any(|p| p.matches_with(path.as_str(), options))
    }

    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }
}

/// An ordered set of watch rules.
#[derive(Debug, Clone, Default)]
pub struct WatchRules {
    rules: Vec<WatchRule>,
}

impl WatchRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: WatchRule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchRule> {
        self.rules.iter()
    }

    /// Collects what a batch of changed paths sets off.
    ///
    /// Tasks are listed once, in the order of the first rule that names
    /// them.
    pub fn triggered<'a, I>(&self, paths: I) -> Triggered
    where
        I: IntoIterator<Item = &'a Utf8Path>,
    {
        let paths: Vec<_> = paths.into_iter().collect();
        let mut triggered = Triggered::default();

        for rule in &self.rules {
            if !paths.iter().any(|path| rule.matches(path)) {
                continue;
            }

            match &rule.trigger {
                Trigger::Reload => triggered.reload = true,
                Trigger::Tasks(tasks) => {
                    for task in tasks {
                        if !triggered.tasks.contains(task) {
                            triggered.tasks.push(task.clone());
                        }
                    }
                }
            }
        }

        triggered
    }
}

impl FromIterator<WatchRule> for WatchRules {
    fn from_iter<T: IntoIterator<Item = WatchRule>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// The outcome of matching one batch of changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Triggered {
    pub tasks: Vec<ArcStr>,
    pub reload: bool,
}

impl Triggered {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && !self.reload
    }

    pub fn tasks(&self) -> Vec<&str> {
        self.tasks.iter().map(AsRef::as_ref).collect()
    }
}

/// Runs the tasks of one batch, then broadcasts a reload if asked to.
///
/// The reload is sent even if a task failed: raw file reloads do not depend
/// on the tasks of the same batch.
pub(crate) async fn dispatch(
    graph: &TaskGraph,
    triggered: &Triggered,
    env: Arc<Environment>,
    reloader: Reloader,
) -> Result<Option<Diagnostics>, RunError> {
    let result = if triggered.tasks.is_empty() {
        Ok(None)
    } else {
        graph
            .execute(&triggered.tasks, env, reloader.clone())
            .await
            .map(Some)
    };

    if triggered.reload {
        reloader.reload();
    }

    result
}

#[cfg(feature = "live")]
pub(crate) use self::watcher::watch;

#[cfg(feature = "live")]
mod watcher {
    use std::collections::{BTreeSet, HashSet};
    use std::env;
    use std::sync::Arc;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};
    use notify::{EventKind, RecursiveMode};
    use notify_debouncer_full::new_debouncer;

    use super::{WatchRules, dispatch};
    use crate::core::Environment;
    use crate::engine::runner::runtime;
    use crate::engine::{Reloader, TaskGraph};
    use crate::error::WatchError;

    /// Watches the roots of all `rules` and dispatches every batch of changes.
    /// Only returns if the watcher itself fails.
    pub(crate) fn watch(
        graph: &TaskGraph,
        rules: &WatchRules,
        env: Arc<Environment>,
        reloader: Reloader,
    ) -> Result<(), WatchError> {
        let rt = runtime()?;
        let pwd = current_dir()?;

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

        let mut watched = HashSet::new();
        for rule in rules.iter() {
            for glob in rule.globs() {
                match watch_root(glob) {
                    Ok(root) => {
                        watched.insert(root);
                    }
                    Err(e) => tracing::error!("failed to resolve path {glob}: {e}"),
                }
            }
        }

        // Collapse watched paths to reduce the number of watches
        for path in collapse_watch_paths(watched) {
            tracing::info!("watching {}", path);
            debouncer.watch(&path, RecursiveMode::Recursive)?;
        }

        tracing::info!("watching for changes...");

        loop {
            match rx.recv()? {
                Ok(events) => {
                    let paths: BTreeSet<Utf8PathBuf> = events
                        .iter()
                        .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
                        .flat_map(|de| de.event.paths.iter())
                        .filter_map(|path| Utf8Path::from_path(path))
                        .map(|path| path.strip_prefix(&pwd).unwrap_or(path).to_path_buf())
                        .collect();

                    let triggered = rules.triggered(paths.iter().map(AsRef::as_ref));
                    if triggered.is_empty() {
                        continue;
                    }

                    tracing::info!(tasks = ?triggered.tasks(), reload = triggered.reload, "change detected");

                    match rt.block_on(dispatch(graph, &triggered, env.clone(), reloader.clone())) {
                        Ok(_) => tracing::info!("rebuild complete, watching for changes..."),
                        Err(e) => tracing::error!("{e}"),
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e:?}");
                    }
                }
            }
        }
    }

    fn current_dir() -> std::io::Result<Utf8PathBuf> {
        let pwd = Utf8PathBuf::from_path_buf(env::current_dir()?)
            .map_err(|_| std::io::Error::other("working directory is not valid UTF-8"))?;
        pwd.canonicalize_utf8()
    }

    /// Finds the directory which has to be watched for `glob`: the
    /// canonicalized static prefix of the pattern.
    ///
    /// Concrete files are watched through their parent so atomic writes are
    /// caught. Prefixes which don't exist yet, like an output directory
    /// before the first build, fall back to their nearest existing ancestor.
    pub(super) fn watch_root(glob: &str) -> anyhow::Result<Utf8PathBuf> {
        let (root, _) = crate::io::split_glob(glob);

        let mut existing = root.as_path();
        while !existing.as_str().is_empty() && !existing.exists() {
            existing = existing.parent().unwrap_or(Utf8Path::new(""));
        }

        let existing = if existing.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            existing
        };

        let absolute = existing.canonicalize_utf8()?;

        if absolute.is_file() {
            Ok(absolute
                .parent()
                .map(Utf8Path::to_path_buf)
                .unwrap_or(absolute))
        } else {
            Ok(absolute)
        }
    }

    /// Reduces a set of paths to the minimal set of watch roots.
    ///
    /// If we watch `/a` and `/a/b`, we only need to watch `/a` because
    /// the watcher is recursive. This function sorts the paths and filters
    /// out any path that is a subdirectory of a previously accepted path.
    pub(super) fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = paths.into_iter().collect();
        paths.sort();

        let mut filtered: Vec<Utf8PathBuf> = Vec::new();
        for path in paths {
            if let Some(last) = filtered.last()
                && path.starts_with(last)
            {
                continue;
            }
            filtered.push(path);
        }

        filtered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Blueprint;
    use crate::engine::Signal;

    const NONE: [&str; 0] = [];

    fn paths(paths: &[&'static str]) -> Vec<&'static Utf8Path> {
        paths.iter().map(|p| Utf8Path::new(*p)).collect()
    }

    #[test]
    fn test_css_change_triggers_styles_only() {
        let rules: WatchRules = [
            WatchRule::tasks(["*.css"], ["styles"]).unwrap(),
            WatchRule::tasks(["*.js"], ["lint"]).unwrap(),
            WatchRule::reload(["*.html"]).unwrap(),
        ]
        .into_iter()
        .collect();

        let triggered = rules.triggered(paths(&["style.css"]));
        assert_eq!(triggered.tasks(), vec!["styles"]);
        assert!(!triggered.reload);
    }

    #[test]
    fn test_tasks_are_deduplicated() {
        let rules: WatchRules = [
            WatchRule::tasks(["app/styles/**/*.css"], ["styles"]).unwrap(),
            WatchRule::tasks(["bower.json"], ["wiredep", "fonts"]).unwrap(),
            WatchRule::tasks(["app/fonts/**/*"], ["fonts"]).unwrap(),
        ]
        .into_iter()
        .collect();

        let triggered = rules.triggered(paths(&[
            "app/fonts/icons.woff",
            "bower.json",
            "app/styles/main.css",
            "app/styles/nested/more.css",
        ]));

        assert_eq!(triggered.tasks(), vec!["styles", "wiredep", "fonts"]);
    }

    #[test]
    fn test_star_stays_within_a_directory() {
        let rule = WatchRule::reload(["app/*.html"]).unwrap();

        assert!(rule.matches(Utf8Path::new("app/index.html")));
        assert!(!rule.matches(Utf8Path::new("app/scripts/templates/x.html")));

        let nested = WatchRule::reload(["app/styles/**/*.css"]).unwrap();
        assert!(nested.matches(Utf8Path::new("app/styles/main.css")));
        assert!(nested.matches(Utf8Path::new("app/styles/a/b/more.css")));
    }

    #[test]
    fn test_reload_rules() {
        let rules: WatchRules = [WatchRule::reload([
            "app/*.html",
            "app/scripts/**/*.js",
        ])
        .unwrap()]
        .into_iter()
        .collect();

        let triggered = rules.triggered(paths(&["app/scripts/main.js"]));
        assert!(triggered.reload);
        assert!(triggered.tasks.is_empty());

        assert!(rules.triggered(paths(&["app/styles/main.css"])).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_reruns_styles_exactly_once() {
        let styles = Arc::new(AtomicUsize::new(0));
        let others = Arc::new(AtomicUsize::new(0));

        let mut config = Blueprint::new();
        let counter = styles.clone();
        config
            .register("styles", NONE, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        for name in ["lint", "fonts", "html"] {
            let counter = others.clone();
            config
                .register(name, NONE, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        let graph = config.finish().unwrap();

        let rules: WatchRules = [
            WatchRule::tasks(["**/*.css"], ["styles"]).unwrap(),
            WatchRule::tasks(["app/styles/*.css"], ["styles"]).unwrap(),
            WatchRule::tasks(["*.js"], ["lint"]).unwrap(),
        ]
        .into_iter()
        .collect();

        let triggered = rules.triggered(paths(&["app/styles/style.css"]));
        let (reloader, rx) = Reloader::channel();
        let diagnostics = dispatch(&graph, &triggered, Arc::new(Environment::watch(None)), reloader)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(diagnostics.executed(), vec!["styles"]);
        assert_eq!(styles.load(Ordering::SeqCst), 1);
        assert_eq!(others.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_failure_still_reloads() {
        let mut config = Blueprint::new();
        config
            .register("lint:test", NONE, |_| anyhow::bail!("2 problems"))
            .unwrap();
        let graph = config.finish().unwrap();

        let rules: WatchRules = [
            WatchRule::reload(["test/spec/**/*.js"]).unwrap(),
            WatchRule::tasks(["test/spec/**/*.js"], ["lint:test"]).unwrap(),
        ]
        .into_iter()
        .collect();

        let triggered = rules.triggered(paths(&["test/spec/test.js"]));
        let (reloader, rx) = Reloader::channel();
        let err = dispatch(&graph, &triggered, Arc::new(Environment::watch(None)), reloader)
            .await
            .unwrap_err();

        assert_eq!(err.task(), Some("lint:test"));
        assert_eq!(rx.try_recv().unwrap(), Signal::Reload);
    }

    #[cfg(feature = "live")]
    mod roots {
        use std::collections::HashSet;

        use camino::Utf8PathBuf;

        use super::super::watcher::{collapse_watch_paths, watch_root};

        fn cwd() -> Utf8PathBuf {
            Utf8PathBuf::try_from(std::env::current_dir().unwrap())
                .unwrap()
                .canonicalize_utf8()
                .unwrap()
        }

        #[test]
        fn test_concrete_file() {
            assert_eq!(watch_root("Cargo.toml").unwrap(), cwd());
        }

        #[test]
        fn test_concrete_directory() {
            assert_eq!(watch_root("src").unwrap(), cwd().join("src"));
        }

        #[test]
        fn test_directory_wildcard() {
            assert_eq!(watch_root("src/**/*.rs").unwrap(), cwd().join("src"));
        }

        #[test]
        fn test_missing_directory_falls_back_to_ancestor() {
            assert_eq!(watch_root("src/not-there-yet/**/*").unwrap(), cwd().join("src"));
            assert_eq!(watch_root("*.css").unwrap(), cwd());
        }

        #[test]
        fn test_collapse_watch_paths() {
            let paths: HashSet<_> = ["/a", "/a/b", "/a/b/c", "/b", "/c/d"]
                .into_iter()
                .map(Utf8PathBuf::from)
                .collect();

            // /a/b and /a/b/c are covered by /a.
            assert_eq!(
                collapse_watch_paths(paths),
                vec![
                    Utf8PathBuf::from("/a"),
                    Utf8PathBuf::from("/b"),
                    Utf8PathBuf::from("/c/d")
                ]
            );
        }

        #[test]
        fn test_collapse_watch_paths_similar_names() {
            let paths: HashSet<_> = ["/foo", "/foo-bar"]
                .into_iter()
                .map(Utf8PathBuf::from)
                .collect();

            // /foo-bar is not a subdirectory of /foo
            assert_eq!(
                collapse_watch_paths(paths),
                vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
            );
        }
    }
}
