use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use console::style;

use crate::core::ArcStr;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Run diagnostics and timing.
///
/// Returned by every successful run of the task graph.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Names of the executed tasks, in execution order.
    pub(crate) executed: Vec<ArcStr>,
    /// Execution metrics, keyed by task name.
    pub execution_times: HashMap<ArcStr, TaskExecution>,
}

impl Diagnostics {
    /// Names of the executed tasks, in execution order.
    pub fn executed(&self) -> Vec<&str> {
        self.executed.iter().map(AsRef::as_ref).collect()
    }

    /// Wall time between the start of the first task and the end of the last.
    pub fn total(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// The task which took the longest, if any ran.
    pub fn slowest(&self) -> Option<(&str, Duration)> {
        self.execution_times
            .iter()
            .max_by_key(|(_, t)| t.duration)
            .map(|(name, t)| (name.as_ref(), t.duration))
    }
}

impl Display for Diagnostics {
    /// One line per executed task, in execution order, followed by a total.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self.executed.iter().map(|n| n.len()).max().unwrap_or(0);

        for name in &self.executed {
            if let Some(exec) = self.execution_times.get(name) {
                writeln!(
                    f,
                    "  {:<width$}  {}",
                    name,
                    style(format!("{:.2?}", exec.duration)).blue(),
                    width = width
                )?;
            }
        }

        write!(
            f,
            "{} task(s) in {}",
            self.executed.len(),
            style(format!("{:.2?}", self.total())).blue()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics(tasks: &[(&str, u64, u64)]) -> Diagnostics {
        let origin = Instant::now();
        let mut diagnostics = Diagnostics::default();

        for &(name, offset, millis) in tasks {
            let name = ArcStr::from(name);
            diagnostics.executed.push(name.clone());
            diagnostics.execution_times.insert(
                name,
                TaskExecution {
                    start: origin + Duration::from_millis(offset),
                    duration: Duration::from_millis(millis),
                },
            );
        }

        diagnostics
    }

    #[test]
    fn test_total_spans_all_tasks() {
        let d = diagnostics(&[("styles", 0, 10), ("html", 10, 30)]);
        assert_eq!(d.total(), Duration::from_millis(40));
        assert_eq!(d.slowest(), Some(("html", Duration::from_millis(30))));
    }

    #[test]
    fn test_empty() {
        let d = Diagnostics::default();
        assert_eq!(d.total(), Duration::ZERO);
        assert!(d.slowest().is_none());
        assert!(d.to_string().starts_with("0 task(s)"));
    }

    #[test]
    fn test_display_lists_tasks_in_order() {
        let d = diagnostics(&[("clean", 0, 1), ("build", 1, 2)]);
        let text = d.to_string();
        let clean = text.find("clean").unwrap();
        let build = text.find("build").unwrap();
        assert!(clean < build);
        assert!(text.contains("2 task(s)"));
    }
}
