use std::process::Command;

use anyhow::Context;
use camino::Utf8PathBuf;

use crate::core::Mode;
use crate::stream::Stream;

/// Outcome of a lint run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub passed: bool,
    /// Everything the checker printed.
    pub diagnostics: String,
}

/// Runs an external checker over the files of a stream. The file paths are
/// appended to the arguments and a non-zero exit code means the check failed.
#[derive(Debug, Clone)]
pub struct Lint {
    program: String,
    args: Vec<String>,
}

impl Lint {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn run(&self, files: &[Utf8PathBuf]) -> anyhow::Result<Report> {
        if files.is_empty() {
            return Ok(Report {
                passed: true,
                diagnostics: String::new(),
            });
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(files)
            .output()
            .with_context(|| format!("couldn't start '{}'", self.program))?;

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(Report {
            passed: output.status.success(),
            diagnostics: diagnostics.trim().to_string(),
        })
    }

    /// Lints every file of `stream`.
    ///
    /// A failed check fails the action in [`Mode::Build`]. While watching it
    /// is only reported.
    pub fn check(&self, stream: &Stream, mode: Mode) -> anyhow::Result<Report> {
        let files: Vec<_> = stream.assets().iter().map(|a| a.source()).collect();
        let report = self.run(&files)?;

        if !report.passed {
            match mode {
                Mode::Build => anyhow::bail!("{} found problems:\n{}", self.program, report.diagnostics),
                Mode::Watch => tracing::warn!("{} found problems:\n{}", self.program, report.diagnostics),
            }
        } else if !report.diagnostics.is_empty() {
            tracing::info!("{}", report.diagnostics);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Asset;

    fn stream() -> Stream {
        Stream::from_assets(vec![Asset::new("app/scripts", "main.js", Vec::new())])
    }

    #[test]
    fn test_empty_stream_passes() {
        let report = Lint::new("surely-not-an-installed-linter")
            .check(&Stream::default(), Mode::Build)
            .unwrap();

        assert!(report.passed);
    }

    #[cfg(unix)]
    #[test]
    fn test_passing_check() {
        let report = Lint::new("true").check(&stream(), Mode::Build).unwrap();
        assert!(report.passed);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_fails_build() {
        let err = Lint::new("false").check(&stream(), Mode::Build).unwrap_err();
        assert!(err.to_string().contains("false found problems"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_only_warns_while_watching() {
        let report = Lint::new("false").check(&stream(), Mode::Watch).unwrap();
        assert!(!report.passed);
    }

    #[cfg(unix)]
    #[test]
    fn test_diagnostics_are_collected() {
        let report = Lint::new("echo")
            .arg("checked:")
            .run(&["app/scripts/main.js".into()])
            .unwrap();

        assert!(report.passed);
        assert_eq!(report.diagnostics, "checked: app/scripts/main.js");
    }
}
