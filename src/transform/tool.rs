use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::Context;

use crate::stream::{Asset, Transform};

/// Pipes every asset through an external program: the file contents go to
/// its standard input and whatever it prints becomes the new contents.
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    args: Vec<String>,
}

impl Tool {
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

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn run(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't start '{}'", self.program))?;

        let mut stdin = child.stdin.take().context("stdin is not piped")?;

        // stdin is written while stdout is drained, or both pipes can fill up.
        let output = thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(input));
            let output = child.wait_with_output();
            match writer.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => output,
            }
        })?;

        if !output.status.success() {
            anyhow::bail!(
                "'{}' exited with {}:\n{}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output.stdout)
    }
}

impl Transform for Tool {
    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        asset.data = self.run(&asset.data)?;
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_pipes_through_program() {
        let tool = Tool::new("tr").args(["a-z", "A-Z"]);
        let out = tool
            .apply(Asset::new("app", "main.js", b"let x = 1;".to_vec()))
            .unwrap();

        assert_eq!(out.data, b"LET X = 1;");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program() {
        let err = Tool::new("false")
            .apply(Asset::new("app", "main.js", Vec::new()))
            .unwrap_err();

        assert!(err.to_string().contains("'false' exited"));
    }

    #[test]
    fn test_missing_program() {
        let err = Tool::new("surely-not-an-installed-minifier")
            .apply(Asset::new("app", "main.js", Vec::new()))
            .unwrap_err();

        assert!(err.to_string().contains("couldn't start"));
    }
}
