//! File streams are the building blocks of leaf actions.
//!
//! A [`Stream`] is a set of [`Asset`]s read from disk through glob patterns.
//! It is piped through [`Transform`]s, each applied to every asset on the
//! rayon pool, and finally written to one or more destination directories.
//!
//! ```rust,no_run
//! use tessen::stream::Stream;
//!
//! Stream::src(["app/fonts/**/*"])?
//!     .dest(".tmp/fonts")?
//!     .dest("dist/fonts")?;
//! # Ok::<(), tessen::StreamError>(())
//! ```

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, glob_with};
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::error::StreamError;
use crate::io::split_glob;

/// A single file moving through a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// The static prefix of the pattern which selected the file.
    pub base: Utf8PathBuf,
    /// Path relative to `base`, preserved when the asset is written.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(base: impl Into<Utf8PathBuf>, path: impl Into<Utf8PathBuf>, data: Vec<u8>) -> Self {
        Self {
            base: base.into(),
            path: path.into(),
            data,
        }
    }

    /// Where the asset was read from.
    pub fn source(&self) -> Utf8PathBuf {
        self.base.join(&self.path)
    }

    pub fn text(&self) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.path.set_extension(extension);
        self
    }
}

/// A capability applied to every asset of a stream.
pub trait Transform: Send + Sync {
    fn apply(&self, asset: Asset) -> anyhow::Result<Asset>;
}

impl<F> Transform for F
where
    F: Fn(Asset) -> anyhow::Result<Asset> + Send + Sync,
{
    fn apply(&self, asset: Asset) -> anyhow::Result<Asset> {
        self(asset)
    }
}

/// An ordered set of assets.
#[derive(Debug, Default, Clone)]
pub struct Stream {
    assets: Vec<Asset>,
}

impl Stream {
    /// Reads every file matched by `patterns`. Patterns starting with `!`
    /// exclude files matched by the others. Dotfiles are skipped unless a
    /// pattern names them literally.
    pub fn src<I, S>(patterns: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::read(patterns, true)
    }

    /// Like [`Stream::src`], but wildcards match dotfiles too.
    pub fn src_all<I, S>(patterns: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::read(patterns, false)
    }

    fn read<I, S>(patterns: I, literal_dot: bool) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = MatchOptions {
            require_literal_leading_dot: literal_dot,
            ..MatchOptions::new()
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for pattern in patterns {
            match pattern.as_ref().strip_prefix('!') {
                Some(negated) => exclude.push(Pattern::new(negated)?),
                None => include.push(pattern.as_ref().to_string()),
            }
        }

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for pattern in &include {
            let (base, rest) = split_glob(pattern);
            // A literal file path is its own pattern, its base is the parent.
            let base = if rest.is_empty() {
                base.parent().map(Utf8Path::to_path_buf).unwrap_or_default()
            } else {
                base
            };

            for path in glob_with(pattern, options)? {
                let path = Utf8PathBuf::try_from(path?)?;

                if !path.is_file()
                    || exclude.iter().any(|p| p.matches_path_with(path.as_std_path(), options))
                    || !seen.insert(path.clone())
                {
                    continue;
                }

                let relative = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
                found.push((base.clone(), relative));
            }
        }

        let assets = found
            .into_par_iter()
            .map(|(base, path)| {
                let data = fs::read(base.join(&path))?;
                Ok(Asset { base, path, data })
            })
            .collect::<Result<_, StreamError>>()?;

        Ok(Self { assets })
    }

    pub fn from_assets(assets: Vec<Asset>) -> Self {
        Self { assets }
    }

    /// Appends the assets of `other`.
    pub fn merge(mut self, other: Stream) -> Self {
        self.assets.extend(other.assets);
        self
    }

    /// Applies `transform` to every asset.
    pub fn pipe(self, transform: &impl Transform) -> Result<Self, StreamError> {
        let assets = self
            .assets
            .into_par_iter()
            .map(|asset| apply(transform, asset))
            .collect::<Result<_, _>>()?;

        Ok(Self { assets })
    }

    /// Applies `transform` only to assets whose relative path matches
    /// `pattern`. The others pass through untouched.
    pub fn pipe_if(self, pattern: &str, transform: &impl Transform) -> Result<Self, StreamError> {
        let pattern = Pattern::new(pattern)?;

        let assets = self
            .assets
            .into_par_iter()
            .map(|asset| match pattern.matches(asset.path.as_str()) {
                true => apply(transform, asset),
                false => Ok(asset),
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { assets })
    }

    /// Keeps only the assets whose relative path matches `pattern`.
    pub fn filter(mut self, pattern: &str) -> Result<Self, StreamError> {
        let pattern = Pattern::new(pattern)?;
        self.assets.retain(|asset| pattern.matches(asset.path.as_str()));
        Ok(self)
    }

    /// Writes every asset to `dir`, keeping its relative path.
    pub fn dest(self, dir: impl AsRef<Utf8Path>) -> Result<Self, StreamError> {
        let dir = dir.as_ref();

        self.assets.par_iter().try_for_each(|asset| {
            let path = dir.join(&asset.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &asset.data)
        })?;

        tracing::debug!("wrote {} file(s) to {}", self.assets.len(), dir);
        Ok(self)
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn paths(&self) -> Vec<&Utf8Path> {
        self.assets.iter().map(|a| a.path.as_path()).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

fn apply(transform: &impl Transform, asset: Asset) -> Result<Asset, StreamError> {
    let source = asset.source().to_string();
    transform
        .apply(asset)
        .map_err(|e| StreamError::Transform(source, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        for (path, data) in [
            ("app/index.html", "<html></html>"),
            ("app/robots.txt", "User-agent: *"),
            ("app/.htaccess", "Options -Indexes"),
            ("app/styles/main.css", "a { b: c }"),
            ("app/styles/nested/more.css", "d { e: f }"),
        ] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }

        (dir, root)
    }

    fn sorted(stream: &Stream) -> Vec<String> {
        let mut paths: Vec<_> = stream.paths().iter().map(|p| p.to_string()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_src_keeps_paths_relative_to_base() {
        let (_guard, root) = fixture();
        let stream = Stream::src([format!("{root}/app/styles/**/*.css")]).unwrap();

        assert_eq!(sorted(&stream), ["main.css", "nested/more.css"]);
        assert!(stream.assets().iter().all(|a| a.base == root.join("app/styles")));
    }

    #[test]
    fn test_src_negation_and_dotfiles() {
        let (_guard, root) = fixture();
        let patterns = [format!("{root}/app/*.*"), format!("!{root}/app/*.html")];

        assert_eq!(sorted(&Stream::src(&patterns).unwrap()), ["robots.txt"]);
        assert_eq!(
            sorted(&Stream::src_all(&patterns).unwrap()),
            [".htaccess", "robots.txt"]
        );
    }

    #[test]
    fn test_src_literal_file() {
        let (_guard, root) = fixture();
        let stream = Stream::src([format!("{root}/app/index.html")]).unwrap();

        assert_eq!(sorted(&stream), ["index.html"]);
    }

    #[test]
    fn test_pipe_if_and_dest() {
        let (_guard, root) = fixture();
        let upper = |mut asset: Asset| -> anyhow::Result<Asset> {
            asset.data = asset.text()?.to_uppercase().into_bytes();
            Ok(asset)
        };

        let out = root.join("dist");
        Stream::src([format!("{root}/app/*.*")])
            .unwrap()
            .pipe_if("*.txt", &upper)
            .unwrap()
            .dest(&out)
            .unwrap();

        assert_eq!(fs::read_to_string(out.join("robots.txt")).unwrap(), "USER-AGENT: *");
        assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "<html></html>");
    }

    #[test]
    fn test_transform_error_names_file() {
        let (_guard, root) = fixture();
        let fail = |_: Asset| -> anyhow::Result<Asset> { anyhow::bail!("broken") };

        let err = Stream::src([format!("{root}/app/index.html")])
            .unwrap()
            .pipe(&fail)
            .unwrap_err();

        assert!(err.to_string().contains("index.html"));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_filter() {
        let stream = Stream::from_assets(vec![
            Asset::new("app", "a.js", vec![]),
            Asset::new("app", "b.css", vec![]),
        ])
        .filter("*.css")
        .unwrap();

        assert_eq!(stream.paths(), vec![Utf8Path::new("b.css")]);
    }
}
