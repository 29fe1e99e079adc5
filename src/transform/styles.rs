use camino::Utf8PathBuf;

use crate::stream::{Asset, Transform};

/// Compiles stylesheets with `grass`. Plain CSS passes through normalized,
/// SCSS is compiled, and the output is renamed to `.css`.
#[derive(Debug, Clone, Default)]
pub struct Styles {
    load_paths: Vec<Utf8PathBuf>,
    compressed: bool,
}

impl Styles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minified output.
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Adds a directory `@use` and `@import` are resolved against.
    pub fn load_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

impl Transform for Styles {
    fn apply(&self, asset: Asset) -> anyhow::Result<Asset> {
        let style = match self.compressed {
            true => grass::OutputStyle::Compressed,
            false => grass::OutputStyle::Expanded,
        };

        let mut options = grass::Options::default().style(style);
        if let Some(parent) = asset.source().parent() {
            options = options.load_path(parent);
        }
        for path in &self.load_paths {
            options = options.load_path(path);
        }

        let css = grass::from_string(asset.text()?.to_string(), &options)?;

        Ok(Asset {
            data: css.into_bytes(),
            ..asset
        }
        .with_extension("css"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_scss() {
        let asset = Asset::new("app/styles", "main.scss", b"$c: red; a { b { color: $c; } }".to_vec());
        let out = Styles::new().apply(asset).unwrap();

        assert_eq!(out.path, "main.css");
        assert!(out.text().unwrap().contains("a b {"));
        assert!(out.text().unwrap().contains("color: red;"));
    }

    #[test]
    fn test_compressed() {
        let asset = Asset::new("app/styles", "main.css", b"a {\n  color: red;\n}\n".to_vec());
        let out = Styles::new().compressed().apply(asset).unwrap();

        assert_eq!(out.text().unwrap().trim(), "a{color:red}");
    }

    #[test]
    fn test_syntax_error() {
        let asset = Asset::new("app/styles", "main.css", b"a { color: red;".to_vec());
        assert!(Styles::new().apply(asset).is_err());
    }
}
