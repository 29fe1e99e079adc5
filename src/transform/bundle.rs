use std::collections::HashSet;
use std::fs;
use std::sync::LazyLock;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};

use crate::error::StreamError;
use crate::stream::{Asset, Stream};

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(js|css)\s+(\S+)\s*-->(.*?)<!--\s*endbuild\s*-->")
        .expect("build block pattern")
});

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\b[^>]*\ssrc\s*=\s*["']([^"']+)["']"#).expect("script pattern")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\b[^>]*\shref\s*=\s*["']([^"']+)["']"#).expect("link pattern")
});

/// Concatenates the files referenced between build comments of HTML pages.
///
/// ```html
/// <!-- build:js scripts/vendor.js -->
/// <script src="/bower_components/jquery/dist/jquery.js"></script>
/// <script src="scripts/plugin.js"></script>
/// <!-- endbuild -->
/// ```
///
/// The block is replaced by a single tag pointing at `scripts/vendor.js`, and
/// the joined file becomes a new asset at that path. References are looked up
/// in each search directory in turn.
#[derive(Debug, Clone)]
pub struct Bundle {
    search: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Js,
    Css,
}

impl Bundle {
    pub fn new<I, P>(search: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            search: search.into_iter().map(Into::into).collect(),
        }
    }

    /// Rewrites `pages` and returns them together with the bundles they
    /// reference. A bundle named by several pages is built once, from the
    /// first page which names it.
    pub fn apply(&self, pages: Stream) -> Result<(Stream, Stream), StreamError> {
        let mut seen = HashSet::new();
        let mut rewritten = Vec::with_capacity(pages.len());
        let mut bundles = Vec::new();

        for page in pages.assets() {
            let source = page.source().to_string();
            let (html, found) = self
                .rewrite(page)
                .map_err(|e| StreamError::Transform(source, e))?;

            for bundle in found {
                if seen.insert(bundle.path.clone()) {
                    bundles.push(bundle);
                }
            }

            rewritten.push(Asset::new(page.base.clone(), page.path.clone(), html.into_bytes()));
        }

        Ok((Stream::from_assets(rewritten), Stream::from_assets(bundles)))
    }

    fn rewrite(&self, page: &Asset) -> anyhow::Result<(String, Vec<Asset>)> {
        let mut bundles = Vec::new();
        let mut error = None;

        let html = BLOCK.replace_all(page.text()?, |caps: &Captures| {
            let kind = match &caps[1] {
                "js" => Kind::Js,
                _ => Kind::Css,
            };
            let target = &caps[2];

            match self.concat(kind, &caps[3]) {
                Ok(data) => bundles.push(Asset::new("", target.trim_start_matches('/'), data)),
                Err(e) => {
                    error.get_or_insert(e.context(format!("in build block for {target}")));
                }
            }

            match kind {
                Kind::Js => format!(r#"<script src="{target}"></script>"#),
                Kind::Css => format!(r#"<link rel="stylesheet" href="{target}">"#),
            }
        });

        match error {
            Some(e) => Err(e),
            None => Ok((html.into_owned(), bundles)),
        }
    }

    fn concat(&self, kind: Kind, block: &str) -> anyhow::Result<Vec<u8>> {
        let pattern = match kind {
            Kind::Js => &*SCRIPT_SRC,
            Kind::Css => &*LINK_HREF,
        };

        let mut data = Vec::new();
        for caps in pattern.captures_iter(block) {
            let path = self.resolve(&caps[1])?;
            let mut contents = fs::read(&path).with_context(|| format!("couldn't read {path}"))?;

            if !data.is_empty() {
                data.push(b'\n');
            }
            data.append(&mut contents);
        }

        Ok(data)
    }

    /// The first search directory which has `reference` wins.
    fn resolve(&self, reference: &str) -> anyhow::Result<Utf8PathBuf> {
        let reference = reference.split(['?', '#']).next().unwrap_or(reference);
        let reference = Utf8Path::new(reference.trim_start_matches('/'));

        self.search
            .iter()
            .map(|dir| dir.join(reference))
            .find(|path| path.is_file())
            .with_context(|| format!("couldn't find {reference} in {:?}", self.search))
    }
}
