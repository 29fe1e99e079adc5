//! The task graph of a typical front-end web app.
//!
//! | task        | depends on                                 |
//! |-------------|--------------------------------------------|
//! | `clean`     |                                            |
//! | `styles`    |                                            |
//! | `lint`      |                                            |
//! | `lint:test` |                                            |
//! | `wiredep`   |                                            |
//! | `html`      | `styles`                                   |
//! | `images`    |                                            |
//! | `fonts`     |                                            |
//! | `extras`    |                                            |
//! | `build`     | `wiredep`, `html`, `images`, `fonts`, `extras` |
//! | `default`   | `clean`, `build`                           |
//!
//! plus the serve targets `serve`, `serve:dist` and `serve:test`.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::blueprint::Blueprint;
use crate::core::TaskContext;
use crate::engine::{Serve, TaskGraph, WatchRule};
use crate::error::TessenError;
use crate::stream::{Asset, Stream};
use crate::transform::{Bundle, Lint, Tool};

const NONE: [&str; 0] = [];

const FONT_EXTENSIONS: [&str; 5] = ["eot", "svg", "ttf", "woff", "woff2"];

/// Where things live, and which external programs to call.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Project root, the last place bundled references are looked up in.
    pub root: Utf8PathBuf,
    /// Sources.
    pub app: Utf8PathBuf,
    /// Intermediate output served during development.
    pub tmp: Utf8PathBuf,
    /// Production output.
    pub dist: Utf8PathBuf,
    pub test: Utf8PathBuf,
    pub bower_components: Utf8PathBuf,
    pub bower_json: Utf8PathBuf,
    pub port: u16,
    pub tools: Tools,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            root: ".".into(),
            app: "app".into(),
            tmp: ".tmp".into(),
            dist: "dist".into(),
            test: "test".into(),
            bower_components: "bower_components".into(),
            bower_json: "bower.json".into(),
            port: 9000,
            tools: Tools::default(),
        }
    }
}

impl Layout {
    /// The default layout below `root`.
    pub fn rooted(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        let default = Self::default();

        Self {
            root: root.to_owned(),
            app: root.join(default.app),
            tmp: root.join(default.tmp),
            dist: root.join(default.dist),
            test: root.join(default.test),
            bower_components: root.join(default.bower_components),
            bower_json: root.join(default.bower_json),
            ..default
        }
    }
}

/// External programs used by the recipe. Transforms which are `None` are
/// skipped and the files pass through unchanged.
#[derive(Debug, Clone)]
pub struct Tools {
    pub autoprefix: Option<Tool>,
    pub minify_js: Option<Tool>,
    pub minify_html: Option<Tool>,
    pub lint: Lint,
    pub lint_test: Lint,
    /// Called once per HTML file with `--src <file>` appended.
    pub wiredep: Option<Tool>,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            autoprefix: None,
            minify_js: None,
            minify_html: None,
            lint: Lint::new("eslint"),
            lint_test: Lint::new("eslint").args(["--env", "mocha"]),
            wiredep: Some(Tool::new("wiredep").args(["--ignorePath", r"^(\.\./)*\.\."])),
        }
    }
}

/// Builds the complete web app graph.
pub fn webapp(layout: &Layout) -> Result<TaskGraph, TessenError> {
    Ok(blueprint(layout)?.finish()?)
}

/// Registers the web app tasks and serve targets on a new blueprint, so more
/// can be added before it is finished.
pub fn blueprint(layout: &Layout) -> Result<Blueprint, TessenError> {
    let layout = Arc::new(layout.clone());
    let mut config = Blueprint::new();

    // `default` lists `clean` first, and ties are broken by registration
    // order, so `clean` has to be registered before anything it could wipe.
    let l = layout.clone();
    config.register("clean", NONE, move |_| {
        crate::io::clean([&l.tmp, &l.dist])?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register("styles", NONE, move |ctx| styles(&l, ctx))?;

    let l = layout.clone();
    config.register("lint", NONE, move |ctx| {
        let stream = Stream::src([format!("{}/scripts/**/*.js", l.app)])?;
        l.tools.lint.check(&stream, ctx.env.mode)?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register("lint:test", NONE, move |ctx| {
        let stream = Stream::src([format!("{}/spec/**/*.js", l.test)])?;
        l.tools.lint_test.check(&stream, ctx.env.mode)?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register_async("wiredep", NONE, move |_| {
        let l = l.clone();
        async move { wiredep(&l).await }
    })?;

    let l = layout.clone();
    config.register("html", ["styles"], move |_| html(&l))?;

    let l = layout.clone();
    config.register("images", NONE, move |_| {
        let images = Stream::src([format!("{}/images/**/*", l.app)])?;

        #[cfg(feature = "images")]
        let images = images.pipe(&crate::transform::Optimize::new())?;

        images.dest(l.dist.join("images"))?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register("fonts", NONE, move |_| {
        let bower = FONT_EXTENSIONS.map(|ext| format!("{}/**/fonts/*.{ext}", l.bower_components));
        let flatten = |mut asset: Asset| -> anyhow::Result<Asset> {
            if let Some(name) = asset.path.file_name() {
                asset.path = name.into();
            }
            Ok(asset)
        };

        Stream::src(bower)?
            .pipe(&flatten)?
            .merge(Stream::src([format!("{}/fonts/**/*", l.app)])?)
            .dest(l.tmp.join("fonts"))?
            .dest(l.dist.join("fonts"))?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register("extras", NONE, move |_| {
        Stream::src_all([format!("{}/*.*", l.app), format!("!{}/*.html", l.app)])?
            .dest(&l.dist)?;
        Ok(())
    })?;

    let l = layout.clone();
    config.register(
        "build",
        ["wiredep", "html", "images", "fonts", "extras"],
        move |_| {
            crate::io::report_size(&l.dist)?;
            Ok(())
        },
    )?;

    config.register("default", ["clean", "build"], |_| Ok(()))?;

    let app = &layout.app;
    let tmp = &layout.tmp;

    config.serve(
        "serve",
        Serve::new()
            .requires(["styles", "fonts"])
            .port(layout.port)
            .base_dir(tmp)
            .base_dir(app)
            .route("/bower_components", &layout.bower_components)
            .watch(WatchRule::reload([
                format!("{app}/*.html"),
                format!("{app}/scripts/**/*.js"),
                format!("{app}/images/**/*"),
                format!("{tmp}/fonts/**/*"),
            ])?)
            .watch(WatchRule::tasks([format!("{app}/styles/**/*.css")], ["styles"])?)
            .watch(WatchRule::tasks([format!("{app}/fonts/**/*")], ["fonts"])?)
            .watch(WatchRule::tasks([layout.bower_json.as_str()], ["wiredep", "fonts"])?),
    )?;

    config.serve(
        "serve:dist",
        Serve::new().port(layout.port).base_dir(&layout.dist),
    )?;

    let spec = format!("{}/spec/**/*.js", layout.test);
    config.serve(
        "serve:test",
        Serve::new()
            .port(layout.port)
            .base_dir(&layout.test)
            .route("/bower_components", &layout.bower_components)
            .watch(WatchRule::reload([&spec])?)
            .watch(WatchRule::tasks([&spec], ["lint:test"])?),
    )?;

    Ok(config)
}

fn styles(layout: &Layout, ctx: &TaskContext) -> anyhow::Result<()> {
    let stream = Stream::src([format!("{}/styles/*.css", layout.app)])?;

    #[cfg(feature = "styles")]
    let stream = stream.pipe(&crate::transform::Styles::new())?;

    let stream = match &layout.tools.autoprefix {
        Some(tool) => stream.pipe(tool)?,
        None => stream,
    };

    let stream = stream.dest(layout.tmp.join("styles"))?;
    ctx.inject_css(stream.paths().iter().map(|path| format!("styles/{path}")));

    Ok(())
}

/// Pages are bundled first. Scripts and styles referenced from build blocks
/// are joined into the files the blocks name, then minified along with the
/// pages.
fn html(layout: &Layout) -> anyhow::Result<()> {
    let pages = Stream::src([format!("{}/*.html", layout.app)])?;
    let bundle = Bundle::new([&layout.tmp, &layout.app, &layout.root]);
    let (pages, bundles) = bundle.apply(pages)?;

    let bundles = match &layout.tools.minify_js {
        Some(tool) => bundles.pipe_if("*.js", tool)?,
        None => bundles,
    };

    #[cfg(feature = "styles")]
    let bundles = bundles.pipe_if("*.css", &crate::transform::Styles::new().compressed())?;

    let pages = match &layout.tools.minify_html {
        Some(tool) => pages.pipe(tool)?,
        None => pages,
    };

    pages.merge(bundles).dest(&layout.dist)?;

    Ok(())
}

async fn wiredep(layout: &Layout) -> anyhow::Result<()> {
    let Some(tool) = &layout.tools.wiredep else {
        return Ok(());
    };

    if !layout.bower_json.exists() {
        tracing::info!("no {}, nothing to inject", layout.bower_json);
        return Ok(());
    }

    for page in Stream::src([format!("{}/*.html", layout.app)])?.assets() {
        let status = tokio::process::Command::new(tool.program())
            .args(tool.arguments())
            .arg("--src")
            .arg(page.source())
            .status()
            .await
            .map_err(|e| anyhow::anyhow!("couldn't start '{}': {e}", tool.program()))?;

        anyhow::ensure!(
            status.success(),
            "'{}' exited with {status} on {}",
            tool.program(),
            page.source()
        );
    }

    Ok(())
}
