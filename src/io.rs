use std::fmt::Display;
use std::fs;
use std::io::{ErrorKind, Write};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use flate2::Compression;
use flate2::write::GzEncoder;
use indicatif::HumanBytes;

use crate::error::ClearError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete each of `dirs` if it exists. Missing directories are not an error,
/// so cleaning twice in a row is a no-op the second time.
pub fn clean<I, P>(dirs: I) -> Result<(), ClearError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Utf8Path>,
{
    let s = Instant::now();
    let mut removed = Vec::new();

    for dir in dirs {
        let dir = dir.as_ref();
        match fs::remove_dir_all(dir) {
            Ok(()) => removed.push(dir.to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ClearError(dir.to_string(), e)),
        }
    }

    if removed.is_empty() {
        tracing::debug!("nothing to clean");
    } else {
        tracing::info!("cleaned {} {}", removed.join(", "), as_overhead(s));
    }

    Ok(())
}

/// Splits a glob pattern into its static directory prefix and the rest.
///
/// `app/styles/**/*.css` becomes `("app/styles", "**/*.css")`, a pattern
/// without any wildcard is all prefix.
pub fn split_glob(pattern: &str) -> (Utf8PathBuf, String) {
    let is_magic = |part: &str| part.contains(['*', '?', '[', '{']);

    let parts: Vec<&str> = pattern.split('/').collect();
    let split = parts.iter().position(|p| is_magic(p)).unwrap_or(parts.len());

    let root = parts[..split].join("/");
    let rest = parts[split..].join("/");

    (Utf8PathBuf::from(root), rest)
}

/// Total size of all files under `dir`, following no symlinks.
pub fn dir_size(dir: &Utf8Path) -> std::io::Result<u64> {
    sum_files(dir, &|_, len| Ok(len))
}

/// Total size of all files under `dir`, each compressed on its own with gzip.
pub fn gzip_size(dir: &Utf8Path) -> std::io::Result<u64> {
    sum_files(dir, &|path, _| gzipped_len(&fs::read(path)?))
}

fn gzipped_len(data: &[u8]) -> std::io::Result<u64> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?.len() as u64)
}

fn sum_files<F>(dir: &Utf8Path, size: &F) -> std::io::Result<u64>
where
    F: Fn(&Utf8Path, u64) -> std::io::Result<u64>,
{
    let mut total = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filetype = entry.file_type()?;
        let path = Utf8PathBuf::try_from(entry.path()).map_err(std::io::Error::other)?;
        if filetype.is_dir() {
            total += sum_files(&path, size)?;
        } else if filetype.is_file() {
            total += size(&path, entry.metadata()?.len())?;
        }
    }

    Ok(total)
}

/// Size of a build output directory, raw and gzipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub raw: u64,
    pub gzip: u64,
}

/// Logs the size of a build output directory. A build which wrote nothing
/// leaves no directory behind, that counts as empty.
pub fn report_size(dir: &Utf8Path) -> std::io::Result<Size> {
    let size = match dir_size(dir) {
        Ok(raw) => Size {
            raw,
            gzip: gzip_size(dir)?,
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Size::default(),
        Err(e) => return Err(e),
    };

    tracing::info!(
        "build complete: {} {} (gzip {})",
        dir,
        ANSI_BLUE.apply_to(HumanBytes(size.raw)),
        HumanBytes(size.gzip)
    );

    Ok(size)
}
