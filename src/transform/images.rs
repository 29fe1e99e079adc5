use std::fs;
use std::io::Cursor;

use camino::Utf8PathBuf;
use image::ImageFormat;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;

use crate::core::Hash32;
use crate::stream::{Asset, Transform};

/// Re-encodes images losslessly, keeping whichever of the two versions is
/// smaller.
///
/// Only still PNG and WebP images are touched, the encoders for both are
/// lossless. Everything else (JPEG, GIF, animations, SVG) is passed through
/// byte for byte. Results are cached on disk keyed by the hash of the input,
/// so an unchanged image is never processed twice.
#[derive(Debug, Clone)]
pub struct Optimize {
    cache: Utf8PathBuf,
}

impl Default for Optimize {
    fn default() -> Self {
        Self {
            cache: Utf8PathBuf::from(".cache/images"),
        }
    }
}

impl Optimize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cache: cache.into(),
        }
    }
}

impl Transform for Optimize {
    fn apply(&self, mut asset: Asset) -> anyhow::Result<Asset> {
        let format = match lossless_format(&asset.data) {
            Ok(Some(format)) => format,
            Ok(None) => return Ok(asset),
            Err(e) => {
                tracing::warn!("keeping {} as is: {e}", asset.source());
                return Ok(asset);
            }
        };

        let hash = Hash32::hash(&asset.data).to_hex();
        let path_cache = self
            .cache
            .join(&hash)
            .with_extension(asset.path.extension().unwrap_or("bin"));

        // If this hash exists it means the work is already done.
        if path_cache.exists() {
            asset.data = fs::read(&path_cache)?;
            return Ok(asset);
        }

        match process_image(&asset.data, format) {
            Ok(buffer) if buffer.len() < asset.data.len() => asset.data = buffer,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("keeping {} as is: {e}", asset.source());
                return Ok(asset);
            }
        }

        fs::create_dir_all(&self.cache)?;
        fs::write(&path_cache, &asset.data)?;

        Ok(asset)
    }
}

/// The format of `buffer` if it can be re-encoded without losing anything.
fn lossless_format(buffer: &[u8]) -> anyhow::Result<Option<ImageFormat>> {
    let Ok(format) = image::guess_format(buffer) else {
        return Ok(None);
    };

    let still = match format {
        ImageFormat::Png => !PngDecoder::new(Cursor::new(buffer))?.is_apng()?,
        ImageFormat::WebP => !WebPDecoder::new(Cursor::new(buffer))?.has_animation(),
        _ => false,
    };

    Ok(still.then_some(format))
}

fn process_image(buffer: &[u8], format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory_with_format(buffer, format)?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)?;

    Ok(out.into_inner())
}
