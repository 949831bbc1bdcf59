use std::path::Path;

use anyhow::Context;
use image::{ImageFormat, Rgba, RgbaImage};

use super::{RenderEngine, RenderJob};

const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Built-in engine that paints the tile with the style's map
/// `background-color`. No geometry is drawn; it exists so the pipeline can
/// run end to end without an external renderer.
#[derive(Default)]
pub struct PreviewEngine;

impl PreviewEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Reads `background-color="#rrggbb"` from a style document.
fn background_color(style: &str) -> Option<Rgba<u8>> {
    let start = style.find("background-color=\"#")? + "background-color=\"#".len();
    let hex = style.get(start..start + 6)?;
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
    };
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}

impl RenderEngine for PreviewEngine {
    fn render(&self, job: &RenderJob<'_>, output: &Path) -> anyhow::Result<()> {
        let color = background_color(job.style.as_str()).unwrap_or(DEFAULT_BACKGROUND);
        let image = RgbaImage::from_pixel(job.width, job.height, color);
        image
            .save_with_format(output, ImageFormat::Png)
            .with_context(|| format!("Failed to save preview tile to {:?}", output))?;
        Ok(())
    }
}
