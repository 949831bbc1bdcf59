use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::debug;

use crate::error::{Result, TileError};
use crate::projection::{ProjectionTable, SphericalMercator};

pub const DEFAULT_TILE_SIZE: u32 = 256;

/// One tile to render. `tile_x`/`tile_y` are fractional tile indices so
/// legacy pixel-offset addressing still maps onto the same math.
///
/// `date`, `style_template` and `data_root` are optional here and checked
/// by the renderer, which reports a missing one as a configuration error.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRequest {
    pub date: Option<NaiveDate>,
    pub zoom: u32,
    pub tile_x: f64,
    pub tile_y: f64,
    pub style_template: Option<String>,
    pub data_root: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

impl TileRequest {
    pub fn new(zoom: u32, tile_x: f64, tile_y: f64) -> Self {
        Self {
            date: None,
            zoom,
            tile_x,
            tile_y,
            style_template: None,
            data_root: None,
            width: DEFAULT_TILE_SIZE,
            height: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_style_template(mut self, template: impl Into<String>) -> Self {
        self.style_template = Some(template.into());
        self
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(data_root.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn require_date(&self) -> Result<NaiveDate> {
        self.date
            .ok_or_else(|| TileError::Configuration("request date is not set".to_string()))
    }

    pub fn require_style_template(&self) -> Result<&str> {
        self.style_template
            .as_deref()
            .ok_or_else(|| TileError::Configuration("style template is not set".to_string()))
    }

    pub fn require_data_root(&self) -> Result<&Path> {
        let root = self
            .data_root
            .as_deref()
            .ok_or_else(|| TileError::Configuration("data root is not set".to_string()))?;
        if !root.is_dir() {
            return Err(TileError::Configuration(format!(
                "data root {} is not a directory",
                root.display()
            )));
        }
        Ok(root)
    }

    /// `{date}-{zoom}-{tile_x}-{tile_y}`, unique per tile and date.
    pub fn artifact_stem(&self) -> Result<String> {
        Ok(format!(
            "{}-{}-{}-{}",
            self.require_date()?.format("%Y-%m-%d"),
            self.zoom,
            self.tile_x,
            self.tile_y
        ))
    }
}

/// Axis-aligned rectangle in EPSG:3857 meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoEnvelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl GeoEnvelope {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Finite with positive area.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }
}

/// Build the rendering envelope of `request`.
///
/// The lower-left corner uses row `tile_y + 1` and the upper-right corner
/// row `tile_y`: pixel rows grow southward while projected y grows
/// northward, so the corners come out ordered without swapping.
pub fn build_envelope(table: &ProjectionTable, request: &TileRequest) -> Result<GeoEnvelope> {
    // Reject bad zooms before any projection work.
    table.level(request.zoom)?;

    if request.width == 0 || request.height == 0 {
        return Err(TileError::Coordinate(format!(
            "tile size {}x{} has no area",
            request.width, request.height
        )));
    }

    let width = f64::from(request.width);
    let height = f64::from(request.height);

    let p0 = table.pixel_to_lon_lat(
        (width * request.tile_x, height * (request.tile_y + 1.0)),
        request.zoom,
    )?;
    let p1 = table.pixel_to_lon_lat(
        (width * (request.tile_x + 1.0), height * request.tile_y),
        request.zoom,
    )?;
    let c0 = SphericalMercator::forward(p0.0, p0.1);
    let c1 = SphericalMercator::forward(p1.0, p1.1);

    let envelope = GeoEnvelope {
        min_x: c0.0,
        min_y: c0.1,
        max_x: c1.0,
        max_y: c1.1,
    };

    if !envelope.is_valid() {
        return Err(TileError::Coordinate(format!(
            "tile z={} x={} y={} produced a degenerate envelope {:?}",
            request.zoom, request.tile_x, request.tile_y, envelope
        )));
    }

    debug!(
        "Envelope for z={} x={} y={}: ({:.2}, {:.2}, {:.2}, {:.2})",
        request.zoom,
        request.tile_x,
        request.tile_y,
        envelope.min_x,
        envelope.min_y,
        envelope.max_x,
        envelope.max_y
    );
    Ok(envelope)
}
