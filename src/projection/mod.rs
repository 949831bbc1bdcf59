use std::f64::consts::PI;

use crate::error::{Result, TileError};

pub const DEFAULT_LEVELS: usize = 20;

pub const BASE_TILE_SIZE: f64 = 256.0;

// a = b
pub const EARTH_RADIUS: f64 = 6378137.0;

/// Half the width of the projected world in meters.
pub const WORLD_EXTENT: f64 = PI * EARTH_RADIUS;

// Keeps the forward pixel projection finite at the poles.
const MAX_SIN_LAT: f64 = 0.9999;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionLevel {
    pub pixels_per_degree: f64,
    pub pixels_per_radian: f64,
    pub origin_px: (f64, f64),
    pub world_size_px: f64,
}

/// Immutable table of [`ProjectionLevel`]s for zooms `0..levels`.
#[derive(Clone, Debug)]
pub struct ProjectionTable {
    levels: Vec<ProjectionLevel>,
}

impl Default for ProjectionTable {
    fn default() -> Self {
        Self::new(DEFAULT_LEVELS)
    }
}

impl ProjectionTable {
    pub fn new(levels: usize) -> Self {
        let mut world_size_px = BASE_TILE_SIZE;
        let levels = (0..levels)
            .map(|_| {
                let half = world_size_px / 2.0;
                let level = ProjectionLevel {
                    pixels_per_degree: world_size_px / 360.0,
                    pixels_per_radian: world_size_px / (2.0 * PI),
                    origin_px: (half, half),
                    world_size_px,
                };
                world_size_px *= 2.0;
                level
            })
            .collect();

        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, zoom: u32) -> Result<&ProjectionLevel> {
        self.levels.get(zoom as usize).ok_or_else(|| {
            TileError::Coordinate(format!(
                "zoom {} outside the {} precomputed levels",
                zoom,
                self.levels.len()
            ))
        })
    }

    /// Inverse pixel projection: global pixel at `zoom` to (lon, lat) degrees.
    pub fn pixel_to_lon_lat(&self, px: (f64, f64), zoom: u32) -> Result<(f64, f64)> {
        let level = self.level(zoom)?;
        let (origin_x, origin_y) = level.origin_px;

        let lon = (px.0 - origin_x) / level.pixels_per_degree;
        let g = (px.1 - origin_y) / -level.pixels_per_radian;
        let lat = (2.0 * g.exp().atan() - 0.5 * PI).to_degrees();

        Ok((lon, lat))
    }

    /// Forward pixel projection: (lon, lat) degrees to global pixel at `zoom`.
    /// Latitudes beyond the mercator limit are clamped.
    pub fn lon_lat_to_pixel(&self, lon: f64, lat: f64, zoom: u32) -> Result<(f64, f64)> {
        let level = self.level(zoom)?;
        let (origin_x, origin_y) = level.origin_px;

        let x = origin_x + lon * level.pixels_per_degree;
        let f = lat.to_radians().sin().clamp(-MAX_SIN_LAT, MAX_SIN_LAT);
        let y = origin_y + 0.5 * ((1.0 + f) / (1.0 - f)).ln() * -level.pixels_per_radian;

        Ok((x, y))
    }
}

/// Spherical mercator projection between degrees and EPSG:3857 meters.
pub struct SphericalMercator;

impl SphericalMercator {
    pub fn forward(lon: f64, lat: f64) -> (f64, f64) {
        let x = EARTH_RADIUS * lon.to_radians();
        let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        (x, y)
    }

    pub fn inverse(x: f64, y: f64) -> (f64, f64) {
        let lon = (x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        (lon, lat)
    }
}
