pub mod cache;
pub mod envelope;
pub mod error;
pub mod projection;
pub mod render;
pub mod style;
pub mod task;

pub use cache::{CacheNamespace, DiskCache, MemoryCache, TileCache};
pub use envelope::{GeoEnvelope, TileRequest, build_envelope};
pub use error::{Result, TileError};
pub use projection::{ProjectionLevel, ProjectionTable, SphericalMercator};
pub use render::{CommandEngine, PreviewEngine, RenderEngine, RenderJob, RendererConfig, TileRenderer};
pub use style::{StyleDocument, StyleResolver};
pub use task::{JobStatus, RenderHandle, RenderTask, TimeLimits};
