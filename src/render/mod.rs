mod command;
mod preview;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::envelope::{GeoEnvelope, TileRequest, build_envelope};
use crate::error::{Result, TileError};
use crate::projection::{DEFAULT_LEVELS, ProjectionTable};
use crate::style::{StyleDocument, StyleResolver};

pub use command::CommandEngine;
pub use preview::PreviewEngine;

/// Everything a rendering engine needs for one tile.
#[derive(Debug)]
pub struct RenderJob<'a> {
    pub width: u32,
    pub height: u32,
    pub style: &'a StyleDocument,
    pub envelope: GeoEnvelope,
    /// Base directory for resources the style references by relative path.
    pub data_root: &'a Path,
}

/// External rasterizer. Must write a PNG for `job` to `output`.
pub trait RenderEngine: Send + Sync {
    fn render(&self, job: &RenderJob<'_>, output: &Path) -> anyhow::Result<()>;
}

/// Configuration for tile rendering
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub levels: usize,                // Number of precomputed zoom levels
    pub use_style_cache: bool,        // Resolve styles through the style cache
    pub scratch_dir: PathBuf,         // Parent of per-render temp directories
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            use_style_cache: true,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

pub struct TileRenderer {
    projection: Arc<ProjectionTable>,
    styles: StyleResolver,
    engine: Arc<dyn RenderEngine>,
    config: RendererConfig,
}

impl TileRenderer {
    pub fn new(
        projection: Arc<ProjectionTable>,
        styles: StyleResolver,
        engine: Arc<dyn RenderEngine>,
        config: RendererConfig,
    ) -> Result<Self> {
        fs::create_dir_all(&config.scratch_dir)?;
        Ok(Self {
            projection,
            styles,
            engine,
            config,
        })
    }

    /// Build a renderer with its own projection table sized from `config`.
    pub fn with_config(
        styles: StyleResolver,
        engine: Arc<dyn RenderEngine>,
        config: RendererConfig,
    ) -> Result<Self> {
        let projection = Arc::new(ProjectionTable::new(config.levels));
        Self::new(projection, styles, engine, config)
    }

    pub fn projection(&self) -> &ProjectionTable {
        &self.projection
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn render_tile(&self, request: &TileRequest) -> Result<Vec<u8>> {
        self.render_tile_with(request, &CancellationToken::new())
    }

    /// Render `request`, stopping early if `cancel` fires before the
    /// style is resolved or before the engine is invoked.
    pub fn render_tile_with(
        &self,
        request: &TileRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let data_root = request.require_data_root()?;
        let date = request.require_date()?;
        let template = request.require_style_template()?;
        let artifact_name = format!("{}.png", request.artifact_stem()?);

        let envelope = build_envelope(&self.projection, request)?;

        checkpoint(cancel)?;
        let style = self
            .styles
            .resolve(date, template, self.config.use_style_cache)?;
        checkpoint(cancel)?;

        // The directory and everything in it is removed when `scratch` drops,
        // whichever way this function exits.
        let scratch = tempfile::Builder::new()
            .prefix("tile-")
            .tempdir_in(&self.config.scratch_dir)?;
        let artifact = scratch.path().join(&artifact_name);

        let job = RenderJob {
            width: request.width,
            height: request.height,
            style: &style,
            envelope,
            data_root,
        };
        info!("Rendering tile {}", artifact_name);
        self.engine
            .render(&job, &artifact)
            .map_err(|e| TileError::RenderEngine(format!("{:#}", e)))?;

        let bytes = fs::read(&artifact).map_err(|e| {
            TileError::RenderEngine(format!("no readable output at {}: {}", artifact.display(), e))
        })?;
        scratch.close()?;

        debug!("Rendered {} ({} bytes)", artifact_name, bytes.len());
        Ok(bytes)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TileError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::{CacheNamespace, MemoryCache};
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    /// Writes the style text as the "image" and records each job.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        pub calls: AtomicUsize,
        pub envelopes: Mutex<Vec<GeoEnvelope>>,
        pub fail: bool,
        pub delay: Option<std::time::Duration>,
    }

    impl RenderEngine for FakeEngine {
        fn render(&self, job: &RenderJob<'_>, output: &Path) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.envelopes.lock().unwrap().push(job.envelope);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            fs::write(output, job.style.as_str())?;
            if self.fail {
                anyhow::bail!("failed to load style");
            }
            Ok(())
        }
    }

    pub(crate) fn request(data_root: &Path) -> TileRequest {
        TileRequest::new(0, 0.0, 0.0)
            .with_date(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap())
            .with_style_template("valid:{{date}}")
            .with_data_root(data_root)
    }

    fn renderer(engine: Arc<FakeEngine>, scratch: &TempDir) -> TileRenderer {
        let styles = StyleResolver::new(CacheNamespace::new(Arc::new(MemoryCache::new()), "style"));
        let config = RendererConfig {
            scratch_dir: scratch.path().to_path_buf(),
            ..RendererConfig::default()
        };
        TileRenderer::with_config(styles, engine, config).unwrap()
    }

    fn scratch_is_empty(scratch: &TempDir) -> bool {
        fs::read_dir(scratch.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_render_returns_engine_output_and_cleans_up() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let renderer = renderer(engine.clone(), &scratch);

        let bytes = renderer.render_tile(&request(data_root.path())).unwrap();

        assert_eq!(bytes, b"valid:2020-06-15");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        let envelope = engine.envelopes.lock().unwrap()[0];
        assert!((envelope.max_x - 20037508.34).abs() < 0.01);
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn test_engine_failure_still_cleans_up() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine {
            fail: true,
            ..FakeEngine::default()
        });
        let renderer = renderer(engine, &scratch);

        let result = renderer.render_tile(&request(data_root.path()));

        assert!(matches!(result, Err(TileError::RenderEngine(_))));
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn test_missing_fields_fail_before_engine() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let renderer = renderer(engine.clone(), &scratch);

        let mut no_root = request(data_root.path());
        no_root.data_root = None;
        let mut no_date = request(data_root.path());
        no_date.date = None;
        let mut no_template = request(data_root.path());
        no_template.style_template = None;

        for request in [no_root, no_date, no_template] {
            let result = renderer.render_tile(&request);
            assert!(matches!(result, Err(TileError::Configuration(_))));
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_zoom_fails_before_engine() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let renderer = renderer(engine.clone(), &scratch);

        let mut request = request(data_root.path());
        request.zoom = 25;

        let result = renderer.render_tile(&request);
        assert!(matches!(result, Err(TileError::Coordinate(_))));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn test_cancelled_token_stops_before_engine() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let renderer = renderer(engine.clone(), &scratch);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = renderer.render_tile_with(&request(data_root.path()), &cancel);

        assert!(matches!(result, Err(TileError::Cancelled)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_renders_do_not_collide() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let engine = Arc::new(FakeEngine {
            delay: Some(std::time::Duration::from_millis(20)),
            ..FakeEngine::default()
        });
        let renderer = Arc::new(renderer(engine.clone(), &scratch));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let renderer = Arc::clone(&renderer);
                let request = request(data_root.path());
                std::thread::spawn(move || renderer.render_tile(&request))
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap().unwrap(), b"valid:2020-06-15");
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
        assert!(scratch_is_empty(&scratch));
    }
}
