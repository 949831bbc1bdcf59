use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ohdm_tiles::{
    CacheNamespace, CommandEngine, DiskCache, JobStatus, PreviewEngine, RenderEngine,
    RenderTask, RendererConfig, StyleResolver, TileCache, TileRenderer, TileRequest, TimeLimits,
};
use ohdm_tiles::task::JobStore;

#[derive(Parser)]
#[command(author, version, about = "Render historical map tiles for a date", long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(short, long, default_value = ".cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one tile and write it to a file
    Render {
        #[command(flatten)]
        tile: TileArgs,

        /// Output PNG file
        #[arg(short, long, default_value = "tile.png")]
        output: PathBuf,
    },

    /// Render one tile as a background job and store it in the cache
    Submit {
        #[command(flatten)]
        tile: TileArgs,

        /// Cache key for the result (random if omitted)
        #[arg(short, long)]
        key: Option<String>,

        /// Soft time limit in seconds
        #[arg(long, env = "TILE_GENERATOR_SOFT_TIMEOUT", default_value_t = 30)]
        soft_timeout: u64,

        /// Hard time limit in seconds
        #[arg(long, env = "TILE_GENERATOR_HARD_TIMEOUT", default_value_t = 60)]
        hard_timeout: u64,
    },

    /// Show the status of a job
    Status {
        /// Job cache key
        key: String,
    },

    /// Write a finished job's tile to a file
    Fetch {
        /// Job cache key
        key: String,

        /// Output PNG file
        #[arg(short, long, default_value = "tile.png")]
        output: PathBuf,
    },

    /// Clear the cache
    ClearCache,
}

#[derive(Args)]
struct TileArgs {
    /// Date to render, YYYY-MM-DD
    #[arg(short, long)]
    date: NaiveDate,

    /// Zoom level
    #[arg(short, long)]
    zoom: u32,

    /// Tile column
    #[arg(short = 'x', long)]
    tile_x: f64,

    /// Tile row
    #[arg(short = 'y', long)]
    tile_y: f64,

    /// Path to the style template
    #[arg(short, long)]
    style: PathBuf,

    /// Directory that relative style resources resolve against
    #[arg(long, env = "OSM_CARTO_PATH")]
    data_root: PathBuf,

    /// Tile width in pixels
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Tile height in pixels
    #[arg(long, default_value_t = 256)]
    height: u32,

    /// External renderer program (built-in preview engine if omitted)
    #[arg(long)]
    renderer: Option<PathBuf>,

    /// Extra argument for the external renderer, repeatable
    #[arg(long = "renderer-arg", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Render the style for every request instead of caching it per date
    #[arg(long)]
    no_style_cache: bool,

    /// Scratch directory for render artifacts
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

impl TileArgs {
    fn request(&self) -> Result<TileRequest> {
        let template = fs::read_to_string(&self.style)
            .with_context(|| format!("Failed to read style template {:?}", self.style))?;

        Ok(TileRequest::new(self.zoom, self.tile_x, self.tile_y)
            .with_date(self.date)
            .with_style_template(template)
            .with_data_root(&self.data_root)
            .with_size(self.width, self.height))
    }

    fn renderer(&self, cache: Arc<dyn TileCache>) -> Result<TileRenderer> {
        let engine: Arc<dyn RenderEngine> = match &self.renderer {
            Some(program) => {
                Arc::new(CommandEngine::new(program).with_args(self.renderer_args.iter().cloned()))
            }
            None => Arc::new(PreviewEngine::new()),
        };

        let mut config = RendererConfig {
            use_style_cache: !self.no_style_cache,
            ..RendererConfig::default()
        };
        if let Some(scratch_dir) = &self.scratch_dir {
            config.scratch_dir = scratch_dir.clone();
        }

        let styles = StyleResolver::new(CacheNamespace::new(cache, "style"));
        TileRenderer::with_config(styles, engine, config).context("Failed to set up renderer")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Parse command line arguments
    let cli = Cli::parse();

    let disk_cache = Arc::new(DiskCache::new(&cli.cache_dir).context("Failed to create cache")?);
    let cache: Arc<dyn TileCache> = disk_cache.clone();

    match &cli.command {
        Commands::Render { tile, output } => {
            let renderer = tile.renderer(Arc::clone(&cache))?;
            let request = tile.request()?;

            info!("Rendering z={} x={} y={} for {}", tile.zoom, tile.tile_x, tile.tile_y, tile.date);
            let bytes = tokio::task::spawn_blocking(move || renderer.render_tile(&request))
                .await
                .context("Render worker failed")?
                .context("Failed to render tile")?;

            fs::write(output, &bytes)
                .with_context(|| format!("Failed to write tile to {:?}", output))?;
            info!("Wrote {} bytes to {}", bytes.len(), output.display());
        }

        Commands::Submit {
            tile,
            key,
            soft_timeout,
            hard_timeout,
        } => {
            let limits = TimeLimits::from_secs(*soft_timeout, *hard_timeout)
                .context("Invalid time limits")?;
            let renderer = tile.renderer(Arc::clone(&cache))?;
            let task = RenderTask::new(Arc::new(renderer), Arc::clone(&cache), limits);

            let key = key.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let handle = task.submit(tile.request()?, key)?;
            println!("{}", handle.key());

            match handle.wait().await {
                Ok(key) => info!("Job {} finished", key),
                Err(e) => bail!("Job failed: {}", e),
            }
        }

        Commands::Status { key } => {
            let store = JobStore::new(cache);
            match store.status(key).context("Failed to read job status")? {
                Some(JobStatus::Pending) => println!("pending"),
                Some(JobStatus::Ready) => println!("ready"),
                Some(JobStatus::Failed { reason }) => println!("failed: {}", reason),
                None => println!("unknown"),
            }
        }

        Commands::Fetch { key, output } => {
            let store = JobStore::new(cache);
            let Some(bytes) = store.fetch(key).context("Failed to read tile")? else {
                bail!("No tile stored under {}", key);
            };
            fs::write(output, &bytes)
                .with_context(|| format!("Failed to write tile to {:?}", output))?;
            info!("Wrote {} bytes to {}", bytes.len(), output.display());
        }

        Commands::ClearCache => {
            info!("Clearing cache");
            disk_cache.clear().context("Failed to clear cache")?;
            info!("Cache cleared");
        }
    }

    Ok(())
}
