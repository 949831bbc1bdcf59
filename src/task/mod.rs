use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheNamespace, TileCache};
use crate::envelope::TileRequest;
use crate::error::{Result, TileError};
use crate::render::TileRenderer;

pub const RESULT_NAMESPACE: &str = "tile";
pub const STATUS_NAMESPACE: &str = "status";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeLimits {
    pub soft: Duration,
    pub hard: Duration,
}

impl TimeLimits {
    pub fn new(soft: Duration, hard: Duration) -> Result<Self> {
        if soft.is_zero() {
            return Err(TileError::Configuration(
                "soft time limit must be positive".to_string(),
            ));
        }
        if hard <= soft {
            return Err(TileError::Configuration(format!(
                "hard time limit {:?} must exceed soft time limit {:?}",
                hard, soft
            )));
        }
        Ok(Self { soft, hard })
    }

    pub fn from_secs(soft: u64, hard: u64) -> Result<Self> {
        Self::new(Duration::from_secs(soft), Duration::from_secs(hard))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Ready,
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Handle to a submitted job.
pub struct RenderHandle {
    key: String,
    join: JoinHandle<Result<String>>,
}

impl RenderHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the job and return its key, or the error it failed with.
    pub async fn wait(self) -> Result<String> {
        self.join
            .await
            .map_err(|e| TileError::RenderEngine(format!("render job did not complete: {}", e)))?
    }
}

/// Rendered tiles and job status, keyed by job key.
#[derive(Clone)]
pub struct JobStore {
    results: CacheNamespace,
    statuses: CacheNamespace,
}

impl JobStore {
    pub fn new(cache: Arc<dyn TileCache>) -> Self {
        Self {
            results: CacheNamespace::new(Arc::clone(&cache), RESULT_NAMESPACE),
            statuses: CacheNamespace::new(cache, STATUS_NAMESPACE),
        }
    }

    pub fn status(&self, key: &str) -> Result<Option<JobStatus>> {
        self.statuses
            .get(key)?
            .map(|raw| {
                serde_json::from_slice(&raw)
                    .map_err(|e| TileError::Cache(format!("bad status for {}: {}", key, e)))
            })
            .transpose()
    }

    pub fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.results.get(key)
    }

    pub fn set_status(&self, key: &str, status: &JobStatus) -> Result<()> {
        let raw = serde_json::to_vec(status)
            .map_err(|e| TileError::Cache(format!("failed to encode status: {}", e)))?;
        self.statuses.set(key, &raw)
    }

    /// Drop any tile left by an earlier job on `key` and mark it pending.
    pub fn reset(&self, key: &str) -> Result<()> {
        self.results.remove(key)?;
        self.set_status(key, &JobStatus::Pending)?;
        debug!("Render job {} is pending", key);
        Ok(())
    }

    /// Store the tile, then mark it ready, so a reader that sees `ready`
    /// always finds the bytes.
    pub fn publish(&self, key: &str, tile: &[u8]) -> Result<()> {
        self.results.set(key, tile)?;
        self.set_status(key, &JobStatus::Ready)?;
        info!("Render job {} is ready", key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RenderTask {
    renderer: Arc<TileRenderer>,
    store: JobStore,
    limits: TimeLimits,
}

impl RenderTask {
    pub fn new(renderer: Arc<TileRenderer>, cache: Arc<dyn TileCache>, limits: TimeLimits) -> Self {
        Self {
            renderer,
            store: JobStore::new(cache),
            limits,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn limits(&self) -> TimeLimits {
        self.limits
    }

    /// Enqueue a render and return at once. The key is marked pending
    /// before this returns.
    ///
    /// Submitting a key again clears whatever the previous job stored.
    pub fn submit(&self, request: TileRequest, key: impl Into<String>) -> Result<RenderHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TileError::Configuration(format!("render jobs need a tokio runtime: {}", e))
        })?;
        let key = key.into();
        self.store.reset(&key)?;

        let task = self.clone();
        let job_key = key.clone();
        let join = runtime.spawn(async move { task.execute(request, job_key).await });

        Ok(RenderHandle { key, join })
    }

    /// Render inline under the time limits and publish the result.
    pub async fn run(&self, request: TileRequest, key: impl Into<String>) -> Result<String> {
        let key = key.into();
        self.store.reset(&key)?;
        self.execute(request, key).await
    }

    pub fn status(&self, key: &str) -> Result<Option<JobStatus>> {
        self.store.status(key)
    }

    pub fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.fetch(key)
    }

    fn fail(&self, key: &str, error: TileError) -> Result<String> {
        warn!("Render job {} failed: {}", key, error);
        let status = JobStatus::Failed {
            reason: error.to_string(),
        };
        if let Err(e) = self.store.set_status(key, &status) {
            warn!("Could not record failure of render job {}: {}", key, e);
        }
        Err(error)
    }

    // Only this supervisor writes to the cache. A worker abandoned at the
    // hard limit has nowhere to publish what it returns.
    async fn execute(&self, request: TileRequest, key: String) -> Result<String> {
        let limits = self.limits;
        let cancel = CancellationToken::new();

        let renderer = Arc::clone(&self.renderer);
        let worker_cancel = cancel.clone();
        let mut worker =
            tokio::task::spawn_blocking(move || renderer.render_tile_with(&request, &worker_cancel));

        let supervised = tokio::time::timeout(limits.hard, async {
            tokio::select! {
                joined = &mut worker => joined,
                _ = tokio::time::sleep(limits.soft) => {
                    warn!(
                        "Render job {} passed the {:?} soft limit, cancelling",
                        key, limits.soft
                    );
                    cancel.cancel();
                    (&mut worker).await
                }
            }
        })
        .await;

        let rendered = match supervised {
            Err(_) => {
                // The blocking thread cannot be killed; it is detached and
                // whatever it returns is dropped with the handle.
                cancel.cancel();
                return self.fail(&key, TileError::Timeout { limit: limits.hard });
            }
            Ok(Err(join_error)) => {
                return self.fail(
                    &key,
                    TileError::RenderEngine(format!("render worker crashed: {}", join_error)),
                );
            }
            Ok(Ok(Err(TileError::Cancelled))) => {
                return self.fail(&key, TileError::Timeout { limit: limits.soft });
            }
            Ok(Ok(Err(e))) => return self.fail(&key, e),
            Ok(Ok(Ok(bytes))) => bytes,
        };

        if let Err(e) = self.store.publish(&key, &rendered) {
            return self.fail(&key, e);
        }
        debug!("Render job {} stored {} bytes", key, rendered.len());
        Ok(key)
    }
}
