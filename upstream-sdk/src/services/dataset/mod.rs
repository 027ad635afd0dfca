//! Tiered dataset cache
//!
//! `resolve()` answers with the freshest dataset it can obtain:
//!
//! 1. the remote store, under a bounded timeout;
//! 2. the last value any earlier resolution produced, flagged stale;
//! 3. the copy bundled with the deployment.
//!
//! Only when all three come up empty does it fail with
//! `DatasetError::NoDataAvailable`. A failed attempt never clears a value
//! that was obtained earlier.

mod source;
mod table;

pub use source::{DatasetSource, LocalFileSource, RemoteCsvSource};
pub use table::{CachedDataset, Provenance, Table};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DatasetConfig;
use crate::error::{DatasetError, Result, ServiceError};

/// Successful outcome of `TieredDataCache::resolve`
#[derive(Debug, Clone)]
pub struct Resolution {
    pub dataset: Arc<CachedDataset>,

    /// The remote fetch failed and this value came from memory
    pub stale: bool,
}

impl Resolution {
    pub fn provenance(&self) -> Provenance {
        self.dataset.provenance()
    }
}

/// Process-lifetime dataset cache with remote, memory and local tiers
pub struct TieredDataCache {
    remote: Arc<dyn DatasetSource>,
    local: Arc<dyn DatasetSource>,

    /// Deadline applied to every source fetch
    fetch_timeout: Duration,

    current: RwLock<Option<Arc<CachedDataset>>>,

    /// Serializes resolutions and holds the latest outcome with its generation
    gate: Mutex<Option<(u64, Outcome)>>,

    /// Bumped after every completed resolution
    generation: AtomicU64,
}

type Outcome = std::result::Result<Resolution, DatasetError>;

impl TieredDataCache {
    pub fn new(remote: Arc<dyn DatasetSource>, local: Arc<dyn DatasetSource>) -> Self {
        Self {
            remote,
            local,
            fetch_timeout: Duration::from_secs(10),
            current: RwLock::new(None),
            gate: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Build the HTTP and file tiers described by `config`
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        let remote = RemoteCsvSource::new(config.remote_url.clone(), config.timeout())?;
        let local = LocalFileSource::new(config.local_path.clone());

        Ok(Self::new(Arc::new(remote), Arc::new(local)).with_fetch_timeout(config.timeout()))
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Resolve the dataset through the remote, memory and local tiers
    pub async fn resolve(&self) -> std::result::Result<Resolution, DatasetError> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut last = self.gate.lock().await;

        // A resolution finished while we queued; share its outcome, failures included.
        if let Some((generation, outcome)) = last.as_ref() {
            if *generation != seen {
                return outcome.clone();
            }
        }

        let outcome = self.resolve_tiers().await;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *last = Some((generation, outcome.clone()));

        outcome
    }

    async fn resolve_tiers(&self) -> Outcome {
        let remote_error = match self.fetch_usable(self.remote.as_ref()).await {
            Ok(payload) => {
                let dataset = self.store(payload, Provenance::Remote);
                return Ok(Resolution { dataset, stale: false });
            }
            Err(err) => {
                warn!(source = self.remote.name(), error = %err, "Remote dataset fetch failed");
                err
            }
        };

        if let Some(dataset) = self.snapshot() {
            info!(
                provenance = %dataset.provenance(),
                refreshed_at = %dataset.refreshed_at(),
                "Serving cached dataset"
            );
            return Ok(Resolution { dataset, stale: true });
        }

        match self.fetch_usable(self.local.as_ref()).await {
            Ok(payload) => {
                info!(source = self.local.name(), "Loaded bundled dataset");
                let dataset = self.store(payload, Provenance::Local);
                Ok(Resolution { dataset, stale: false })
            }
            Err(local_error) => {
                warn!(source = self.local.name(), error = %local_error, "Bundled dataset unavailable");
                Err(DatasetError::NoDataAvailable {
                    remote: remote_error.to_string(),
                    local: local_error.to_string(),
                })
            }
        }
    }

    /// Fetch from one tier, treating an empty table as a failure
    async fn fetch_usable(&self, source: &dyn DatasetSource) -> Result<String> {
        let payload = tokio::time::timeout(self.fetch_timeout, source.fetch())
            .await
            .map_err(|_| {
                ServiceError::timeout(format!(
                    "{} dataset fetch exceeded {:?}",
                    source.name(),
                    self.fetch_timeout
                ))
            })??;

        if payload.trim().is_empty() {
            return Err(ServiceError::parsing(format!("{} dataset is empty", source.name())));
        }

        if Table::parse(&payload).is_empty() {
            return Err(ServiceError::parsing(format!("{} dataset has no data rows", source.name())));
        }

        Ok(payload)
    }

    /// Swap in a new snapshot; `refreshed_at` strictly increases
    fn store(&self, payload: String, provenance: Provenance) -> Arc<CachedDataset> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let mut refreshed_at = Utc::now();
        if let Some(previous) = current.as_ref() {
            if refreshed_at <= previous.refreshed_at() {
                refreshed_at = previous.refreshed_at() + chrono::Duration::microseconds(1);
            }
        }

        let dataset = Arc::new(CachedDataset::new(payload, provenance, refreshed_at));
        *current = Some(Arc::clone(&dataset));
        dataset
    }

    /// The cached value, if any load has ever succeeded
    pub fn snapshot(&self) -> Option<Arc<CachedDataset>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Readiness: true once any tier has ever supplied the dataset
    pub fn has_ever_succeeded(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn provenance(&self) -> Provenance {
        self.snapshot()
            .map(|dataset| dataset.provenance())
            .unwrap_or(Provenance::None)
    }

    /// Resolve once and log the outcome; used to load in the background at startup
    pub async fn warm(&self) {
        match self.resolve().await {
            Ok(resolution) => info!(
                provenance = %resolution.provenance(),
                rows = resolution.dataset.table().row_count(),
                "Dataset cache warmed"
            ),
            Err(err) => warn!(error = %err, "Dataset cache warm-up failed; will retry on demand"),
        }
    }
}

impl std::fmt::Debug for TieredDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredDataCache")
            .field("remote", &self.remote.name())
            .field("local", &self.local.name())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("provenance", &self.provenance())
            .finish()
    }
}
