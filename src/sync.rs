//! The cache synchronizer: staged install, atomic promotion, lookup serving.
//!
//! One install pass runs at a time. Serving is read-only against the active
//! generation and may run unbounded, including while an install populates
//! the staging generation. The promotion itself is a single pointer
//! assignment, so readers always observe a fully-old or fully-new
//! generation, never a mix.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::ResourceFetcher;
use crate::generation::{CacheGeneration, GenerationRecord, PendingActivation};
use crate::manifest::{self, Manifest, ManifestDiff};
use crate::store::{BlobKey, BlobStore};

/// Lifecycle phase of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No install has run yet.
    Idle,
    /// An install pass is fetching into the staging generation.
    Syncing,
    /// A staging generation is fetched and awaiting promotion.
    Activating,
    /// A generation is active and serving.
    Active,
    /// The last install rolled back; a new install may retry.
    Failed,
}

/// Trait for receiving progress updates during an install pass.
///
/// Implement this trait to observe synchronization. All methods have
/// default no-op implementations for convenience.
pub trait SyncProgress: Send + Sync {
    /// Called when an install pass starts fetching.
    fn on_sync_start(&self, _to_fetch: usize, _unchanged: usize) {}

    /// Called when a resource has been fetched and staged.
    fn on_entry_fetched(&self, _name: &str, _bytes: u64) {}

    /// Called when fetching a resource fails (the pass will roll back).
    fn on_entry_failed(&self, _name: &str, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// Summary of a completed activation.
#[derive(Debug, Clone)]
pub struct ActivationReport {
    /// Id of the now-active generation.
    pub generation: Uuid,
    /// Number of resources the generation serves.
    pub resources: usize,
    /// Number of superseded blobs deleted from storage.
    pub evicted: usize,
}

struct EngineState {
    phase: Phase,
    staging: Option<PendingActivation>,
}

/// The precache synchronization engine.
///
/// Generic over the network and storage collaborators so both can be
/// replaced in tests.
pub struct Synchronizer<F: ResourceFetcher, S: BlobStore> {
    fetcher: F,
    store: S,
    config: SyncConfig,
    record_path: Option<PathBuf>,
    active: RwLock<Arc<CacheGeneration>>,
    state: Mutex<EngineState>,
}

impl<F: ResourceFetcher, S: BlobStore> Synchronizer<F, S> {
    /// Creates a synchronizer with an empty baseline generation.
    #[must_use]
    pub fn new(fetcher: F, store: S, config: SyncConfig) -> Self {
        Self::with_active(fetcher, store, config, CacheGeneration::empty())
    }

    /// Creates a synchronizer serving a previously installed generation.
    #[must_use]
    pub fn with_active(
        fetcher: F,
        store: S,
        config: SyncConfig,
        generation: CacheGeneration,
    ) -> Self {
        let phase = if generation.is_empty() {
            Phase::Idle
        } else {
            Phase::Active
        };

        Self {
            fetcher,
            store,
            config,
            record_path: None,
            active: RwLock::new(Arc::new(generation)),
            state: Mutex::new(EngineState {
                phase,
                staging: None,
            }),
        }
    }

    /// Persists a [`GenerationRecord`] to this path on each activation.
    #[must_use]
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Returns the currently active generation snapshot.
    #[must_use]
    pub fn active_generation(&self) -> Arc<CacheGeneration> {
        Arc::clone(&self.active.read())
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs an install pass for the next manifest generation.
    ///
    /// Diffs `next` against the active generation, fetches every added and
    /// changed resource concurrently (each bounded by the configured
    /// timeout) and stages the new generation for activation. Unchanged
    /// entries are never re-fetched.
    ///
    /// Any fetch failure discards the staging generation, deletes the blobs
    /// it had written and leaves the active generation untouched, so a
    /// failed install is invisible to readers and safe to retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstallInProgress`] if a pass is already syncing or
    /// awaiting activation, or the first fetch/storage error of the pass.
    pub async fn install(
        &self,
        next: Manifest,
        progress: &Arc<dyn SyncProgress>,
    ) -> Result<ManifestDiff> {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Syncing | Phase::Activating) {
                return Err(Error::InstallInProgress);
            }
            state.phase = Phase::Syncing;
        }

        let previous = self.active_generation();
        let diff = manifest::diff(Some(previous.manifest()), &next);

        let to_fetch: Vec<(String, String)> = diff
            .to_fetch()
            .filter_map(|name| {
                next.fingerprint(name)
                    .map(|f| (name.to_string(), f.to_string()))
            })
            .collect();

        log::info!(
            "installing manifest generation: {} added, {} changed, {} removed, {} unchanged",
            diff.added.len(),
            diff.changed.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        progress.on_sync_start(to_fetch.len(), diff.unchanged.len());

        let results: Vec<Result<BlobKey>> = stream::iter(to_fetch.clone())
            .map(|(name, fingerprint)| {
                let progress = Arc::clone(progress);
                async move {
                    let key = BlobKey::new(name.as_str(), fingerprint.as_str());
                    let bytes = match self.fetch_with_timeout(&name).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            progress.on_entry_failed(&name, &e.to_string());
                            return Err(e);
                        }
                    };
                    let len = bytes.len() as u64;
                    self.store.put(&key, bytes).await?;
                    progress.on_entry_fetched(&name, len);
                    Ok(key)
                }
            })
            .buffer_unordered(self.config.concurrent_fetches.max(1))
            .collect()
            .await;

        let mut staged_keys = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(key) => staged_keys.push(key),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            // Roll back: no staged key is referenced by the active
            // generation, so deleting the whole delta is safe.
            log::warn!("install failed, rolling back staged blobs: {error}");
            for (name, fingerprint) in &to_fetch {
                let _ = self
                    .store
                    .delete(&BlobKey::new(name.as_str(), fingerprint.as_str()))
                    .await;
            }
            self.state.lock().phase = Phase::Failed;
            return Err(error);
        }

        let pending = PendingActivation {
            generation: Arc::new(CacheGeneration::from_manifest(next)),
            diff: diff.clone(),
            staged_keys,
        };

        {
            let mut state = self.state.lock();
            state.staging = Some(pending);
            state.phase = Phase::Activating;
        }

        Ok(diff)
    }

    /// Promotes the staged generation to active.
    ///
    /// The generation record (when configured) is persisted first; if that
    /// fails the old generation stays fully active and the staging
    /// generation remains parked. The pointer swap itself is a single
    /// assignment. Eviction of superseded blobs runs after the swap:
    /// removed names unconditionally, superseded revisions of changed
    /// names when unreferenced-blob GC is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStagedGeneration`] if nothing is staged, or
    /// [`Error::Activation`] if record persistence or eviction fails. An
    /// eviction failure is reported after the swap; the new generation
    /// stays active.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let pending = {
            let mut state = self.state.lock();
            if state.phase != Phase::Activating {
                return Err(Error::NoStagedGeneration);
            }
            match state.staging.take() {
                Some(pending) => pending,
                None => return Err(Error::NoStagedGeneration),
            }
        };

        if let Some(path) = &self.record_path {
            if let Err(e) = GenerationRecord::of(&pending.generation).save(path) {
                // Re-park the staging generation so activation can be retried.
                self.state.lock().staging = Some(pending);
                return Err(Error::Activation(format!(
                    "generation record persistence failed: {e}"
                )));
            }
        }

        log::debug!(
            "promoting generation {} ({} newly staged blob(s))",
            pending.generation.id(),
            pending.staged_keys.len()
        );

        let superseded = {
            let mut active = self.active.write();
            std::mem::replace(&mut *active, Arc::clone(&pending.generation))
        };

        let mut evicted = 0usize;
        let mut evict_errors = Vec::new();

        for name in &pending.diff.removed {
            if let Some(key) = superseded.lookup(name) {
                match self.store.delete(key).await {
                    Ok(()) => evicted += 1,
                    Err(e) => evict_errors.push(format!("{key}: {e}")),
                }
            }
        }

        if self.config.gc_unreferenced {
            for name in &pending.diff.changed {
                if let Some(key) = superseded.lookup(name) {
                    match self.store.delete(key).await {
                        Ok(()) => evicted += 1,
                        Err(e) => evict_errors.push(format!("{key}: {e}")),
                    }
                }
            }
        }

        {
            let mut state = self.state.lock();
            state.phase = Phase::Active;
            state.staging = None;
        }

        if !evict_errors.is_empty() {
            log::error!("eviction incomplete: {}", evict_errors.join(", "));
            return Err(Error::Activation(format!(
                "eviction failed for {} blob(s): {}",
                evict_errors.len(),
                evict_errors.join(", ")
            )));
        }

        log::info!(
            "generation {} active: {} resources, {} blobs evicted",
            pending.generation.id(),
            pending.generation.len(),
            evicted
        );

        Ok(ActivationReport {
            generation: pending.generation.id(),
            resources: pending.generation.len(),
            evicted,
        })
    }

    /// Promotes a staged generation immediately, if one exists.
    ///
    /// The operator override behind the control channel. With nothing
    /// staged this is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only if activation itself fails.
    pub async fn force_activate(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if state.phase != Phase::Activating || state.staging.is_none() {
                return Ok(());
            }
        }

        match self.activate().await {
            Ok(_) => Ok(()),
            // Lost the race to another activation; the goal is met.
            Err(Error::NoStagedGeneration) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Looks up a logical name in the active generation.
    ///
    /// Returns `Ok(None)` on a miss; a miss is not an error, it signals
    /// "serve from the network instead". Never mutates state and is safe to
    /// call concurrently with other reads and with an in-flight install.
    ///
    /// # Errors
    ///
    /// Returns an error only if blob storage fails.
    pub async fn serve(&self, name: &str) -> Result<Option<Bytes>> {
        let generation = self.active_generation();
        let Some(key) = generation.lookup(name) else {
            return Ok(None);
        };
        self.store.get(key).await
    }

    /// Serves a request from cache, falling back to the network.
    ///
    /// A manifest name whose blob has gone missing from storage is
    /// re-fetched and re-stored under its declared key. Names outside the
    /// manifest pass through to the network without being stored.
    ///
    /// # Errors
    ///
    /// Returns an error if both the cache and the network fail.
    pub async fn serve_or_fetch(&self, name: &str) -> Result<Bytes> {
        let generation = self.active_generation();
        match generation.lookup(name) {
            Some(key) => {
                if let Some(bytes) = self.store.get(key).await? {
                    return Ok(bytes);
                }
                log::warn!("blob missing for {key}, re-fetching");
                let bytes = self.fetch_with_timeout(name).await?;
                self.store.put(key, bytes.clone()).await?;
                Ok(bytes)
            }
            None => self.fetch_with_timeout(name).await,
        }
    }

    async fn fetch_with_timeout(&self, name: &str) -> Result<Bytes> {
        match tokio::time::timeout(self.config.fetch_timeout(), self.fetcher.fetch(name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Fetch {
                name: name.to_string(),
                reason: format!("timed out after {}ms", self.config.fetch_timeout_ms),
            }),
        }
    }
}
