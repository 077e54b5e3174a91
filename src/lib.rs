//! precache - a versioned offline asset cache.
//!
//! This library keeps one generation of named, fingerprinted byte-blobs in
//! sync with a declared manifest: it fetches added and changed resources,
//! stages them invisibly, promotes the new generation with a single atomic
//! swap, evicts what the new manifest no longer references and answers
//! lookups from the active generation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use precache::{
//!     DiskStore, HttpFetcher, Manifest, NoProgress, SyncConfig, SyncProgress, Synchronizer,
//! };
//!
//! # async fn example() -> precache::Result<()> {
//! // The build collaborator supplies the manifest.
//! let manifest = Manifest::from_json(r#"[
//!     {"url": "index.html", "revision": "2ed00a88"},
//!     {"url": "css/app.css", "revision": "906ced96"}
//! ]"#)?;
//!
//! let fetcher = HttpFetcher::new("https://assets.example.com")?;
//! let store = DiskStore::new("/var/cache/precache");
//! let sync = Synchronizer::new(fetcher, store, SyncConfig::default());
//!
//! // Fetch the delta, then promote it atomically.
//! let progress: Arc<dyn SyncProgress> = Arc::new(NoProgress);
//! sync.install(manifest, &progress).await?;
//! sync.activate().await?;
//!
//! // Serve lookups from the active generation.
//! if let Some(bytes) = sync.serve("index.html").await? {
//!     println!("served {} bytes from cache", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod generation;
pub mod manifest;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use config::{PathConfig, SyncConfig};
pub use control::{ControlHandle, ControlMessage, ControlReply, control_channel, run_control_loop};
pub use error::{Error, Result};
pub use fetch::{HttpFetcher, ResourceFetcher};
pub use generation::{CacheGeneration, GenerationRecord, PendingActivation};
pub use manifest::{Manifest, ManifestDiff, ManifestEntry, diff};
pub use store::{BlobKey, BlobStore, DiskStore, MemoryStore};
pub use sync::{ActivationReport, NoProgress, Phase, SyncProgress, Synchronizer};
