//! Cache generation snapshots and their persisted record.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::{Manifest, ManifestDiff, ManifestEntry};
use crate::store::BlobKey;

/// One complete, internally consistent snapshot of cached resources.
///
/// Immutable after construction. The synchronizer replaces the active
/// generation with a single pointer assignment; individual entries are
/// never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheGeneration {
    id: Uuid,
    created: DateTime<Utc>,
    manifest: Manifest,
    entries: BTreeMap<String, BlobKey>,
}

impl CacheGeneration {
    /// Creates the empty baseline generation that exists before any install.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_manifest(Manifest::empty())
    }

    /// Builds a generation whose entries mirror the manifest's declarations.
    #[must_use]
    pub fn from_manifest(manifest: Manifest) -> Self {
        let entries = manifest
            .iter()
            .map(|(name, fingerprint)| (name.to_string(), BlobKey::new(name, fingerprint)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            created: Utc::now(),
            manifest,
            entries,
        }
    }

    /// Returns the stored-blob key for a logical name, if declared.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&BlobKey> {
        self.entries.get(name)
    }

    /// Returns this generation's manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the generation id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns when this generation was constructed.
    #[must_use]
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Iterates over the stored-blob keys in name order.
    pub fn keys(&self) -> impl Iterator<Item = &BlobKey> {
        self.entries.values()
    }

    /// Returns the number of cached resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the generation caches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fetched-but-not-yet-promoted generation.
///
/// Exists only between a successful install pass and the activation that
/// follows it; discarded wholesale when an install rolls back.
#[derive(Debug)]
pub struct PendingActivation {
    /// The staging generation awaiting the pointer swap.
    pub generation: Arc<CacheGeneration>,
    /// The diff the install pass was computed from.
    pub diff: ManifestDiff,
    /// Keys newly written during the pass, for rollback accounting.
    pub staged_keys: Vec<BlobKey>,
}

/// Persisted snapshot of the last activated generation.
///
/// Written after each successful activation so a restarted process can diff
/// a newly supplied manifest against what is already cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Id of the activated generation.
    pub id: Uuid,
    /// When the generation was constructed.
    pub created: DateTime<Utc>,
    /// The manifest the generation was installed from.
    pub entries: Vec<ManifestEntry>,
}

impl GenerationRecord {
    /// Captures a record of the given generation.
    #[must_use]
    pub fn of(generation: &CacheGeneration) -> Self {
        Self {
            id: generation.id(),
            created: generation.created(),
            entries: generation.manifest().clone().into(),
        }
    }

    /// Reconstructs the recorded generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded entries contain duplicate names.
    pub fn into_generation(self) -> crate::Result<CacheGeneration> {
        let manifest = Manifest::from_entries(self.entries)?;
        Ok(CacheGeneration {
            id: self.id,
            created: self.created,
            entries: manifest
                .iter()
                .map(|(name, fingerprint)| (name.to_string(), BlobKey::new(name, fingerprint)))
                .collect(),
            manifest,
        })
    }

    /// Saves the record to disk atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("toml.tmp");

        let toml_str = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&tmp_path, toml_str)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Loads a record from a file path, `None` if no record exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use tempfile::TempDir;

    fn manifest(pairs: &[(&str, &str)]) -> Manifest {
        Manifest::from_entries(pairs.iter().map(|(n, f)| ManifestEntry::new(*n, *f))).unwrap()
    }

    #[test]
    fn empty_generation_has_no_entries() {
        let generation = CacheGeneration::empty();
        assert!(generation.is_empty());
        assert!(generation.manifest().is_empty());
        assert_eq!(generation.lookup("anything"), None);
    }

    #[test]
    fn generation_entries_mirror_manifest() {
        let generation = CacheGeneration::from_manifest(manifest(&[("a", "h1"), ("b", "h2")]));
        assert_eq!(generation.len(), 2);
        assert_eq!(generation.lookup("a"), Some(&BlobKey::new("a", "h1")));
        assert_eq!(generation.lookup("b"), Some(&BlobKey::new("b", "h2")));
        assert_eq!(generation.lookup("c"), None);
    }

    #[test]
    fn distinct_generations_get_distinct_ids() {
        let m = manifest(&[("a", "h1")]);
        let g1 = CacheGeneration::from_manifest(m.clone());
        let g2 = CacheGeneration::from_manifest(m);
        assert_ne!(g1.id(), g2.id());
    }

    #[test]
    fn record_roundtrips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("generation.toml");

        let generation = CacheGeneration::from_manifest(manifest(&[("a", "h1"), ("b", "h2")]));
        GenerationRecord::of(&generation).save(&path).unwrap();

        let restored = GenerationRecord::load(&path)
            .unwrap()
            .unwrap()
            .into_generation()
            .unwrap();

        assert_eq!(restored.id(), generation.id());
        assert_eq!(restored.manifest(), generation.manifest());
        assert_eq!(restored.lookup("b"), Some(&BlobKey::new("b", "h2")));
    }

    #[test]
    fn load_missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("generation.toml");
        assert!(GenerationRecord::load(&path).unwrap().is_none());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/generation.toml");

        let generation = CacheGeneration::from_manifest(manifest(&[("a", "h1")]));
        GenerationRecord::of(&generation).save(&path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());
    }
}
