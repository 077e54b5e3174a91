//! Manifest types and generation diffing.
//!
//! A manifest declares one generation of the deployed asset set as a finite
//! list of (logical name, content fingerprint) pairs. The build collaborator
//! emits it as a JSON array of `{"url": ..., "revision": ...}` objects;
//! `name`/`fingerprint` are accepted as well.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single declared resource: logical name plus content fingerprint.
///
/// The fingerprint is an opaque string, stable for identical bytes. How it
/// is computed is the build collaborator's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical resource name, typically a relative path.
    #[serde(alias = "url")]
    pub name: String,
    /// Opaque content hash identifying this revision of the resource.
    #[serde(alias = "revision")]
    pub fingerprint: String,
}

impl ManifestEntry {
    /// Creates an entry from name and fingerprint.
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// One generation of the deployed asset set.
///
/// Immutable once constructed; a new deployment is a wholly new manifest.
/// Logical names are unique within a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ManifestEntry>", into = "Vec<ManifestEntry>")]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Creates an empty manifest (the implicit "previous" of a first install).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Builds a manifest from entries, rejecting duplicate logical names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if two entries share a logical name.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if map.insert(entry.name.clone(), entry.fingerprint).is_some() {
                return Err(Error::Manifest(format!(
                    "duplicate logical name: {}",
                    entry.name
                )));
            }
        }
        Ok(Self { entries: map })
    }

    /// Parses a manifest from the build collaborator's JSON array format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] on malformed JSON or duplicate names.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Manifest(e.to_string()))
    }

    /// Returns the fingerprint declared for a logical name.
    #[must_use]
    pub fn fingerprint(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Returns true if the manifest declares the logical name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates over (name, fingerprint) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, f)| (n.as_str(), f.as_str()))
    }

    /// Returns the declared logical names.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<Vec<ManifestEntry>> for Manifest {
    type Error = String;

    fn try_from(entries: Vec<ManifestEntry>) -> std::result::Result<Self, String> {
        Self::from_entries(entries).map_err(|e| e.to_string())
    }
}

impl From<Manifest> for Vec<ManifestEntry> {
    fn from(manifest: Manifest) -> Self {
        manifest
            .entries
            .into_iter()
            .map(|(name, fingerprint)| ManifestEntry { name, fingerprint })
            .collect()
    }
}

/// Partition of a new manifest's names against the previously installed one.
///
/// The four sets are disjoint; their union is exactly the names of the old
/// and new manifests combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Names in the new manifest absent from the previous one.
    pub added: BTreeSet<String>,
    /// Names present in both with differing fingerprints.
    pub changed: BTreeSet<String>,
    /// Names in the previous manifest absent from the new one.
    pub removed: BTreeSet<String>,
    /// Names present in both with equal fingerprints; no network action.
    pub unchanged: BTreeSet<String>,
}

impl ManifestDiff {
    /// Returns the names that require a fetch (added plus changed), in order.
    pub fn to_fetch(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.changed.iter())
            .map(String::as_str)
    }

    /// Returns true if the new manifest needs no network or eviction work.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Partitions `next`'s entries against `previous` by logical name and
/// fingerprint equality.
///
/// Pure and deterministic; `None` behaves as the empty manifest, so every
/// name in `next` comes out `added`.
#[must_use]
pub fn diff(previous: Option<&Manifest>, next: &Manifest) -> ManifestDiff {
    let empty = Manifest::empty();
    let previous = previous.unwrap_or(&empty);

    let mut out = ManifestDiff::default();

    for (name, fingerprint) in next.iter() {
        match previous.fingerprint(name) {
            None => {
                out.added.insert(name.to_string());
            }
            Some(prev) if prev == fingerprint => {
                out.unchanged.insert(name.to_string());
            }
            Some(_) => {
                out.changed.insert(name.to_string());
            }
        }
    }

    for (name, _) in previous.iter() {
        if !next.contains(name) {
            out.removed.insert(name.to_string());
        }
    }

    out
}
