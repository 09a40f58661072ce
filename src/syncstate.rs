//! Sync-state store (C5)
//!
//! `syncstate.json` records, per `(cast_id, peer_name)`, the last digest and
//! paths both sides agreed on — the baseline a three-way merge compares
//! against. Written with write-temp-then-rename so a crash mid-write never
//! corrupts the previous state. Mutated only by the executor (C8); the
//! indexer never writes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{CAST_DIR, SYNCSTATE_FILE};
use crate::digest::ContentDigest;
use crate::error::{HsyncError, HsyncResult};

/// Current schema version for `syncstate.json`.
pub const SCHEMA_VERSION: u32 = 1;

/// The last `(digest, rel, peer_rel)` triple two casts agreed on for one
/// `cast-id`. Unknown keys from a future schema's entries round-trip via
/// `extra` rather than being silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Baseline {
    pub digest: ContentDigest,
    pub rel: PathBuf,
    pub peer_rel: PathBuf,
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Baseline {
    pub fn new(digest: ContentDigest, rel: PathBuf, peer_rel: PathBuf, updated_at: String) -> Self {
        Self {
            digest,
            rel,
            peer_rel,
            updated_at,
            extra: serde_json::Map::new(),
        }
    }
}

/// The full contents of `syncstate.json`: `cast_id -> peer_name -> Baseline`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub schema: u32,
    #[serde(default)]
    pub baselines: BTreeMap<String, BTreeMap<String, Baseline>>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            baselines: BTreeMap::new(),
        }
    }
}

impl SyncState {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CAST_DIR).join(SYNCSTATE_FILE)
    }

    /// Load `syncstate.json`, or a fresh empty state if it doesn't exist.
    pub fn load(root: &Path) -> HsyncResult<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let state: SyncState = serde_json::from_str(&content)?;
        if state.schema != SCHEMA_VERSION {
            return Err(HsyncError::StateSchemaUnknown {
                path,
                schema: state.schema,
            });
        }
        Ok(state)
    }

    pub fn save(&self, root: &Path) -> HsyncResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::frontmatter::atomic_write(&Self::path(root), json.as_bytes())
    }

    pub fn baseline(&self, cast_id: &str, peer: &str) -> Option<&Baseline> {
        self.baselines.get(cast_id)?.get(peer)
    }

    /// Set the baseline for `(cast_id, peer)`. Other pairs are left exactly
    /// as they were, including their `updated_at` timestamps.
    pub fn set_baseline(&mut self, cast_id: &str, peer: &str, baseline: Baseline) {
        self.baselines
            .entry(cast_id.to_string())
            .or_default()
            .insert(peer.to_string(), baseline);
    }

    pub fn clear_baseline(&mut self, cast_id: &str, peer: &str) -> Option<Baseline> {
        let peers = self.baselines.get_mut(cast_id)?;
        let removed = peers.remove(peer);
        if peers.is_empty() {
            self.baselines.remove(cast_id);
        }
        removed
    }

    pub fn peers_for(&self, cast_id: &str) -> Vec<&str> {
        self.baselines
            .get(cast_id)
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every `cast_id` that has a baseline recorded against `peer`,
    /// regardless of whether the local file still exists or still
    /// declares that peer. Used to catch deletions that need propagating.
    pub fn peers_for_any_with(&self, peer: &str) -> Vec<String> {
        self.baselines
            .iter()
            .filter(|(_, peers)| peers.contains_key(peer))
            .map(|(cast_id, _)| cast_id.clone())
            .collect()
    }
}
