//! Cast configuration (`.cast/config.yaml`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HsyncError, HsyncResult};

/// Name of the directory, relative to a cast's root, holding its metadata.
pub const CAST_DIR: &str = ".cast";
/// Name of the config file inside [`CAST_DIR`].
pub const CONFIG_FILE: &str = "config.yaml";
/// Name of the sync-state file inside [`CAST_DIR`].
pub const SYNCSTATE_FILE: &str = "syncstate.json";
/// Name of the advisory lock file inside [`CAST_DIR`].
pub const LOCK_FILE: &str = "lock";
/// Default value of `cast-location`.
pub const DEFAULT_CAST_LOCATION: &str = "Cast";
/// Hard-wired location of a codebase's cast subtree, relative to its root.
pub const CODEBASE_CAST_SUBDIR: &str = "docs/cast";
/// Current schema version for `.cast/config.yaml`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

fn default_cast_location() -> String {
    DEFAULT_CAST_LOCATION.to_string()
}

fn default_cast_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

/// Parsed `.cast/config.yaml`. `cast_id` is the primary identity; `cast_name`
/// may be renamed without breaking history or baselines (which are keyed by
/// `cast_id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CastConfig {
    pub cast_id: String,
    pub cast_name: String,
    #[serde(default = "default_cast_location")]
    pub cast_location: String,
    #[serde(default = "default_cast_version")]
    pub cast_version: u32,
}

impl CastConfig {
    pub fn new(cast_name: impl Into<String>) -> Self {
        Self {
            cast_id: uuid::Uuid::new_v4().to_string(),
            cast_name: cast_name.into(),
            cast_location: default_cast_location(),
            cast_version: CONFIG_SCHEMA_VERSION,
        }
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(CAST_DIR).join(CONFIG_FILE)
    }

    /// Root-relative path to this cast's note tree.
    pub fn cast_location_path(&self, root: &Path) -> PathBuf {
        root.join(&self.cast_location)
    }

    /// Load and parse `.cast/config.yaml` under `root`.
    pub fn load(root: &Path) -> HsyncResult<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Err(HsyncError::NotACast {
                path: root.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        let config: CastConfig = serde_yaml_ng::from_str(&content).map_err(|_| {
            HsyncError::NotACast {
                path: root.to_path_buf(),
            }
        })?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> HsyncResult<()> {
        let yaml = serde_yaml_ng::to_string(self)?;
        crate::frontmatter::atomic_write(&Self::path(root), yaml.as_bytes())
    }
}

/// True when `root` has a `.cast/config.yaml`.
pub fn is_cast(root: &Path) -> bool {
    CastConfig::path(root).exists()
}
