//! Error types for hsync
//!
//! Uses `thiserror` for library errors, matching the discriminant taxonomy
//! each variant is surfaced with its own enumerated shape so callers can
//! match on it instead of parsing messages.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hsync operations
pub type HsyncResult<T> = Result<T, HsyncError>;

/// Main error type for hsync operations
#[derive(Error, Debug)]
pub enum HsyncError {
    /// YAML front matter failed to parse; the file is skipped, not fatal.
    #[error("invalid front matter in {file}: {message}")]
    FrontMatterInvalid { file: PathBuf, message: String },

    /// Requested root lacks `.cast/config.yaml`.
    #[error("{path} is not a cast (missing .cast/config.yaml)")]
    NotACast { path: PathBuf },

    /// A referenced peer is not registered or its root is missing.
    #[error("peer '{peer}' is unavailable: {reason}")]
    PeerUnavailable { peer: String, reason: String },

    /// A sync decision could not be resolved automatically.
    #[error("conflict ({kind}) for cast-id {cast_id} between {local:?} and {peer:?}")]
    Conflict {
        kind: ConflictKind,
        cast_id: String,
        local: Option<PathBuf>,
        peer: Option<PathBuf>,
    },

    /// Another invocation holds the advisory lock.
    #[error("another sync is already running against {root} (lock held)")]
    Busy { root: PathBuf },

    /// Per-file I/O failure; other files continue.
    #[error("I/O error on {path}: {cause}")]
    IoError { path: PathBuf, cause: String },

    /// The baseline file was written by a schema this build doesn't understand.
    #[error("syncstate.json at {path} has unknown schema {schema}")]
    StateSchemaUnknown { path: PathBuf, schema: u32 },

    /// A name is not present in the registry.
    #[error("no registered cast or codebase named '{name}'")]
    NotRegistered { name: String },

    /// Sync was aborted by the user during interactive conflict resolution.
    #[error("sync aborted by user")]
    Aborted,

    /// Generic I/O error (propagated with `?`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing/serialization error outside the front-matter codec path.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON parsing/serialization error (syncstate.json, registry).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing/serialization error (registry).
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Why a [`HsyncError::Conflict`] could not be auto-resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides changed content since the last agreed baseline.
    Content,
    /// Digests agree but paths disagree in a way the baseline can't explain.
    Rename,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Content => write!(f, "content"),
            ConflictKind::Rename => write!(f, "rename"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_a_cast() {
        let err = HsyncError::NotACast {
            path: PathBuf::from("/tmp/project"),
        };
        assert_eq!(
            err.to_string(),
            "/tmp/project is not a cast (missing .cast/config.yaml)"
        );
    }

    #[test]
    fn test_error_display_conflict() {
        let err = HsyncError::Conflict {
            kind: ConflictKind::Content,
            cast_id: "abc-123".to_string(),
            local: Some(PathBuf::from("Cast/note.md")),
            peer: None,
        };
        assert!(err.to_string().contains("content"));
        assert!(err.to_string().contains("abc-123"));
    }

    #[test]
    fn test_error_display_busy() {
        let err = HsyncError::Busy {
            root: PathBuf::from("/tmp/cast"),
        };
        assert!(err.to_string().contains("lock held"));
    }
}
