//! hsync - peer-to-peer horizontal synchronizer for content-addressed
//! Markdown casts
//!
//! Each participant owns a directory tree (a "cast") whose Markdown files
//! carry YAML front matter declaring a stable identity (`cast-id`) and a
//! per-file membership list naming the peer casts that should receive it.
//! Running a sync reconciles a cast's tree against its declared peers using
//! a three-way merge over content digests and stored baselines: renames are
//! preserved, deletions propagate direction-respectingly, conflicts are
//! surfaced rather than guessed at, and intra-cast references are rewritten
//! when files move.

pub mod codebase;
pub mod config;
pub mod decision;
pub mod digest;
pub mod error;
pub mod executor;
pub mod frontmatter;
pub mod index;
pub mod linkrewrite;
pub mod registry;
pub mod report;
pub mod syncstate;

pub use codebase::{cbsync, CbsyncOptions};
pub use config::CastConfig;
pub use decision::{decide, Side, SyncAction};
pub use digest::{digest, ContentDigest};
pub use error::{ConflictKind, HsyncError, HsyncResult};
pub use executor::{hsync, ConflictRecord, ExecutedAction, SyncOptions, SyncReport};
pub use frontmatter::{FrontMatter, PeerMode};
pub use index::{FileRec, Index, LimitFile};
pub use registry::{cast_home, Registry, RegistryEntry, RegistryStore};
pub use report::{report, Report, ReportEntry};
pub use syncstate::{Baseline, SyncState};
