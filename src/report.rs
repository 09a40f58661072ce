//! Indexer-only diagnostic entry point
//!
//! `report(root)` walks a cast exactly as a sync would, but never writes
//! anything and never contacts a peer. Useful for "what would hsync see"
//! inspection without risking a mutation.

use std::path::Path;

use crate::config::CastConfig;
use crate::error::HsyncResult;
use crate::index::{self, FileRec};

/// One entry in a [`Report`]'s file list.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub cast_id: String,
    pub relpath: std::path::PathBuf,
    pub peers: Vec<String>,
    pub codebases: Vec<String>,
}

/// The result of indexing a cast without mutating it.
#[derive(Debug, Clone)]
pub struct Report {
    pub file_list: Vec<ReportEntry>,
    pub peers: Vec<String>,
    pub files_count: usize,
}

/// Build a [`Report`] for the cast at `root`, without repairing front
/// matter or touching the filesystem beyond reading it.
pub fn report(root: &Path) -> HsyncResult<Report> {
    let config = CastConfig::load(root)?;
    let index = index::build(root, &config.cast_location, false, None)?;

    let mut peers = std::collections::BTreeSet::new();
    let file_list: Vec<ReportEntry> = index
        .by_id
        .values()
        .map(|rec: &FileRec| {
            for name in rec.peers.keys() {
                peers.insert(name.clone());
            }
            ReportEntry {
                cast_id: rec.cast_id.clone(),
                relpath: rec.relpath.clone(),
                peers: rec.peers.keys().cloned().collect(),
                codebases: rec.codebases.clone(),
            }
        })
        .collect();

    Ok(Report {
        files_count: file_list.len(),
        file_list,
        peers: peers.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::{self, FrontMatter, KEY_CAST_HSYNC, KEY_CAST_ID};
    use serde_yaml_ng::Value;
    use tempfile::tempdir;

    #[test]
    fn reports_files_and_peers_without_mutating() {
        let dir = tempdir().unwrap();
        let config = CastConfig::new("Alpha");
        config.save(dir.path()).unwrap();
        let cast_dir = config.cast_location_path(dir.path());
        std::fs::create_dir_all(&cast_dir).unwrap();

        let path = cast_dir.join("note.md");
        let mut fm = FrontMatter::new();
        fm.insert(KEY_CAST_ID, Value::String("id-1".into()));
        fm.insert(
            KEY_CAST_HSYNC,
            Value::Sequence(vec![Value::String("Beta (live)".into())]),
        );
        frontmatter::write(&path, &fm, "hello").unwrap();

        let before = std::fs::read_to_string(&path).unwrap();
        let rep = report(dir.path()).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();

        assert_eq!(before, after);
        assert_eq!(rep.files_count, 1);
        assert_eq!(rep.peers, vec!["Beta".to_string()]);
        assert_eq!(rep.file_list[0].cast_id, "id-1");
    }

    #[test]
    fn missing_cast_id_is_not_counted_without_fixup() {
        let dir = tempdir().unwrap();
        let config = CastConfig::new("Alpha");
        config.save(dir.path()).unwrap();
        let cast_dir = config.cast_location_path(dir.path());
        std::fs::create_dir_all(&cast_dir).unwrap();
        std::fs::write(cast_dir.join("no-id.md"), "---\ntitle: x\n---\nbody").unwrap();

        let rep = report(dir.path()).unwrap();
        assert_eq!(rep.files_count, 0);
    }
}
