//! Index builder (C4)
//!
//! Walks a cast's `cast_location` subtree and produces an in-memory
//! [`Index`]: every cast file keyed both by `cast-id` and by its path
//! relative to `cast_location`. With `fixup` on, front matter is repaired
//! in place (missing `cast-id`, canonical key order) — the indexer's only
//! permitted write, and itself atomic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::digest::{digest, ContentDigest};
use crate::error::HsyncResult;
use crate::frontmatter::{self, FrontMatter, PeerMode};

/// One cast file as seen during a single sync invocation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRec {
    pub cast_id: String,
    pub relpath: PathBuf,
    pub digest: ContentDigest,
    pub peers: BTreeMap<String, PeerMode>,
    pub codebases: Vec<String>,
    pub front_matter: FrontMatter,
    pub body: String,
}

/// A file that exists but was not indexed, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// The result of walking a cast's `cast_location`.
#[derive(Debug, Clone, Default)]
pub struct Index {
    pub by_id: BTreeMap<String, FileRec>,
    pub by_path: BTreeMap<PathBuf, String>,
    pub skipped: Vec<SkippedFile>,
    /// Non-fatal notices, e.g. a duplicate `cast-id` within one cast.
    pub warnings: Vec<String>,
}

impl Index {
    pub fn get_by_id(&self, id: &str) -> Option<&FileRec> {
        self.by_id.get(id)
    }

    pub fn get_by_path(&self, path: &Path) -> Option<&FileRec> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }
}

/// Restrict a build to a single file, addressed by absolute path,
/// cast-relative path, or `cast-id`.
pub enum LimitFile<'a> {
    Absolute(&'a Path),
    CastRelative(&'a Path),
    CastId(&'a str),
}

/// Build an [`Index`] by walking every `*.md` file under
/// `cast_root.join(cast_location)`. When `fixup` is set, front matter is
/// repaired via [`frontmatter::ensure_cast_fields`] and
/// [`frontmatter::reorder`] and written back if either changed anything.
pub fn build(
    cast_root: &Path,
    cast_location: &str,
    fixup: bool,
    limit_file: Option<LimitFile<'_>>,
) -> HsyncResult<Index> {
    let base = cast_root.join(cast_location);
    let mut index = Index::default();
    let mut files = Vec::new();
    walk(&base, &mut files)?;

    if let Some(limit) = &limit_file {
        files.retain(|p| matches_limit(p, &base, limit));
    }

    for path in files {
        let rel = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                index.skipped.push(SkippedFile {
                    path: rel,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let extracted = match frontmatter::parse(&content, &path) {
            Ok(Some(e)) => e,
            Ok(None) => continue,
            Err(e) => {
                index.skipped.push(SkippedFile {
                    path: rel,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !extracted.has_cast_fields {
            continue;
        }

        let mut fm = extracted.front_matter;
        let mut body = extracted.body;

        if fixup {
            let (fixed, modified) = frontmatter::ensure_cast_fields(fm, &path)?;
            fm = fixed;
            let canonical = frontmatter::reorder(fm.clone());
            let needs_write = modified || canonical != fm;
            fm = canonical;
            if needs_write {
                frontmatter::write(&path, &fm, &body)?;
            }
        }

        let cast_id = match fm.cast_id() {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                index.skipped.push(SkippedFile {
                    path: rel,
                    reason: "missing cast-id".to_string(),
                });
                continue;
            }
        };

        if let Some(existing) = index.by_id.get(&cast_id) {
            index.warnings.push(format!(
                "duplicate cast-id {cast_id}: {} superseded by {}",
                existing.relpath.display(),
                rel.display()
            ));
            if let Some(old_id) = index.by_path.get(&existing.relpath).cloned() {
                if old_id == cast_id {
                    index.by_path.remove(&existing.relpath);
                }
            }
        }

        let d = digest(&fm, &body);
        let peers = fm.peers();
        let codebases = fm.codebases();
        body.shrink_to_fit();

        index.by_path.insert(rel.clone(), cast_id.clone());
        index.by_id.insert(
            cast_id.clone(),
            FileRec {
                cast_id,
                relpath: rel,
                digest: d,
                peers,
                codebases,
                front_matter: fm,
                body,
            },
        );
    }

    Ok(index)
}

fn matches_limit(path: &Path, base: &Path, limit: &LimitFile<'_>) -> bool {
    match limit {
        LimitFile::Absolute(p) => path == *p,
        LimitFile::CastRelative(p) => path.strip_prefix(base).map(|r| r == *p).unwrap_or(false),
        LimitFile::CastId(_) => true,
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> HsyncResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, out)?;
        } else if name.ends_with(".md") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_note(dir: &Path, rel: &str, cast_id: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("---\ncast-id: {cast_id}\n---\n{body}")).unwrap();
    }

    #[test]
    fn builds_index_by_id_and_path() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "Cast/Note.md", "id-1", "hello");
        let index = build(dir.path(), "Cast", false, None).unwrap();
        assert_eq!(index.by_id.len(), 1);
        assert!(index.get_by_id("id-1").is_some());
        assert_eq!(
            index.get_by_path(Path::new("Note.md")).unwrap().cast_id,
            "id-1"
        );
    }

    #[test]
    fn skips_non_cast_markdown() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Cast")).unwrap();
        fs::write(dir.path().join("Cast/plain.md"), "# Hello").unwrap();
        let index = build(dir.path(), "Cast", false, None).unwrap();
        assert!(index.by_id.is_empty());
        assert!(index.skipped.is_empty());
    }

    #[test]
    fn skips_malformed_frontmatter_without_failing_walk() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Cast")).unwrap();
        fs::write(
            dir.path().join("Cast/bad.md"),
            "---\ncast-id: [unterminated\n---\nbody",
        )
        .unwrap();
        write_note(dir.path(), "Cast/good.md", "id-1", "hi");
        let index = build(dir.path(), "Cast", false, None).unwrap();
        assert_eq!(index.by_id.len(), 1);
        assert_eq!(index.skipped.len(), 1);
    }

    #[test]
    fn fixup_generates_missing_cast_id_and_writes_back() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Cast")).unwrap();
        fs::write(
            dir.path().join("Cast/note.md"),
            "---\ntitle: Example\n---\nHello",
        )
        .unwrap();
        let index = build(dir.path(), "Cast", true, None).unwrap();
        assert_eq!(index.by_id.len(), 1);

        let content = fs::read_to_string(dir.path().join("Cast/note.md")).unwrap();
        assert!(content.contains("cast-id:"));
    }

    #[test]
    fn without_fixup_missing_cast_id_is_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Cast")).unwrap();
        fs::write(
            dir.path().join("Cast/note.md"),
            "---\ntitle: Example\n---\nHello",
        )
        .unwrap();
        let index = build(dir.path(), "Cast", false, None).unwrap();
        assert!(index.by_id.is_empty());
        assert_eq!(index.skipped.len(), 1);
    }

    #[test]
    fn duplicate_cast_id_warns_and_later_file_wins() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "Cast/a.md", "dup", "first");
        write_note(dir.path(), "Cast/b.md", "dup", "second");
        let index = build(dir.path(), "Cast", false, None).unwrap();
        assert_eq!(index.by_id.len(), 1);
        assert_eq!(index.warnings.len(), 1);
    }

    #[test]
    fn limit_file_restricts_to_one_path() {
        let dir = tempdir().unwrap();
        write_note(dir.path(), "Cast/a.md", "id-a", "a");
        write_note(dir.path(), "Cast/b.md", "id-b", "b");
        let index = build(
            dir.path(),
            "Cast",
            false,
            Some(LimitFile::CastRelative(Path::new("a.md"))),
        )
        .unwrap();
        assert_eq!(index.by_id.len(), 1);
        assert!(index.get_by_id("id-a").is_some());
    }
}
