//! YAML front-matter codec (C1)
//!
//! Parses a UTF-8 Markdown file into `(front matter, body)`, canonicalizes
//! `cast-*` fields, and writes the result back atomically. Key order in the
//! front matter is preserved because tools and humans both read these files
//! directly — it is behavior, not cosmetics, so front matter is represented
//! as an ordered [`serde_yaml_ng::Mapping`] rather than a plain struct.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_yaml_ng::{Mapping, Value};
use uuid::Uuid;

use crate::error::{HsyncError, HsyncResult};

const DELIMITER: &str = "---";

/// `cast-*` keys recognized by the codec.
pub const KEY_CAST_ID: &str = "cast-id";
pub const KEY_CAST_HSYNC: &str = "cast-hsync";
pub const KEY_CAST_VAULTS: &str = "cast-vaults";
pub const KEY_CAST_CODEBASES: &str = "cast-codebases";
pub const KEY_CAST_VERSION: &str = "cast-version";
pub const KEY_LAST_UPDATED: &str = "last-updated";

/// An ordered YAML mapping, the front matter of one cast file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrontMatter(pub Mapping);

impl FrontMatter {
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(Value::String(key.to_string()))
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0
            .insert(Value::String(key.to_string()), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(Value::String(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(Value::String(key.to_string()))
    }

    /// True when any top-level key starts with `cast-`.
    pub fn has_cast_fields(&self) -> bool {
        self.0.keys().any(|k| key_str(k).starts_with("cast-"))
    }

    pub fn cast_id(&self) -> Option<String> {
        self.get(KEY_CAST_ID).and_then(Value::as_str).map(String::from)
    }

    /// Parse `cast-hsync` into `{peer_name -> mode}`, silently dropping
    /// entries that don't match `"Name (live|watch)"`.
    pub fn peers(&self) -> std::collections::BTreeMap<String, PeerMode> {
        let mut out = std::collections::BTreeMap::new();
        if let Some(Value::Sequence(seq)) = self.get(KEY_CAST_HSYNC) {
            for item in seq {
                if let Some(s) = item.as_str() {
                    if let Some((name, mode)) = parse_peer_entry(s) {
                        out.insert(name, mode);
                    }
                }
            }
        }
        out
    }

    pub fn codebases(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(Value::Sequence(seq)) = self.get(KEY_CAST_CODEBASES) {
            for item in seq {
                if let Some(s) = item.as_str() {
                    out.push(s.to_string());
                }
            }
        }
        out
    }
}

fn key_str(v: &Value) -> &str {
    v.as_str().unwrap_or("")
}

/// Peer sync mode named in `cast-hsync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerMode {
    Live,
    Watch,
}

impl PeerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerMode::Live => "live",
            PeerMode::Watch => "watch",
        }
    }
}

fn parse_peer_entry(s: &str) -> Option<(String, PeerMode)> {
    let s = s.trim();
    let open = s.rfind('(')?;
    let close = s.rfind(')')?;
    if close < open {
        return None;
    }
    let name = s[..open].trim();
    let mode = s[open + 1..close].trim();
    if name.is_empty() {
        return None;
    }
    let mode = match mode {
        "live" => PeerMode::Live,
        "watch" => PeerMode::Watch,
        _ => return None,
    };
    Some((name.to_string(), mode))
}

fn format_peer_entry(name: &str, mode: PeerMode) -> String {
    format!("{} ({})", name, mode.as_str())
}

/// Result of extracting front matter from raw file content.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub front_matter: FrontMatter,
    pub body: String,
    pub has_cast_fields: bool,
}

/// Extract and parse YAML front matter from `content`.
///
/// Accepts both LF and CRLF line endings. The file must start with a `---`
/// delimiter line and contain a matching closing delimiter; anything else
/// means the file isn't a cast file, which is not an error by itself — only
/// a malformed YAML *block* is [`HsyncError::FrontMatterInvalid`].
pub fn parse(content: &str, file: &Path) -> HsyncResult<Option<Extracted>> {
    let normalized = content.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();

    if lines.is_empty() || lines[0].trim_end() != DELIMITER {
        return Ok(None);
    }

    let closing = lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, l)| l.trim_end() == DELIMITER)
        .map(|(i, _)| i);

    let Some(closing) = closing else {
        return Ok(None);
    };

    let yaml = lines[1..closing].join("\n");
    let body = if closing + 1 < lines.len() {
        lines[closing + 1..].join("\n")
    } else {
        String::new()
    };

    let mapping: Mapping = if yaml.trim().is_empty() {
        Mapping::new()
    } else {
        serde_yaml_ng::from_str(&yaml).map_err(|e| HsyncError::FrontMatterInvalid {
            file: file.to_path_buf(),
            message: e.to_string(),
        })?
    };

    let fm = FrontMatter(mapping);
    let has_cast_fields = fm.has_cast_fields();
    Ok(Some(Extracted {
        front_matter: fm,
        body,
        has_cast_fields,
    }))
}

fn is_blank_scalar(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Insert missing `cast-id`/`cast-version`/`last-updated`, migrate
/// `cast-vaults` to `cast-hsync`. Returns the possibly-modified front
/// matter plus whether anything changed.
///
/// Rejects files where `cast-hsync` and `cast-vaults` are both present
/// with differing canonicalized contents (ambiguous legacy alias).
pub fn ensure_cast_fields(mut fm: FrontMatter, file: &Path) -> HsyncResult<(FrontMatter, bool)> {
    let mut modified = false;

    if let Some(vaults) = fm.remove(KEY_CAST_VAULTS) {
        match fm.get(KEY_CAST_HSYNC).cloned() {
            None => {
                fm.insert(KEY_CAST_HSYNC, vaults);
                modified = true;
            }
            Some(existing) => {
                let a = canonicalize_peer_list(&existing);
                let b = canonicalize_peer_list(&vaults);
                if a != b {
                    return Err(HsyncError::FrontMatterInvalid {
                        file: file.to_path_buf(),
                        message: "cast-hsync and cast-vaults present with differing contents"
                            .to_string(),
                    });
                }
                modified = true;
            }
        }
    }

    let needs_id = match fm.get(KEY_CAST_ID) {
        None => true,
        Some(v) => is_blank_scalar(v),
    };
    if needs_id {
        fm.insert(KEY_CAST_ID, Value::String(Uuid::new_v4().to_string()));
        modified = true;
    }

    if !fm.contains_key(KEY_CAST_VERSION) {
        fm.insert(KEY_CAST_VERSION, Value::Number(1.into()));
        modified = true;
    }

    if !fm.contains_key(KEY_LAST_UPDATED) {
        fm.insert(KEY_LAST_UPDATED, Value::String(String::new()));
        modified = true;
    }

    Ok((fm, modified))
}

fn canonicalize_peer_list(v: &Value) -> Vec<(String, PeerMode)> {
    let Value::Sequence(seq) = v else {
        return Vec::new();
    };
    let mut entries: Vec<(String, PeerMode)> = seq
        .iter()
        .filter_map(|i| i.as_str().and_then(parse_peer_entry))
        .collect();
    dedupe_peers(&mut entries);
    entries
}

fn dedupe_peers(entries: &mut Vec<(String, PeerMode)>) {
    let mut by_key: std::collections::BTreeMap<String, (String, PeerMode)> =
        std::collections::BTreeMap::new();
    for (name, mode) in entries.drain(..) {
        let key = name.to_lowercase();
        by_key
            .entry(key)
            .and_modify(|e| {
                if mode == PeerMode::Live {
                    e.1 = PeerMode::Live;
                }
            })
            .or_insert((name, mode));
    }
    let mut out: Vec<(String, PeerMode)> = by_key.into_values().collect();
    out.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
    *entries = out;
}

fn dedupe_codebases(names: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    names.retain(|n| seen.insert(n.to_lowercase()));
    names.sort_by_key(|n| n.to_lowercase());
}

/// Apply list canonicalization (`cast-hsync`, `cast-codebases`) and the
/// key-order rule: `last-updated`, `cast-id`, then `cast-hsync` /
/// `cast-codebases`, then other `cast-*` keys alphabetically, then all
/// non-cast keys in their original relative order.
pub fn reorder(fm: FrontMatter) -> FrontMatter {
    let mut entries: Vec<(String, Value)> = fm
        .0
        .into_iter()
        .map(|(k, v)| (key_str(&k).to_string(), v))
        .collect();

    if let Some(pos) = entries.iter().position(|(k, _)| k == KEY_CAST_HSYNC) {
        let mut peers = canonicalize_peer_list(&entries[pos].1);
        entries[pos].1 = Value::Sequence(
            peers
                .drain(..)
                .map(|(n, m)| Value::String(format_peer_entry(&n, m)))
                .collect(),
        );
    }

    if let Some(pos) = entries.iter().position(|(k, _)| k == KEY_CAST_CODEBASES) {
        if let Value::Sequence(seq) = &entries[pos].1 {
            let mut names: Vec<String> =
                seq.iter().filter_map(|v| v.as_str().map(String::from)).collect();
            dedupe_codebases(&mut names);
            entries[pos].1 = Value::Sequence(names.into_iter().map(Value::String).collect());
        }
    }

    let mut ordered: Vec<(String, Value)> = Vec::with_capacity(entries.len());
    let mut take = |key: &str, entries: &mut Vec<(String, Value)>| -> Option<(String, Value)> {
        let pos = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(pos))
    };

    if let Some(e) = take(KEY_LAST_UPDATED, &mut entries) {
        ordered.push(e);
    }
    if let Some(e) = take(KEY_CAST_ID, &mut entries) {
        ordered.push(e);
    }
    if let Some(e) = take(KEY_CAST_HSYNC, &mut entries) {
        ordered.push(e);
    }
    if let Some(e) = take(KEY_CAST_CODEBASES, &mut entries) {
        ordered.push(e);
    }

    let mut rest_cast: Vec<(String, Value)> =
        entries.iter().filter(|(k, _)| k.starts_with("cast-")).cloned().collect();
    rest_cast.sort_by(|a, b| a.0.cmp(&b.0));
    entries.retain(|(k, _)| !k.starts_with("cast-"));
    ordered.extend(rest_cast);
    ordered.extend(entries);

    let mut mapping = Mapping::new();
    for (k, v) in ordered {
        mapping.insert(Value::String(k), v);
    }
    FrontMatter(mapping)
}

/// Whether `fm` is already in canonical key order (used by the indexer to
/// avoid an unnecessary rewrite).
pub fn is_canonical(fm: &FrontMatter) -> bool {
    reorder(fm.clone()) == *fm
}

/// Render `front_matter` + `body` back into file bytes and atomically
/// replace `path` (write to a sibling temp file, then rename). Never
/// mutates the file in place.
pub fn write(path: &Path, front_matter: &FrontMatter, body: &str) -> HsyncResult<()> {
    let yaml = if front_matter.0.is_empty() {
        String::new()
    } else {
        serde_yaml_ng::to_string(&front_matter.0)?
    };

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(yaml.trim_end_matches('\n'));
    out.push('\n');
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(body);

    atomic_write(path, out.as_bytes())
}

/// write-temp-then-rename, the same primitive used for `syncstate.json`.
pub fn atomic_write(path: &Path, content: &[u8]) -> HsyncResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp");
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extract_simple() {
        let content = "---\ncast-id: abc\n---\nbody text";
        let extracted = parse(content, Path::new("n.md")).unwrap().unwrap();
        assert_eq!(extracted.body, "body text");
        assert!(extracted.has_cast_fields);
    }

    #[test]
    fn extract_crlf() {
        let content = "---\r\ncast-id: abc\r\n---\r\nbody";
        let extracted = parse(content, Path::new("n.md")).unwrap().unwrap();
        assert_eq!(extracted.body, "body");
    }

    #[test]
    fn no_opening_delimiter_is_not_a_cast_file() {
        let content = "cast-id: abc\n---\nbody";
        assert!(parse(content, Path::new("n.md")).unwrap().is_none());
    }

    #[test]
    fn unclosed_front_matter_is_not_a_cast_file() {
        let content = "---\ncast-id: abc\nbody";
        assert!(parse(content, Path::new("n.md")).unwrap().is_none());
    }

    #[test]
    fn malformed_yaml_is_invalid() {
        let content = "---\ncast-id: [unterminated\n---\nbody";
        let err = parse(content, Path::new("n.md")).unwrap_err();
        assert!(matches!(err, HsyncError::FrontMatterInvalid { .. }));
    }

    #[test]
    fn ensure_cast_fields_generates_id() {
        let fm = FrontMatter::new();
        let (fm, modified) = ensure_cast_fields(fm, Path::new("n.md")).unwrap();
        assert!(modified);
        assert!(fm.cast_id().is_some());
        assert!(Uuid::parse_str(&fm.cast_id().unwrap()).is_ok());
    }

    #[test]
    fn ensure_cast_fields_is_noop_when_present() {
        let mut fm = FrontMatter::new();
        fm.insert(KEY_CAST_ID, Value::String("11111111-1111-4111-8111-111111111111".into()));
        fm.insert(KEY_CAST_VERSION, Value::Number(1.into()));
        fm.insert(KEY_LAST_UPDATED, Value::String("2025-01-01".into()));
        let (fm2, modified) = ensure_cast_fields(fm.clone(), Path::new("n.md")).unwrap();
        assert!(!modified);
        assert_eq!(fm, fm2);
    }

    #[test]
    fn ensure_cast_fields_treats_blank_id_as_missing() {
        let mut fm = FrontMatter::new();
        fm.insert(KEY_CAST_ID, Value::String("   ".into()));
        let (fm, modified) = ensure_cast_fields(fm, Path::new("n.md")).unwrap();
        assert!(modified);
        assert!(!fm.cast_id().unwrap().trim().is_empty());
    }

    #[test]
    fn migrates_cast_vaults_alias() {
        let mut fm = FrontMatter::new();
        fm.insert(
            "cast-vaults",
            Value::Sequence(vec![Value::String("Alpha (live)".into())]),
        );
        let (fm, modified) = ensure_cast_fields(fm, Path::new("n.md")).unwrap();
        assert!(modified);
        assert!(!fm.contains_key(KEY_CAST_VAULTS));
        assert_eq!(fm.peers().get("Alpha"), Some(&PeerMode::Live));
    }

    #[test]
    fn conflicting_vaults_and_hsync_is_invalid() {
        let mut fm = FrontMatter::new();
        fm.insert(
            KEY_CAST_HSYNC,
            Value::Sequence(vec![Value::String("Alpha (live)".into())]),
        );
        fm.insert(
            "cast-vaults",
            Value::Sequence(vec![Value::String("Beta (live)".into())]),
        );
        let err = ensure_cast_fields(fm, Path::new("n.md")).unwrap_err();
        assert!(matches!(err, HsyncError::FrontMatterInvalid { .. }));
    }

    #[test]
    fn agreeing_vaults_and_hsync_is_valid() {
        let mut fm = FrontMatter::new();
        fm.insert(
            KEY_CAST_HSYNC,
            Value::Sequence(vec![Value::String("Alpha (live)".into())]),
        );
        fm.insert(
            "cast-vaults",
            Value::Sequence(vec![Value::String("Alpha (live)".into())]),
        );
        let (fm, _) = ensure_cast_fields(fm, Path::new("n.md")).unwrap();
        assert!(!fm.contains_key(KEY_CAST_VAULTS));
    }

    #[test]
    fn peer_list_dedupes_live_wins() {
        let mut fm = FrontMatter::new();
        fm.insert(
            KEY_CAST_HSYNC,
            Value::Sequence(vec![
                Value::String("beta (watch)".into()),
                Value::String("Alpha (live)".into()),
                Value::String("Beta (live)".into()),
            ]),
        );
        let fm = reorder(fm);
        let peers = fm.peers();
        assert_eq!(peers.get("Alpha"), Some(&PeerMode::Live));
        assert_eq!(peers.len(), 2);
        if let Some(Value::Sequence(seq)) = fm.get(KEY_CAST_HSYNC) {
            let rendered: Vec<_> = seq.iter().map(|v| v.as_str().unwrap()).collect();
            assert_eq!(rendered, vec!["Alpha (live)", "beta (live)"]);
        } else {
            panic!("expected sequence");
        }
    }

    #[test]
    fn key_order_last_updated_then_cast_id() {
        let mut fm = FrontMatter::new();
        fm.insert("title", Value::String("Example".into()));
        fm.insert(KEY_CAST_VERSION, Value::Number(1.into()));
        fm.insert(KEY_CAST_ID, Value::String("x".into()));
        fm.insert(KEY_LAST_UPDATED, Value::String("t".into()));
        let fm = reorder(fm);
        let keys: Vec<&str> = fm.0.keys().map(|k| k.as_str().unwrap()).collect();
        assert_eq!(keys, vec![KEY_LAST_UPDATED, KEY_CAST_ID, KEY_CAST_VERSION, "title"]);
    }

    #[test]
    fn reorder_is_idempotent() {
        let mut fm = FrontMatter::new();
        fm.insert(
            KEY_CAST_HSYNC,
            Value::Sequence(vec![
                Value::String("Beta (watch)".into()),
                Value::String("Alpha (live)".into()),
            ]),
        );
        fm.insert("title", Value::String("X".into()));
        let once = reorder(fm.clone());
        let twice = reorder(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn write_then_parse_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.md");
        let mut fm = FrontMatter::new();
        fm.insert(KEY_CAST_ID, Value::String("abc".into()));
        write(&path, &fm, "Hello").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let extracted = parse(&content, &path).unwrap().unwrap();
        assert_eq!(extracted.body, "Hello");
        assert_eq!(extracted.front_matter.cast_id().unwrap(), "abc");
    }

    #[test]
    fn write_never_mutates_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.md");
        fs::write(&path, "---\ncast-id: old\n---\noriginal").unwrap();

        let mut fm = FrontMatter::new();
        fm.insert(KEY_CAST_ID, Value::String("new".into()));
        write(&path, &fm, "updated").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("new"));
        assert!(content.contains("updated"));
    }
}
