//! Link rewriter (C6)
//!
//! When a file is renamed or moved, other cast files may reference its old
//! path via a Markdown link `[text](old/path.md)` or a wiki-link
//! `[[old/path]]` / `[[old/path|text]]`. This module rewrites those
//! references body-wide, skipping fenced and inline code spans so code
//! samples are never touched.

use std::collections::HashMap;
use std::path::Path;

use crate::error::HsyncResult;

/// A single rename: old path (as it would appear in a link) to new path.
pub type RenameMap<'a> = HashMap<&'a str, &'a str>;

/// Scan every `*.md` file under `cast_location` and rewrite references to
/// any of `renames`' old paths. Files whose content doesn't change are
/// left untouched (not even re-written atomically).
pub fn rewrite_tree(cast_location: &Path, renames: &RenameMap<'_>) -> HsyncResult<Vec<std::path::PathBuf>> {
    let mut touched = Vec::new();
    let mut files = Vec::new();
    collect_md(cast_location, &mut files)?;

    for path in files {
        let content = std::fs::read_to_string(&path)?;
        let (rewritten, changed) = rewrite(&content, renames);
        if changed {
            crate::frontmatter::atomic_write(&path, rewritten.as_bytes())?;
            let rel = path
                .strip_prefix(cast_location)
                .unwrap_or(&path)
                .to_path_buf();
            touched.push(rel);
        }
    }
    Ok(touched)
}

fn collect_md(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> HsyncResult<()> {
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
            collect_md(&path, out)?;
        } else if name.ends_with(".md") {
            out.push(path);
        }
    }
    Ok(())
}

/// Rewrite every occurrence of a renamed path in `body`'s Markdown and
/// wiki-style links. Returns the rewritten body and whether anything
/// changed.
pub fn rewrite(body: &str, renames: &RenameMap<'_>) -> (String, bool) {
    if renames.is_empty() {
        return (body.to_string(), false);
    }

    let mut out = String::with_capacity(body.len());
    let mut changed = false;
    let mut in_fence = false;
    let mut fence_marker: Option<(char, usize)> = None;

    for line in split_keep_newline(body) {
        let trimmed = line.trim_start();
        if let Some(marker) = detect_fence(trimmed) {
            match fence_marker {
                None => fence_marker = Some(marker),
                Some(existing) if existing.0 == marker.0 && marker.1 >= existing.1 => {
                    fence_marker = None;
                }
                _ => {}
            }
            in_fence = fence_marker.is_some();
            out.push_str(line);
            continue;
        }

        if in_fence {
            out.push_str(line);
            continue;
        }

        let (rewritten, line_changed) = rewrite_line(line, renames);
        changed |= line_changed;
        out.push_str(&rewritten);
    }

    (out, changed)
}

fn detect_fence(trimmed: &str) -> Option<(char, usize)> {
    for ch in ['`', '~'] {
        let count = trimmed.chars().take_while(|c| *c == ch).count();
        if count >= 3 {
            return Some((ch, count));
        }
    }
    None
}

fn split_keep_newline(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, b) in s.bytes().enumerate() {
        if b == b'\n' {
            out.push(&s[start..=i]);
            start = i + 1;
        }
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

fn rewrite_line(line: &str, renames: &RenameMap<'_>) -> (String, bool) {
    let mut out = String::with_capacity(line.len());
    let mut changed = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let mut in_inline_code = false;

    while i < chars.len() {
        let c = chars[i];

        if c == '`' {
            in_inline_code = !in_inline_code;
            out.push(c);
            i += 1;
            continue;
        }

        if in_inline_code {
            out.push(c);
            i += 1;
            continue;
        }

        if c == '[' && chars.get(i + 1) == Some(&'[') {
            if let Some((text, end)) = parse_wiki_link(&chars, i) {
                let (rewritten, did_change) = rewrite_wiki_target(&text, renames);
                out.push_str("[[");
                out.push_str(&rewritten);
                out.push_str("]]");
                changed |= did_change;
                i = end;
                continue;
            }
        }

        if c == '[' {
            if let Some((label, target, end)) = parse_md_link(&chars, i) {
                let (rewritten, did_change) = rewrite_md_target(&target, renames);
                out.push('[');
                out.push_str(&label);
                out.push_str("](");
                out.push_str(&rewritten);
                out.push(')');
                changed |= did_change;
                i = end;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    (out, changed)
}

fn parse_wiki_link(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut j = start + 2;
    let mut content = String::new();
    while j + 1 < chars.len() + 1 {
        if j + 1 < chars.len() && chars[j] == ']' && chars[j + 1] == ']' {
            return Some((content, j + 2));
        }
        if j >= chars.len() {
            return None;
        }
        content.push(chars[j]);
        j += 1;
    }
    None
}

fn rewrite_wiki_target(content: &str, renames: &RenameMap<'_>) -> (String, bool) {
    let (target, alias) = match content.split_once('|') {
        Some((t, a)) => (t, Some(a)),
        None => (content, None),
    };
    let rewritten_target = rename_if_matches(target, renames);
    let changed = rewritten_target != target;
    let out = match alias {
        Some(a) => format!("{rewritten_target}|{a}"),
        None => rewritten_target.to_string(),
    };
    (out, changed)
}

fn parse_md_link(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let mut j = start + 1;
    let mut label = String::new();
    let mut depth = 1;
    while j < chars.len() {
        match chars[j] {
            '[' => depth += 1,
            ']' if depth == 1 => break,
            ']' => depth -= 1,
            _ => {}
        }
        label.push(chars[j]);
        j += 1;
    }
    if j >= chars.len() || chars[j] != ']' {
        return None;
    }
    j += 1;
    if j >= chars.len() || chars[j] != '(' {
        return None;
    }
    j += 1;
    let mut target = String::new();
    while j < chars.len() && chars[j] != ')' {
        target.push(chars[j]);
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }
    j += 1;
    Some((label, target, j))
}

fn rewrite_md_target(target: &str, renames: &RenameMap<'_>) -> (String, bool) {
    let (path, suffix) = match target.find(['#', ' ']) {
        Some(pos) => (&target[..pos], &target[pos..]),
        None => (target, ""),
    };
    let rewritten_path = rename_if_matches(path, renames);
    let changed = rewritten_path != path;
    (format!("{rewritten_path}{suffix}"), changed)
}

fn rename_if_matches<'a>(path: &'a str, renames: &RenameMap<'_>) -> std::borrow::Cow<'a, str> {
    let trimmed = path.trim_end_matches(".md");
    for (&old, &new) in renames {
        let old_trimmed = old.trim_end_matches(".md");
        if trimmed == old_trimmed {
            let had_ext = path.ends_with(".md");
            return std::borrow::Cow::Owned(if had_ext {
                format!("{new}.md")
            } else {
                new.to_string()
            });
        }
    }
    std::borrow::Cow::Borrowed(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renames<'a>(pairs: &[(&'a str, &'a str)]) -> RenameMap<'a> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn rewrites_markdown_link() {
        let body = "See [notes](Old/Path.md) for more.";
        let r = renames(&[("Old/Path.md", "New/Path.md")]);
        let (out, changed) = rewrite(body, &r);
        assert!(changed);
        assert_eq!(out, "See [notes](New/Path.md) for more.");
    }

    #[test]
    fn rewrites_wiki_link() {
        let body = "See [[Old/Path]] for more.";
        let r = renames(&[("Old/Path", "New/Path")]);
        let (out, changed) = rewrite(body, &r);
        assert!(changed);
        assert_eq!(out, "See [[New/Path]] for more.");
    }

    #[test]
    fn rewrites_wiki_link_with_alias() {
        let body = "See [[Old/Path|display text]].";
        let r = renames(&[("Old/Path", "New/Path")]);
        let (out, changed) = rewrite(body, &r);
        assert!(changed);
        assert_eq!(out, "See [[New/Path|display text]].");
    }

    #[test]
    fn preserves_anchor_on_markdown_link() {
        let body = "[ref](Old/Path.md#section)";
        let r = renames(&[("Old/Path.md", "New/Path.md")]);
        let (out, _) = rewrite(body, &r);
        assert_eq!(out, "[ref](New/Path.md#section)");
    }

    #[test]
    fn skips_fenced_code_blocks() {
        let body = "```\n[notes](Old/Path.md)\n```\n";
        let r = renames(&[("Old/Path.md", "New/Path.md")]);
        let (out, changed) = rewrite(body, &r);
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn skips_inline_code_spans() {
        let body = "Use `[notes](Old/Path.md)` literally.";
        let r = renames(&[("Old/Path.md", "New/Path.md")]);
        let (out, changed) = rewrite(body, &r);
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn leaves_unrelated_links_untouched() {
        let body = "[other](Other/Path.md)";
        let r = renames(&[("Old/Path.md", "New/Path.md")]);
        let (out, changed) = rewrite(body, &r);
        assert!(!changed);
        assert_eq!(out, body);
    }

    #[test]
    fn rewrite_tree_updates_only_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "[ref](Notes/Old.md)").unwrap();
        std::fs::write(dir.path().join("b.md"), "no links here").unwrap();

        let r = renames(&[("Notes/Old.md", "Docs/New.md")]);
        let touched = rewrite_tree(dir.path(), &r).unwrap();

        assert_eq!(touched, vec![std::path::PathBuf::from("a.md")]);
        let content = std::fs::read_to_string(dir.path().join("a.md")).unwrap();
        assert_eq!(content, "[ref](Docs/New.md)");
    }

    #[test]
    fn handles_multiple_renames_in_one_body() {
        let body = "[a](A.md) and [[B]]";
        let r = renames(&[("A.md", "A2.md"), ("B", "B2")]);
        let (out, changed) = rewrite(body, &r);
        assert!(changed);
        assert_eq!(out, "[a](A2.md) and [[B2]]");
    }
}
