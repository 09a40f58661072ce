//! Content digest (C2)
//!
//! The digest identifies a cast file's *meaningful* content: front matter
//! minus `last-updated`, plus body, rendered through a canonical form that
//! does not depend on `serde_yaml_ng`'s emission defaults. Two files with
//! the same fields in different key order, or the same scalars with
//! different quoting, hash identically.

use serde_yaml_ng::Value;
use sha2::{Digest as _, Sha256};

use crate::frontmatter::{FrontMatter, KEY_LAST_UPDATED};

/// `sha256:<hex>` digest of a cast file's meaningful content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContentDigest {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ContentDigest(s.to_string()))
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(ContentDigest(String::deserialize(d)?))
    }
}

/// Compute the content digest of `front_matter` (excluding `last-updated`)
/// and `body`.
pub fn digest(front_matter: &FrontMatter, body: &str) -> ContentDigest {
    let mut canonical = String::new();
    let mut fm = front_matter.0.clone();
    fm.remove(Value::String(KEY_LAST_UPDATED.to_string()));

    canonicalize_mapping(&fm, 0, &mut canonical);
    canonical.push('\x00');
    canonical.push_str(body.trim_end_matches('\n'));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    ContentDigest(format!("sha256:{:x}", hasher.finalize()))
}

fn canonicalize_mapping(mapping: &serde_yaml_ng::Mapping, indent: usize, out: &mut String) {
    let mut entries: Vec<(String, &Value)> = mapping
        .iter()
        .map(|(k, v)| (k.as_str().unwrap_or_default().to_string(), v))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (key, value) in entries {
        push_indent(out, indent);
        out.push_str(&key);
        out.push(':');
        canonicalize_value(value, indent, out);
    }
}

fn canonicalize_value(value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Null => out.push('\n'),
        Value::Bool(b) => {
            out.push(' ');
            out.push_str(if *b { "true" } else { "false" });
            out.push('\n');
        }
        Value::Number(n) => {
            out.push(' ');
            out.push_str(&n.to_string());
            out.push('\n');
        }
        Value::String(s) => {
            out.push(' ');
            out.push_str(s.trim());
            out.push('\n');
        }
        Value::Sequence(seq) => {
            out.push('\n');
            for item in seq {
                push_indent(out, indent + 1);
                out.push('-');
                match item {
                    Value::Mapping(m) => {
                        out.push('\n');
                        canonicalize_mapping(m, indent + 2, out);
                    }
                    other => canonicalize_value(other, indent + 1, out),
                }
            }
        }
        Value::Mapping(m) => {
            out.push('\n');
            canonicalize_mapping(m, indent + 1, out);
        }
        Value::Tagged(t) => canonicalize_value(&t.value, indent, out),
    }
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::{KEY_CAST_ID, KEY_CAST_VERSION};

    fn fm_with(pairs: &[(&str, Value)]) -> FrontMatter {
        let mut fm = FrontMatter::new();
        for (k, v) in pairs {
            fm.insert(k, v.clone());
        }
        fm
    }

    #[test]
    fn digest_ignores_last_updated() {
        let fm1 = fm_with(&[
            (KEY_CAST_ID, Value::String("abc".into())),
            (KEY_LAST_UPDATED, Value::String("2024-01-01".into())),
        ]);
        let fm2 = fm_with(&[
            (KEY_CAST_ID, Value::String("abc".into())),
            (KEY_LAST_UPDATED, Value::String("2025-06-01".into())),
        ]);
        assert_eq!(digest(&fm1, "body"), digest(&fm2, "body"));
    }

    #[test]
    fn digest_ignores_key_order() {
        let fm1 = fm_with(&[
            (KEY_CAST_ID, Value::String("abc".into())),
            (KEY_CAST_VERSION, Value::Number(1.into())),
        ]);
        let fm2 = fm_with(&[
            (KEY_CAST_VERSION, Value::Number(1.into())),
            (KEY_CAST_ID, Value::String("abc".into())),
        ]);
        assert_eq!(digest(&fm1, "body"), digest(&fm2, "body"));
    }

    #[test]
    fn digest_ignores_scalar_quoting_via_parse() {
        let m1: serde_yaml_ng::Mapping = serde_yaml_ng::from_str("k: hello").unwrap();
        let m2: serde_yaml_ng::Mapping = serde_yaml_ng::from_str("k: \"hello\"").unwrap();
        assert_eq!(
            digest(&FrontMatter(m1), "body"),
            digest(&FrontMatter(m2), "body")
        );
    }

    #[test]
    fn digest_sensitive_to_body() {
        let fm = fm_with(&[(KEY_CAST_ID, Value::String("abc".into()))]);
        assert_ne!(digest(&fm, "one"), digest(&fm, "two"));
    }

    #[test]
    fn digest_sensitive_to_content_changes() {
        let fm1 = fm_with(&[(KEY_CAST_ID, Value::String("abc".into()))]);
        let fm2 = fm_with(&[(KEY_CAST_ID, Value::String("xyz".into()))]);
        assert_ne!(digest(&fm1, "body"), digest(&fm2, "body"));
    }

    #[test]
    fn digest_trims_trailing_body_newlines() {
        let fm = fm_with(&[(KEY_CAST_ID, Value::String("abc".into()))]);
        assert_eq!(digest(&fm, "body"), digest(&fm, "body\n\n"));
    }

    #[test]
    fn digest_format_has_sha256_prefix() {
        let fm = FrontMatter::new();
        let d = digest(&fm, "");
        assert!(d.as_str().starts_with("sha256:"));
        assert_eq!(d.as_str().len(), "sha256:".len() + 64);
    }
}
