//! Identity key derivation
//!
//! Two kinds of key exist:
//! - strong keys built from a stable source identifier, `{site}#id:{source_id}`
//! - fallback keys built from normalized name, size and store, `{site}#{name}|{size}|{store}`
//!
//! Fallback keys can collide for genuinely different products that share a
//! name and size; the merge engine then keeps the most recent observation.

use crate::catalog::record::RawRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Words dropped from names before they become part of a key
const NOISE_WORDS: &[&str] = &["the", "a", "an", "and", "of", "with", "by", "for"];

/// Canonical key used to deduplicate observations of the same product
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derives the key for a record seen on `site` at `store`
    ///
    /// Returns None when neither a source identifier nor a usable name exists.
    pub fn derive(site: &str, store: &str, record: &RawRecord) -> Option<Self> {
        if let Some(id) = record.source_id.as_deref().map(str::trim) {
            if !id.is_empty() {
                return Some(Self(format!("{}#id:{}", site, id)));
            }
        }

        let name = normalize_name(record.name.as_deref()?);
        if name.is_empty() {
            return None;
        }
        let size = record.size.as_deref().map(normalize_size).unwrap_or_default();
        Some(Self(format!(
            "{}#{}|{}|{}",
            site,
            name,
            size,
            store.trim().to_lowercase()
        )))
    }

    /// Wraps an already-derived key, e.g. one read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key came from a source identifier
    pub fn is_strong(&self) -> bool {
        self.0.contains("#id:")
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-folds, strips punctuation and noise words, and collapses whitespace
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !NOISE_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercases a size and removes everything but letters, digits and dots
///
/// `"500 g"`, `"500G"` and `"500-g"` all become `"500g"`.
pub fn normalize_size(size: &str) -> String {
    size.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.')
        .collect()
}
