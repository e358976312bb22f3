//! Canonicalization and merge engine
//!
//! Every raw record goes through the same steps:
//! 1. validate it and derive its identity key
//! 2. insert it if the key was never seen
//! 3. otherwise replace the stored record only if the new capture is strictly newer
//! 4. emit a `PriceChange` when a replacement carries a different price
//! 5. mark the key seen
//!
//! The engine keeps no records itself. What it needs to know about earlier
//! observations lives in the checkpoint's `SeenSet`, so the rules still hold
//! after a resume.

use crate::catalog::identity_key::IdentityKey;
use crate::catalog::record::{from_cents, CanonicalRecord, PriceChange, RawRecord, SourceRef};
use crate::storage::{SeenEntry, SeenSet};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a record is dropped before merging
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("record has no name")]
    MissingName,

    #[error("record has no store")]
    MissingStore,

    #[error("record has no derivable identity")]
    NoIdentity,

    #[error("negative price {0}")]
    NegativePrice(f64),

    #[error("negative unit price {0}")]
    NegativeUnitPrice(f64),
}

/// Where and when a batch of raw records was observed
#[derive(Debug, Clone)]
pub struct MergeContext<'a> {
    pub site: &'a str,
    pub store: &'a str,
    pub query: &'a str,
    /// Currency used when the record does not carry one
    pub currency: &'a str,
    pub captured_at: DateTime<Utc>,
}

/// Result of merging one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// First observation of the key
    Inserted(CanonicalRecord),
    /// Strictly newer observation of a known key
    Replaced {
        record: CanonicalRecord,
        price_change: Option<PriceChange>,
    },
    /// Older or same-time observation, the stored record stays
    Kept(IdentityKey),
    Rejected(ValidationError),
}

/// Running totals of merge outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: u64,
    pub replaced: u64,
    pub kept: u64,
    pub rejected: u64,
    pub price_changes: u64,
}

/// Merges raw observations into the canonical catalog
#[derive(Debug, Default)]
pub struct MergeEngine {
    stats: MergeStats,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Merges one raw record against the seen set
    ///
    /// # Arguments
    ///
    /// * `raw` - The extracted record
    /// * `ctx` - Site, store, query and capture time of the observation
    /// * `seen` - Keys already emitted, updated in place
    ///
    /// # Returns
    ///
    /// The outcome; the caller forwards inserted and replaced records to the
    /// output sink. Validation failures are returned, never raised.
    pub fn merge(
        &mut self,
        raw: &RawRecord,
        ctx: &MergeContext<'_>,
        seen: &mut SeenSet,
    ) -> MergeOutcome {
        let record = match canonicalize(raw, ctx) {
            Ok(record) => record,
            Err(e) => {
                self.stats.rejected += 1;
                return MergeOutcome::Rejected(e);
            }
        };

        let entry = SeenEntry {
            captured_at: record.captured_at,
            price_cents: record.price_cents(),
        };

        let previous = match seen.get(&record.key) {
            None => {
                seen.mark_seen(record.key.clone(), entry);
                self.stats.inserted += 1;
                return MergeOutcome::Inserted(record);
            }
            Some(previous) => *previous,
        };

        if record.captured_at <= previous.captured_at {
            self.stats.kept += 1;
            return MergeOutcome::Kept(record.key);
        }

        let price_change = match (previous.price_cents, entry.price_cents) {
            (Some(old), Some(new)) if old != new => Some(PriceChange {
                key: record.key.clone(),
                old_price: from_cents(old),
                new_price: from_cents(new),
                currency: record.currency.clone(),
                previous_at: previous.captured_at,
                observed_at: record.captured_at,
            }),
            _ => None,
        };

        seen.mark_seen(record.key.clone(), entry);
        self.stats.replaced += 1;
        if price_change.is_some() {
            self.stats.price_changes += 1;
        }
        MergeOutcome::Replaced {
            record,
            price_change,
        }
    }
}

/// Validates a raw record and builds its canonical form
pub fn canonicalize(
    raw: &RawRecord,
    ctx: &MergeContext<'_>,
) -> Result<CanonicalRecord, ValidationError> {
    let name = raw
        .name
        .as_deref()
        .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::MissingName)?;

    if ctx.store.trim().is_empty() {
        return Err(ValidationError::MissingStore);
    }

    if let Some(price) = raw.price.filter(|p| *p < 0.0 || !p.is_finite()) {
        return Err(ValidationError::NegativePrice(price));
    }
    if let Some(unit) = raw.unit_price.filter(|p| *p < 0.0 || !p.is_finite()) {
        return Err(ValidationError::NegativeUnitPrice(unit));
    }

    let key = IdentityKey::derive(ctx.site, ctx.store, raw).ok_or(ValidationError::NoIdentity)?;

    Ok(CanonicalRecord {
        key,
        name,
        brand: clean(raw.brand.as_deref()),
        price: raw.price,
        currency: clean(raw.currency.as_deref()).unwrap_or_else(|| ctx.currency.to_string()),
        unit_price: raw.unit_price,
        unit_price_uom: clean(raw.unit_price_uom.as_deref()),
        size: clean(raw.size.as_deref()),
        availability: raw.availability,
        category_path: clean(raw.category_path.as_deref()),
        source: SourceRef {
            site: ctx.site.to_string(),
            store: ctx.store.to_string(),
            source_id: clean(raw.source_id.as_deref()),
            query: ctx.query.to_string(),
            url: clean(raw.url.as_deref()),
        },
        captured_at: ctx.captured_at,
        payload_ref: raw.payload_digest(),
        strategy: raw.strategy,
    })
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
