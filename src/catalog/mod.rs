//! Catalog module: canonical records and the merge engine
//!
//! # Components
//!
//! - `RawRecord` / `CanonicalRecord`: a product observation before and after canonicalization
//! - `IdentityKey`: the deduplication key
//! - `MergeEngine`: resolves repeated observations and reports price drift

mod identity_key;
mod merge;
mod record;

pub use identity_key::{normalize_name, normalize_size, IdentityKey};
pub use merge::{canonicalize, MergeContext, MergeEngine, MergeOutcome, MergeStats, ValidationError};
pub use record::{
    from_cents, to_cents, Availability, CanonicalRecord, PriceChange, RawRecord, SourceRef,
};
