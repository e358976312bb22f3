use crate::catalog::identity_key::IdentityKey;
use crate::extract::Strategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stock status of a listed product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    #[default]
    Unknown,
}

impl Availability {
    /// Interprets free-form availability text such as `https://schema.org/InStock`
    pub fn from_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let compact: String = lowered.chars().filter(|c| c.is_alphanumeric()).collect();
        if compact.contains("outofstock")
            || compact.contains("soldout")
            || compact.contains("unavailable")
            || compact.contains("discontinued")
        {
            Self::OutOfStock
        } else if compact.contains("instock")
            || compact.contains("available")
            || compact.contains("limitedstock")
        {
            Self::InStock
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields extracted from one product listing, before canonicalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub unit_price: Option<f64>,
    pub unit_price_uom: Option<String>,
    pub size: Option<String>,
    pub availability: Availability,
    pub category_path: Option<String>,
    pub url: Option<String>,
    /// The payload the fields were read from
    pub payload: serde_json::Value,
    /// Strategy that produced this record
    pub strategy: Strategy,
}

impl RawRecord {
    /// Creates an empty record for the given strategy and payload
    pub fn new(strategy: Strategy, payload: serde_json::Value) -> Self {
        Self {
            source_id: None,
            name: None,
            brand: None,
            price: None,
            currency: None,
            unit_price: None,
            unit_price_uom: None,
            size: None,
            availability: Availability::Unknown,
            category_path: None,
            url: None,
            payload,
            strategy,
        }
    }

    /// Hex SHA-256 of the serialized payload
    pub fn payload_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Where an observation came from
///
/// A plain reference, never a link to another record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub site: String,
    pub store: String,
    pub source_id: Option<String>,
    pub query: String,
    pub url: Option<String>,
}

/// The single merged record for an identity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub key: IdentityKey,
    pub name: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub unit_price: Option<f64>,
    pub unit_price_uom: Option<String>,
    pub size: Option<String>,
    pub availability: Availability,
    pub category_path: Option<String>,
    pub source: SourceRef,
    pub captured_at: DateTime<Utc>,
    /// Digest of the raw payload this record was built from
    pub payload_ref: String,
    pub strategy: Strategy,
}

impl CanonicalRecord {
    pub fn price_cents(&self) -> Option<i64> {
        self.price.map(to_cents)
    }
}

/// Observed price drift for one identity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub key: IdentityKey,
    pub old_price: f64,
    pub new_price: f64,
    pub currency: String,
    pub previous_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

/// Converts a price to integer cents for comparison
pub fn to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Converts integer cents back to a price
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}
