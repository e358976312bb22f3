//! Machine-readable search and listing endpoints
//!
//! Storefront APIs answer with JSON; records are located by the site's
//! `records-path` or by the first known product array.

use crate::config::SiteCapabilities;
use crate::extract::fields::{find_record_array, lookup_path, pagination_hint, records_from_array};
use crate::extract::{ExtractedPage, Strategy};
use serde_json::Value;

/// Extracts records from a machine-readable endpoint payload
///
/// The site's `records-path` is tried first; without one, or when it does
/// not resolve, the first known product array in the document is used.
pub fn extract_endpoint(body: &str, site: &SiteCapabilities) -> ExtractedPage {
    let document: Value = match serde_json::from_str(body) {
        Ok(document) => document,
        Err(e) => {
            tracing::debug!("Endpoint payload for {} is not JSON: {}", site.key, e);
            return ExtractedPage::default();
        }
    };

    let configured = site
        .records_path
        .as_deref()
        .and_then(|path| lookup_path(&document, path))
        .and_then(Value::as_array);

    let records = match configured.or_else(|| find_record_array(&document, 4)) {
        Some(items) => records_from_array(items, Strategy::StructuredEndpoint),
        None => match &document {
            Value::Array(items) => records_from_array(items, Strategy::StructuredEndpoint),
            _ => Vec::new(),
        },
    };

    ExtractedPage {
        records,
        has_more: pagination_hint(&document),
    }
}
