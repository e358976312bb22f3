//! Structured data embedded in listing pages
//!
//! Two sources are read, in order:
//! - the `__NEXT_DATA__` script of Next.js storefronts
//! - `application/ld+json` blocks describing item lists or products

use crate::extract::fields::{find_record_array, pagination_hint, record_from_json, records_from_array};
use crate::extract::{ExtractedPage, Strategy};
use scraper::{Html, Selector};
use serde_json::Value;

/// Extracts records from data embedded in an HTML page
pub fn extract_embedded(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    if let Some(page) = next_data(&document) {
        if !page.records.is_empty() {
            return page;
        }
    }

    ExtractedPage {
        records: json_ld(&document),
        has_more: None,
    }
}

/// Reads products from the `__NEXT_DATA__` script
fn next_data(document: &Html) -> Option<ExtractedPage> {
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();

    let data: Value = match serde_json::from_str(&text) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("Malformed __NEXT_DATA__ payload: {}", e);
            return None;
        }
    };

    let root = data.pointer("/props/pageProps").unwrap_or(&data);
    let records = find_record_array(root, 8)
        .map(|items| records_from_array(items, Strategy::EmbeddedData))
        .unwrap_or_default();

    Some(ExtractedPage {
        records,
        has_more: pagination_hint(&data),
    })
}

/// Reads products from JSON-LD blocks
fn json_ld(document: &Html) -> Vec<crate::catalog::RawRecord> {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for script in document.select(&selector) {
        let text: String = script.text().collect();
        let value = match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Skipping malformed JSON-LD block: {}", e);
                continue;
            }
        };

        let mut products = Vec::new();
        collect_products(&value, &mut products);
        records.extend(
            products
                .into_iter()
                .filter_map(|p| record_from_json(p, Strategy::EmbeddedData)),
        );
    }

    records
}

/// Walks a JSON-LD value and collects every `Product` node
fn collect_products<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_products(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_products(graph, out);
            }

            if has_type(value, "Product") {
                out.push(value);
                return;
            }

            if has_type(value, "ListItem") {
                if let Some(item) = map.get("item") {
                    collect_products(item, out);
                }
            }

            if let Some(elements) = map.get("itemListElement") {
                collect_products(elements, out);
            }
        }
        _ => {}
    }
}

fn has_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}
