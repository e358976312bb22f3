//! Product tiles in a rendered page
//!
//! This is the last resort: it reads whatever the DOM shows, so it is the
//! least precise strategy and needs the rendering back-end to have run the
//! page's scripts first.

use crate::catalog::{Availability, RawRecord};
use crate::config::SiteCapabilities;
use crate::extract::fields::parse_price;
use crate::extract::{ExtractedPage, Strategy};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};
use url::Url;

const DEFAULT_TILE_SELECTORS: &[&str] = &[
    r#"[data-testid*="product-tile"]"#,
    ".product-tile",
    ".product-card",
    r#"[class*="ProductTile"]"#,
    r#"article[class*="product"]"#,
];

const NAME_SELECTORS: &[&str] = &[
    r#"[data-testid="product-title"]"#,
    r#"[class*="product-name"]"#,
    r#"[class*="ProductName"]"#,
    "h3",
    "h4",
    "h2",
];

const PRICE_SELECTORS: &[&str] = &[
    r#"[data-testid="product-price"]"#,
    r#"[data-testid*="price"]"#,
    r#"[class*="price"]"#,
    r#"[class*="Price"]"#,
];

const BRAND_SELECTORS: &[&str] = &[r#"[data-testid="product-brand"]"#, r#"[class*="brand"]"#];

const SIZE_SELECTORS: &[&str] = &[
    r#"[data-testid="product-package-size"]"#,
    r#"[class*="package-size"]"#,
    r#"[class*="size"]"#,
];

const ID_ATTRIBUTES: &[&str] = &["data-product-id", "data-id", "data-sku", "data-code"];

/// Extracts product tiles from a rendered listing page
///
/// # Arguments
///
/// * `html` - The rendered DOM
/// * `page_url` - URL the page was loaded from, used to resolve product links
/// * `site` - Provides an optional site-specific tile selector
pub fn extract_rendered(html: &str, page_url: &str, site: &SiteCapabilities) -> ExtractedPage {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let custom: Vec<&str> = site.tile_selector.as_deref().into_iter().collect();
    let tile_selectors = if custom.is_empty() {
        DEFAULT_TILE_SELECTORS
    } else {
        custom.as_slice()
    };

    let tiles: Vec<ElementRef> = tile_selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .map(|selector| document.select(&selector).collect::<Vec<_>>())
        .find(|tiles| !tiles.is_empty())
        .unwrap_or_default();

    let records = tiles
        .into_iter()
        .filter_map(|tile| record_from_tile(tile, base.as_ref()))
        .collect();

    ExtractedPage {
        records,
        has_more: next_page_hint(&document),
    }
}

fn record_from_tile(tile: ElementRef, base: Option<&Url>) -> Option<RawRecord> {
    let name = first_text(tile, NAME_SELECTORS)?;
    let price_text = first_text(tile, PRICE_SELECTORS);
    let brand = first_text(tile, BRAND_SELECTORS);
    let size = first_text(tile, SIZE_SELECTORS);

    let source_id = ID_ATTRIBUTES
        .iter()
        .find_map(|attr| tile.value().attr(attr))
        .map(str::to_string)
        .or_else(|| descendant_attr(tile, ID_ATTRIBUTES));

    let url = Selector::parse("a[href]")
        .ok()
        .and_then(|s| tile.select(&s).next())
        .and_then(|a| a.value().attr("href"))
        .map(|href| match base.and_then(|b| b.join(href).ok()) {
            Some(absolute) => absolute.to_string(),
            None => href.to_string(),
        });

    let tile_text: String = tile.text().collect::<Vec<_>>().join(" ").to_lowercase();
    let availability = if tile_text.contains("out of stock") || tile_text.contains("sold out") {
        Availability::OutOfStock
    } else if tile_text.contains("add to cart") {
        Availability::InStock
    } else {
        Availability::Unknown
    };

    let mut payload = Map::new();
    payload.insert("name".to_string(), json!(name));
    payload.insert("price_text".to_string(), json!(price_text));
    payload.insert("brand".to_string(), json!(brand));
    payload.insert("size".to_string(), json!(size));
    payload.insert("id".to_string(), json!(source_id));
    payload.insert("url".to_string(), json!(url));

    let mut record = RawRecord::new(Strategy::RenderedPage, Value::Object(payload));
    record.price = price_text.as_deref().and_then(parse_price);
    record.name = Some(name);
    record.brand = brand;
    record.size = size;
    record.source_id = source_id;
    record.url = url;
    record.availability = availability;
    Some(record)
}

fn first_text(element: ElementRef, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            element.select(&selector).find_map(|e| {
                let text = e.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                (!text.is_empty()).then_some(text)
            })
        })
}

fn descendant_attr(element: ElementRef, attributes: &[&str]) -> Option<String> {
    attributes.iter().find_map(|attr| {
        let selector = Selector::parse(&format!("[{}]", attr)).ok()?;
        element
            .select(&selector)
            .next()
            .and_then(|e| e.value().attr(attr))
            .map(str::to_string)
    })
}

/// Looks for an enabled "next page" control
fn next_page_hint(document: &Html) -> Option<bool> {
    let selector =
        Selector::parse(r#"a[rel="next"], [aria-label="Next page"], .pagination-next"#).ok()?;
    let next = document.select(&selector).next()?;
    let disabled = next.value().attr("disabled").is_some()
        || next.value().attr("aria-disabled") == Some("true");
    Some(!disabled)
}
