//! Generic JSON field mapping
//!
//! Product payloads differ from site to site but reuse a small vocabulary of
//! field names. This module maps that vocabulary onto `RawRecord` and finds
//! product arrays and pagination hints inside arbitrary JSON documents.

use crate::catalog::{Availability, RawRecord};
use crate::extract::Strategy;
use serde_json::{Map, Value};

const ID_KEYS: &[&str] = &[
    "id",
    "productId",
    "productCode",
    "code",
    "sku",
    "objectID",
    "articleNumber",
];
const NAME_KEYS: &[&str] = &["name", "productName", "title", "displayName"];
const BRAND_KEYS: &[&str] = &["brand", "brandName"];
const PRICE_KEYS: &[&str] = &["price", "currentPrice", "salePrice"];
const CURRENCY_KEYS: &[&str] = &["currency", "priceCurrency"];
const UNIT_PRICE_KEYS: &[&str] = &["unitPrice", "pricePerUnit"];
const UOM_KEYS: &[&str] = &["unitPriceUom", "uom", "unitOfMeasure"];
const SIZE_KEYS: &[&str] = &["size", "packageSize", "packageSizing", "netContent"];
const AVAILABILITY_KEYS: &[&str] = &["availability", "stockStatus", "inventoryIndicator"];
const CATEGORY_KEYS: &[&str] = &["categoryPath", "category", "breadcrumbs"];
const URL_KEYS: &[&str] = &["url", "link", "productUrl", "href"];

/// Keys under which product arrays are commonly found
pub const RECORD_ARRAY_KEYS: &[&str] = &[
    "products",
    "productList",
    "searchResults",
    "categoryProducts",
    "items",
    "hits",
    "productTiles",
    "results",
];

/// Maps a JSON product object to a raw record
///
/// Returns None for values that are not objects or carry none of id, name
/// and price.
pub fn record_from_json(value: &Value, strategy: Strategy) -> Option<RawRecord> {
    let obj = value.as_object()?;
    let offers = first_offer(obj);

    let mut record = RawRecord::new(strategy, value.clone());
    record.source_id = first_string(obj, ID_KEYS);
    record.name = first_string(obj, NAME_KEYS);
    record.brand = first_value(obj, BRAND_KEYS).and_then(brand_value);
    record.price = first_value(obj, PRICE_KEYS)
        .and_then(price_value)
        .or_else(|| offers.and_then(|o| o.get("price")).and_then(price_value));
    record.currency = first_string(obj, CURRENCY_KEYS)
        .or_else(|| offers.and_then(|o| first_string(o, CURRENCY_KEYS)));
    record.unit_price = first_value(obj, UNIT_PRICE_KEYS).and_then(price_value);
    record.unit_price_uom = first_string(obj, UOM_KEYS).or_else(|| {
        first_value(obj, UNIT_PRICE_KEYS)
            .and_then(Value::as_object)
            .and_then(|u| first_string(u, &["unit", "uom"]))
    });
    record.size = first_string(obj, SIZE_KEYS);
    record.availability = availability_value(obj)
        .or_else(|| offers.and_then(availability_value))
        .unwrap_or_default();
    record.category_path = first_value(obj, CATEGORY_KEYS).and_then(category_value);
    record.url = first_string(obj, URL_KEYS);

    if record.source_id.is_none() && record.name.is_none() && record.price.is_none() {
        return None;
    }
    Some(record)
}

/// Maps every object of an array to raw records
pub fn records_from_array(values: &[Value], strategy: Strategy) -> Vec<RawRecord> {
    values
        .iter()
        .filter_map(|v| record_from_json(v, strategy))
        .collect()
}

/// Follows a dotted path such as `data.search.products`
///
/// Numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Finds the first array of objects stored under a known record key
///
/// The search is breadth-first so shallow arrays win over deeply nested ones.
pub fn find_record_array(value: &Value, max_depth: usize) -> Option<&Vec<Value>> {
    let mut level = vec![value];
    for _ in 0..=max_depth {
        let mut next = Vec::new();
        for node in level {
            match node {
                Value::Object(map) => {
                    for key in RECORD_ARRAY_KEYS {
                        if let Some(Value::Array(items)) = map.get(*key) {
                            if items.iter().any(Value::is_object) {
                                return Some(items);
                            }
                        }
                    }
                    next.extend(map.values());
                }
                Value::Array(items) => next.extend(items.iter()),
                _ => {}
            }
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    None
}

/// Reads a "more pages follow" hint from a listing payload
///
/// Understands `hasMore`/`hasNextPage`, 1-based `pageNumber`/`currentPage`
/// with `totalPages`, and 0-based `page` with `nbPages`.
pub fn pagination_hint(value: &Value) -> Option<bool> {
    const CONTAINERS: &[&str] = &[
        "",
        "pagination",
        "meta",
        "props.pageProps",
        "props.pageProps.pagination",
    ];

    CONTAINERS
        .iter()
        .filter_map(|path| lookup_path(value, path))
        .filter_map(Value::as_object)
        .find_map(hint_from_object)
}

fn hint_from_object(obj: &Map<String, Value>) -> Option<bool> {
    for key in ["hasMore", "has_more", "hasNextPage"] {
        if let Some(flag) = obj.get(key).and_then(Value::as_bool) {
            return Some(flag);
        }
    }

    let total = obj.get("totalPages").and_then(as_u64);
    let current = obj
        .get("pageNumber")
        .or_else(|| obj.get("currentPage"))
        .and_then(as_u64);
    if let (Some(total), Some(current)) = (total, current) {
        return Some(current < total);
    }

    let nb_pages = obj.get("nbPages").and_then(as_u64);
    let page = obj.get("page").and_then(as_u64);
    if let (Some(nb_pages), Some(page)) = (nb_pages, page) {
        return Some(page + 1 < nb_pages);
    }

    None
}

/// Parses a price from text such as `"$4.99"`, `"4,99 €"` or `"1,299.00"`
///
/// When the text holds several numbers (`"2 for $5.00"`, `"$4.99 ($1.25/100g)"`)
/// the first one written next to a currency symbol is taken; without such a
/// number the text is ambiguous and yields None.
pub fn parse_price(text: &str) -> Option<f64> {
    let tokens = numeric_tokens(text);
    let (start, end) = match tokens.as_slice() {
        [] => return None,
        [only] => *only,
        many => many
            .iter()
            .copied()
            .find(|&(start, end)| next_to_currency(text, start, end))?,
    };

    let value = parse_number(&text[start..end])?;
    let before = text[..start]
        .trim_end()
        .trim_end_matches(CURRENCY_SYMBOLS)
        .trim_end();
    Some(if before.ends_with('-') { -value } else { value })
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '¢'];

/// Byte ranges of the digit runs in `text`, separators included
fn numeric_tokens(text: &str) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (i, c) in text.char_indices() {
        match current {
            Some((start, _)) if c.is_ascii_digit() => current = Some((start, i + 1)),
            Some(_) if c == '.' || c == ',' => {}
            Some(token) => {
                tokens.push(token);
                current = None;
            }
            None if c.is_ascii_digit() => current = Some((i, i + 1)),
            None => {}
        }
    }
    tokens.extend(current);
    tokens
}

fn next_to_currency(text: &str, start: usize, end: usize) -> bool {
    text[..start].trim_end().ends_with(CURRENCY_SYMBOLS)
        || text[end..].trim_start().starts_with(CURRENCY_SYMBOLS)
}

/// Reads `4.99`, `4,99`, `1,299` or `1,299.00` as a number
fn parse_number(token: &str) -> Option<f64> {
    let normalized = if token.contains('.') {
        token.replace(',', "")
    } else if let Some((whole, frac)) = token.rsplit_once(',') {
        // A lone comma followed by two digits is a decimal separator
        if frac.len() == 2 && !whole.contains(',') {
            format!("{}.{}", whole, frac)
        } else {
            token.replace(',', "")
        }
    } else {
        token.to_string()
    };
    normalized.parse().ok()
}

fn first_value<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(string_value)
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn brand_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => first_string(map, &["name", "brandName"]),
        other => string_value(other),
    }
}

fn price_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        Value::Object(map) => first_value(map, &["amount", "value", "price"]).and_then(price_value),
        Value::Array(items) => items.first().and_then(price_value),
        _ => None,
    }
}

fn availability_value(obj: &Map<String, Value>) -> Option<Availability> {
    if let Some(flag) = obj.get("inStock").and_then(Value::as_bool) {
        return Some(if flag {
            Availability::InStock
        } else {
            Availability::OutOfStock
        });
    }
    first_string(obj, AVAILABILITY_KEYS)
        .map(|text| Availability::from_text(&text))
        .filter(|a| *a != Availability::Unknown)
}

fn category_value(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => first_string(map, &["name", "label", "title"]),
                    other => string_value(other),
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(" > "))
        }
        other => string_value(other),
    }
}

fn first_offer(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    match obj.get("offers")? {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
