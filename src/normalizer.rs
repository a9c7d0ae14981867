use serde_json::Value;

use crate::types::{Condition, Listing};

/// Per-record rejection. Rejected records are dropped and counted — never
/// coerced to defaults that would corrupt scoring downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordReject {
    MissingId,
    BadPrice,
    NegativePrice,
    /// Payload shape we do not recognize; carries a short sample for the log.
    UnknownShape(String),
}

#[derive(Debug, Default)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub rejected_missing_id: usize,
    pub rejected_bad_price: usize,
    pub rejected_negative_price: usize,
    pub rejected_unknown_shape: usize,
    /// Sample of unknown-shape payload prefixes, capped at 10.
    pub shape_samples: Vec<String>,
}

impl NormalizeStats {
    pub fn record(&mut self, reject: &RecordReject) {
        match reject {
            RecordReject::MissingId => self.rejected_missing_id += 1,
            RecordReject::BadPrice => self.rejected_bad_price += 1,
            RecordReject::NegativePrice => self.rejected_negative_price += 1,
            RecordReject::UnknownShape(sample) => {
                self.rejected_unknown_shape += 1;
                if self.shape_samples.len() < 10 {
                    self.shape_samples.push(sample.clone());
                }
            }
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected_missing_id
            + self.rejected_bad_price
            + self.rejected_negative_price
            + self.rejected_unknown_shape
    }
}

/// Map one raw catalog record into the canonical Listing.
///
/// Three shapes are recognized and anything else fails closed:
/// - standard: a flat item object;
/// - promoted: a wrapper with the item payload nested under `item` and a
///   `promoted`/`highlighted` marker;
/// - bundle: a multi-item lot with an `items` array, normalized as one
///   Listing priced at the lot total.
pub fn normalize(value: &Value, seen_at_ns: u64) -> Result<Listing, RecordReject> {
    let obj = match value.as_object() {
        Some(o) => o,
        None => return Err(RecordReject::UnknownShape(sample_of(value))),
    };

    if obj.get("items").map(|i| i.is_array()).unwrap_or(false) {
        return normalize_bundle(value, seen_at_ns);
    }

    if let Some(item) = obj.get("item").filter(|i| i.is_object()) {
        let marked = obj.get("promoted").and_then(Value::as_bool).unwrap_or(false)
            || obj.get("highlighted").and_then(Value::as_bool).unwrap_or(false);
        if !marked {
            return Err(RecordReject::UnknownShape(sample_of(value)));
        }
        // Promoted wrapper: the inner item is a standard record. The original
        // wrapper is what we keep as the raw payload.
        let mut listing = normalize_standard(item, seen_at_ns)?;
        listing.raw = value.clone();
        return Ok(listing);
    }

    if obj.contains_key("id") || obj.contains_key("price") {
        return normalize_standard(value, seen_at_ns);
    }

    Err(RecordReject::UnknownShape(sample_of(value)))
}

fn normalize_standard(v: &Value, seen_at_ns: u64) -> Result<Listing, RecordReject> {
    let id = extract_id(v).ok_or(RecordReject::MissingId)?;
    let price = extract_price(v).ok_or(RecordReject::BadPrice)?;
    if price < 0.0 {
        return Err(RecordReject::NegativePrice);
    }

    Ok(Listing {
        id,
        title: str_field(v, "title").unwrap_or_default(),
        description: str_field(v, "description").unwrap_or_default(),
        price,
        currency: extract_currency(v),
        category: str_field(v, "category")
            .or_else(|| str_field(v, "catalog_title")),
        brand: str_field(v, "brand").or_else(|| str_field(v, "brand_title")),
        condition: str_field(v, "status")
            .or_else(|| str_field(v, "condition"))
            .as_deref()
            .and_then(Condition::parse),
        posted_at: extract_posted_at(v),
        favorites: u32_field(v, "favourite_count").or_else(|| u32_field(v, "favorites")).unwrap_or(0),
        views: u32_field(v, "view_count").or_else(|| u32_field(v, "views")).unwrap_or(0),
        url: str_field(v, "url"),
        item_count: 1,
        seen_at_ns,
        last_seen_ns: seen_at_ns,
        stale: false,
        raw: v.clone(),
    })
}

fn normalize_bundle(v: &Value, seen_at_ns: u64) -> Result<Listing, RecordReject> {
    let id = extract_id(v).ok_or(RecordReject::MissingId)?;
    let items = v
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| RecordReject::UnknownShape(sample_of(v)))?;

    // Lot total: an explicit price on the bundle wins; otherwise the sum of
    // item prices, required to be complete — a lot with unpriced items is
    // a bad price, not a guess.
    let price = match extract_price(v) {
        Some(p) => p,
        None => {
            let mut total = 0.0;
            for item in items {
                total += extract_price(item).ok_or(RecordReject::BadPrice)?;
            }
            total
        }
    };
    if price < 0.0 {
        return Err(RecordReject::NegativePrice);
    }

    Ok(Listing {
        id,
        title: str_field(v, "title").unwrap_or_else(|| format!("Bundle ({} items)", items.len())),
        description: str_field(v, "description").unwrap_or_default(),
        price,
        currency: extract_currency(v),
        category: str_field(v, "category"),
        brand: str_field(v, "brand").or_else(|| str_field(v, "brand_title")),
        condition: None,
        posted_at: extract_posted_at(v),
        favorites: u32_field(v, "favourite_count").unwrap_or(0),
        views: u32_field(v, "view_count").unwrap_or(0),
        url: str_field(v, "url"),
        item_count: items.len() as u32,
        seen_at_ns,
        last_seen_ns: seen_at_ns,
        stale: false,
        raw: v.clone(),
    })
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn extract_id(v: &Value) -> Option<String> {
    match v.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Price may arrive as a number, a numeric string, or a `{amount, currency_code}`
/// object depending on the endpoint version.
fn extract_price(v: &Value) -> Option<f64> {
    let p = v.get("price").or_else(|| v.get("total_item_price"))?;
    match p {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Object(_) => p
            .get("amount")
            .and_then(|a| a.as_f64().or_else(|| a.as_str().and_then(|s| s.parse().ok())))
            .filter(|f| f.is_finite()),
        _ => None,
    }
}

fn extract_currency(v: &Value) -> Option<String> {
    v.get("price")
        .and_then(|p| p.get("currency_code"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .or_else(|| str_field(v, "currency"))
}

pub(crate) fn extract_posted_at(v: &Value) -> Option<u64> {
    if let Some(ts) = v.get("created_at_ts").and_then(Value::as_u64) {
        return Some(ts);
    }
    v.get("created_at")
        .or_else(|| v.get("posted_at"))
        .and_then(Value::as_str)
        .and_then(parse_iso_to_unix_secs)
        .map(|f| f as u64)
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn u32_field(v: &Value, key: &str) -> Option<u32> {
    v.get(key).and_then(Value::as_u64).map(|n| n.min(u32::MAX as u64) as u32)
}

fn sample_of(v: &Value) -> String {
    let s = v.to_string();
    if s.len() > 80 {
        s[..80].to_string()
    } else {
        s
    }
}

/// Parse an RFC 3339 / ISO 8601 UTC timestamp string to Unix seconds.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    let s = if s.len() > 19 {
        let b = s.as_bytes()[19];
        if b == b'+' || b == b'-' { &s[..19] } else { s }
    } else {
        s
    };
    let (year, month, day, hour, minute, second): (i64, i64, i64, i64, i64, i64) =
        if s.len() == 10 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?, 0, 0, 0)
        } else if s.len() >= 19 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?,
             s[11..13].parse().ok()?, s[14..16].parse().ok()?, s[17..19].parse().ok()?)
        } else {
            return None;
        };

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let unix_days = jdn - 2_440_588;
    Some((unix_days * 86400 + hour * 3600 + minute * 60 + second) as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
