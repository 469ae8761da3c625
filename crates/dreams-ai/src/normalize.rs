//! Mapping the model's key spellings onto canonical field names.
//!
//! Each record shape has one alias table. Keys are compared after
//! [`normalize_key`], so `Target Year`, `target_year` and `TargetYear` are the same
//! spelling.

use serde_json::{Map, Value};

/// `canonical field -> accepted spellings`, in priority order.
pub type AliasTable = &'static [(&'static str, &'static [&'static str])];

pub const DRAFT_FIELDS: AliasTable = &[
    ("title", &["title", "dreamtitle", "goaltitle", "name", "goal", "dream"]),
    ("category", &["category", "categoryname", "dreamcategory"]),
    (
        "suggested_target_year",
        &["suggestedtargetyear", "targetyear", "year", "suggestedyear", "target"],
    ),
];

pub const SMART_FIELDS: AliasTable = &[
    ("specific", &["specific"]),
    ("measurable", &["measurable"]),
    ("achievable", &["achievable", "attainable"]),
    ("relevant", &["relevant", "realistic"]),
    ("time_bound", &["timebound", "timely", "time"]),
    ("polished_title", &["polishedtitle", "title", "smarttitle"]),
];

pub const MILESTONE_FIELDS: AliasTable = &[
    ("title", &["title", "milestone", "name", "description"]),
    ("target_year", &["targetyear", "year"]),
    ("target_date", &["targetdate", "date", "deadline"]),
];

/// Lowercase and drop spaces, underscores and hyphens.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// The canonical field `key` maps to in `table`, if any.
pub fn canonical_field(table: AliasTable, key: &str) -> Option<&'static str> {
    let normalized = normalize_key(key);
    table
        .iter()
        .find(|(_, spellings)| spellings.contains(&normalized.as_str()))
        .map(|(canonical, _)| *canonical)
}

/// Rebuild `object` with canonical keys. Unknown keys are dropped.
///
/// When several spellings of one field are present, the one listed first in the
/// table wins, regardless of key order in `object`.
pub fn normalize_object(table: AliasTable, object: &Map<String, Value>) -> Map<String, Value> {
    let normalized: Vec<(String, &Value)> = object
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();

    let mut out = Map::new();
    for (canonical, spellings) in table {
        let found = spellings.iter().find_map(|spelling| {
            normalized
                .iter()
                .find(|(key, value)| key == spelling && !value.is_null())
                .map(|(_, value)| *value)
        });
        if let Some(value) = found {
            out.insert((*canonical).to_string(), value.clone());
        }
    }
    out
}

/// Find a top-level key by normalized spelling.
pub fn find_key<'a>(object: &'a Map<String, Value>, spelling: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(key, _)| normalize_key(key) == spelling)
        .map(|(_, value)| value)
}

/// A non-empty, trimmed textual rendering of a scalar.
pub fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// A year from an integer, a float with no fraction, or the first run of exactly
/// four digits in a string (`"2027"`, `"2027-06"`, `"by 2030"`).
pub fn value_as_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => {
            if let Some(year) = number.as_i64() {
                i32::try_from(year).ok()
            } else {
                number
                    .as_f64()
                    .filter(|year| year.fract() == 0.0 && year.abs() < f64::from(i32::MAX))
                    .map(|year| year as i32)
            }
        }
        Value::String(text) => leading_year(text),
        _ => None,
    }
}

fn leading_year(text: &str) -> Option<i32> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx].is_ascii_digit() {
            let start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            if idx - start == 4 {
                return text[start..idx].parse().ok();
            }
        } else {
            idx += 1;
        }
    }
    None
}
