//! Deterministic repairs for metadata values.
//!
//! Each rule returns `Some(fixed)` only when it changes the value, so callers
//! can tell "already fine" from "repairable".

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

const SPECIES_BINOMIALS: &[(&str, &str)] = &[
    ("mouse", "Mus musculus"),
    ("mice", "Mus musculus"),
    ("house mouse", "Mus musculus"),
    ("rat", "Rattus norvegicus"),
    ("norway rat", "Rattus norvegicus"),
    ("human", "Homo sapiens"),
    ("macaque", "Macaca mulatta"),
    ("rhesus macaque", "Macaca mulatta"),
    ("rhesus monkey", "Macaca mulatta"),
    ("marmoset", "Callithrix jacchus"),
    ("zebrafish", "Danio rerio"),
    ("zebra finch", "Taeniopygia guttata"),
    ("fruit fly", "Drosophila melanogaster"),
    ("drosophila", "Drosophila melanogaster"),
    ("worm", "Caenorhabditis elegans"),
    ("c. elegans", "Caenorhabditis elegans"),
    ("ferret", "Mustela putorius furo"),
    ("cat", "Felis catus"),
];

const LENIENT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const LENIENT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

pub fn normalize_species(raw: &str) -> Option<String> {
    let key = raw.trim().to_ascii_lowercase();
    SPECIES_BINOMIALS
        .iter()
        .find(|(common, _)| *common == key)
        .map(|(_, binomial)| binomial.to_string())
        .filter(|binomial| binomial != raw)
}

pub fn normalize_sex(raw: &str) -> Option<String> {
    let fixed = match raw.trim().to_ascii_lowercase().as_str() {
        "m" | "male" => "M",
        "f" | "female" => "F",
        "u" | "unknown" | "unspecified" | "n/a" => "U",
        "o" | "other" => "O",
        _ => return None,
    };
    (fixed != raw).then(|| fixed.to_string())
}

/// `90 days`, `90d`, `P90` become `P90D`; weeks, months and years map likewise.
pub fn normalize_age(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let body = lowered.strip_prefix('p').unwrap_or(&lowered).trim();
    let digits_end = body
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(body.len());
    if digits_end == 0 {
        return None;
    }
    let (number, unit) = body.split_at(digits_end);
    let designator = match unit.trim() {
        "" | "d" | "day" | "days" => 'D',
        "w" | "wk" | "week" | "weeks" => 'W',
        "m" | "mo" | "month" | "months" => 'M',
        "y" | "yr" | "year" | "years" => 'Y',
        _ => return None,
    };
    let fixed = format!("P{number}{designator}");
    (fixed != trimmed).then_some(fixed)
}

pub fn is_strict_timestamp(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw.trim()).is_ok()
}

/// Parses common timestamp spellings. Values without an offset are taken as UTC.
pub fn parse_timestamp_lenient(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%z") {
        return Some(parsed);
    }
    for format in LENIENT_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    for format in LENIENT_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    None
}

/// RFC 3339 rendering of a lenient timestamp, when it differs from the input.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    if is_strict_timestamp(raw) {
        return None;
    }
    parse_timestamp_lenient(raw).map(|parsed| parsed.to_rfc3339())
}

fn split_list(raw: &str) -> Option<Value> {
    let items: Vec<Value> = raw
        .split([',', ';'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| Value::String(item.to_string()))
        .collect();
    (!items.is_empty()).then_some(Value::Array(items))
}

/// Repairs `value` for `field`, or returns `None` when no deterministic rule applies.
pub fn auto_fix(field: &str, value: &Value) -> Option<Value> {
    match (field, value) {
        ("species", Value::String(raw)) => normalize_species(raw).map(Value::String),
        ("sex", Value::String(raw)) => normalize_sex(raw).map(Value::String),
        ("age", Value::String(raw)) => normalize_age(raw).map(Value::String),
        ("age", Value::Number(days)) => days.as_u64().map(|d| Value::String(format!("P{d}D"))),
        ("session_start_time" | "date_of_birth", Value::String(raw)) => {
            normalize_timestamp(raw).map(Value::String)
        }
        ("keywords" | "related_publications", Value::String(raw)) => split_list(raw),
        ("experimenter", Value::String(raw)) if !raw.trim().is_empty() => {
            Some(Value::Array(vec![Value::String(raw.trim().to_string())]))
        }
        _ => None,
    }
}

/// Value substituted for a missing field when nothing better is known.
pub fn default_value(field: &str) -> Option<Value> {
    match field {
        "sex" => Some(Value::String("U".to_string())),
        _ => None,
    }
}
