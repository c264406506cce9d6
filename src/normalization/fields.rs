//! Tolerant coercions for raw spreadsheet cells.
//!
//! Every helper takes the already-trimmed cell (or `None` when the column is
//! absent or blank) and either returns a typed value or a [`FieldError`] that
//! names the offending column.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Values read as boolean `true`; comparison is case-insensitive.
pub const TRUTHY: [&str; 4] = ["true", "1", "yes", "có"];

/// Upper bound used for free-text name-like columns.
pub const NAME_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn parse_bool(raw: Option<&str>) -> bool {
    match raw {
        Some(v) => {
            let v = v.trim().to_lowercase();
            TRUTHY.contains(&v.as_str())
        }
        None => false,
    }
}

/// Keeps only ASCII digits: `"35.000đ"` → `35000`. Blank or digit-free input
/// (and values that overflow `i64`) yield `None`.
pub fn parse_price(raw: Option<&str>) -> Option<i64> {
    let digits: String = raw?.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok()
}

pub fn required_text(raw: Option<&str>, field: &str, max_len: usize) -> Result<String, FieldError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > max_len => Err(FieldError::new(
            field,
            format!("must not exceed {max_len} characters"),
        )),
        Some(v) => Ok(v.to_string()),
        None => Err(FieldError::new(field, "is required")),
    }
}

pub fn optional_text(
    raw: Option<&str>,
    field: &str,
    max_len: usize,
) -> Result<Option<String>, FieldError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(_) => required_text(raw, field, max_len).map(Some),
        None => Ok(None),
    }
}

fn parse_decimal(raw: &str) -> Option<f64> {
    let v = raw.trim();
    // Spreadsheets exported with a comma decimal separator ("21,0285").
    let v = if v.contains(',') && !v.contains('.') {
        v.replace(',', ".")
    } else {
        v.to_string()
    };
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn required_f64_in(
    raw: Option<&str>,
    field: &str,
    min: f64,
    max: f64,
) -> Result<f64, FieldError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FieldError::new(field, "is required"))?;
    let n = parse_decimal(raw).ok_or_else(|| FieldError::new(field, "must be a number"))?;
    if n < min || n > max {
        return Err(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(n)
}

pub fn optional_f64_in(
    raw: Option<&str>,
    field: &str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, FieldError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(_) => required_f64_in(raw, field, min, max).map(Some),
        None => Ok(None),
    }
}

/// Integer within `[min, max]`, falling back to `default` when the cell is blank.
pub fn int_in_or(
    raw: Option<&str>,
    field: &str,
    min: i64,
    max: i64,
    default: i64,
) -> Result<i64, FieldError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let n = parse_decimal(raw)
        .filter(|n| n.fract() == 0.0)
        .map(|n| n as i64)
        .ok_or_else(|| FieldError::new(field, "must be a whole number"))?;
    if n < min || n > max {
        return Err(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(n)
}

/// Case-insensitive membership check; anything outside `allowed` becomes `default`.
pub fn enum_or_default(raw: Option<&str>, allowed: &[&'static str], default: &'static str) -> &'static str {
    let Some(v) = raw.map(|v| v.trim().to_lowercase()) else {
        return default;
    };
    allowed
        .iter()
        .copied()
        .find(|candidate| *candidate == v)
        .unwrap_or(default)
}

/// JSON cell parsed leniently: arrays and objects are kept, anything else
/// (absent, malformed, scalar) becomes an empty array.
pub fn lenient_json(raw: Option<&str>) -> Value {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => match serde_json::from_str::<Value>(v) {
            Ok(parsed @ (Value::Array(_) | Value::Object(_))) => parsed,
            _ => Value::Array(Vec::new()),
        },
        None => Value::Array(Vec::new()),
    }
}

/// A list cell: a JSON array of strings, or items separated by commas,
/// newlines or pipes. Blank items are dropped. A comma inside a URL
/// (`.../w_300,h_200/a.jpg`) does not split it: a fragment that follows a URL
/// without a space and carries no scheme of its own is glued back on.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Vec::new();
    };
    if raw.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
            return items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    raw.split(['\n', '|']).flat_map(split_commas).collect()
}

fn split_commas(piece: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for frag in piece.split(',') {
        if frag.trim().is_empty() {
            continue;
        }
        match items.last_mut() {
            Some(prev)
                if prev.contains("://")
                    && !frag.contains("://")
                    && !frag.starts_with(char::is_whitespace) =>
            {
                prev.push(',');
                prev.push_str(frag.trim_end());
            }
            _ => items.push(frag.trim().to_string()),
        }
    }
    items
}
