//! Forgiving decoders for store rows.
//!
//! Rows were written by several generations of forms and importers, so
//! numbers show up as strings, lists as null, and enums as free text.
//! None of that should fail a whole page of results.

use super::WireCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(number(&Value::deserialize(deserializer)?))
}

pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = number(&Value::deserialize(deserializer)?);
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

pub fn strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    })
}

pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
        _ => false,
    })
}

/// Number or numeric string; anything else is zero
pub(crate) fn number(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or_else(|| positive(n.as_f64())),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .unwrap_or_else(|_| positive(s.replace(',', ".").parse::<f64>().ok()))
        }
        _ => 0,
    }
}

fn positive(value: Option<f64>) -> u64 {
    match value {
        Some(f) if f.is_finite() && f > 0.0 => f as u64,
        _ => 0,
    }
}

/// `#[serde(with)]` adapter for optional [`WireCode`] enums
pub mod code {
    use super::WireCode;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: WireCode,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(v.code()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: WireCode,
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => T::from_code(&s),
            _ => None,
        })
    }
}
