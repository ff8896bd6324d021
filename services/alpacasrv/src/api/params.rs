//! Request parameter bag and parsing policy
//!
//! Alpaca parameter names are case-insensitive, numeric values may arrive
//! with a comma as decimal separator, and booleans are `true`/`false` in any
//! case. All numeric and boolean parsing in the service goes through here.

use url::form_urlencoded;

use crate::error::{AlpacaError, Result};

/// Ordered parameter bag from a query string and/or form body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pairs: Vec<(String, String)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a raw (still percent-encoded) query string
    pub fn from_query(query: Option<&str>) -> Self {
        query
            .map(|q| Self::from_urlencoded(q.as_bytes()))
            .unwrap_or_default()
    }

    /// Parse an `application/x-www-form-urlencoded` body
    pub fn from_urlencoded(body: &[u8]) -> Self {
        Self {
            pairs: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    /// Append `other` after this bag; earlier entries win on lookup
    pub fn merged_with(mut self, other: Parameters) -> Self {
        self.pairs.extend(other.pairs);
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Case-insensitive lookup, first occurrence wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| AlpacaError::invalid_value(format!("Missing parameter {name}")))
    }

    pub fn require_f64(&self, name: &str) -> Result<f64> {
        parse_float(name, self.require(name)?)
    }

    pub fn require_bool(&self, name: &str) -> Result<bool> {
        parse_bool(name, self.require(name)?)
    }

    pub fn require_i64(&self, name: &str) -> Result<i64> {
        parse_int(name, self.require(name)?)
    }
}

/// Parse a float, accepting `,` as decimal separator
pub fn parse_float(name: &str, raw: &str) -> Result<f64> {
    let normalized = raw.trim().replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(AlpacaError::invalid_value(format!(
            "{name} value '{raw}' is not a valid number"
        ))),
    }
}

pub fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    let raw_trimmed = raw.trim();
    if raw_trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw_trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(AlpacaError::invalid_value(format!(
            "{name} value '{raw}' is not a valid boolean"
        )))
    }
}

pub fn parse_int(name: &str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        AlpacaError::invalid_value(format!("{name} value '{raw}' is not a valid integer"))
    })
}
