use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One analyst rating event. `(ticker, time)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub ticker: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub brokerage: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub rating_from: String,
    #[serde(default)]
    pub rating_to: String,
    #[serde(default, deserialize_with = "price_text")]
    pub target_from: Option<String>,
    #[serde(default, deserialize_with = "price_text")]
    pub target_to: Option<String>,
    pub time: String,
}

impl Rating {
    /// The conflict key as stored. The ticker is written trimmed.
    pub fn key(&self) -> (&str, &str) {
        (self.ticker.trim(), self.time.as_str())
    }

    /// Both key fields must be present for the row to be addressable.
    pub fn has_valid_key(&self) -> bool {
        !self.ticker.trim().is_empty() && !self.time.trim().is_empty()
    }

    pub fn target_from_value(&self) -> anyhow::Result<f64> {
        parse_price(self.target_from.as_deref().unwrap_or(""))
    }

    pub fn target_to_value(&self) -> anyhow::Result<f64> {
        parse_price(self.target_to.as_deref().unwrap_or(""))
    }
}

/// One page of the remote listing. An empty `next_page` ends pagination.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Rating>,
    pub next_page: String,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_page.is_empty()
    }
}

/// Parses a price label such as `"$1,135.50"`. Empty, `"null"` and `"N/A"` read as zero.
pub fn parse_price(price: &str) -> anyhow::Result<f64> {
    let t = price.trim();
    if t.is_empty() || t == "null" || t == "N/A" {
        return Ok(0.0);
    }
    let cleaned: String = t.chars().filter(|c| *c != '$' && *c != ',').collect();
    cleaned
        .trim()
        .parse::<f64>()
        .with_context(|| format!("invalid price {price:?}"))
}

/// Drops earlier occurrences of a repeated key, keeping the last one in its position.
///
/// One `INSERT ... ON CONFLICT DO UPDATE` statement cannot touch the same row twice.
pub fn dedup_by_key(ratings: &[Rating]) -> Vec<Rating> {
    let mut seen = HashSet::new();
    let mut out: Vec<Rating> = ratings
        .iter()
        .rev()
        .filter(|&r| seen.insert(r.key()))
        .cloned()
        .collect();
    out.reverse();
    out
}

// The listing sends targets as "$135.00", as bare numbers, or as null.
fn price_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected price string or number, got {other}"
        ))),
    }
}
