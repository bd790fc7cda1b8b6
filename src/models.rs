//! Core data models shared by the search, analytics, and orchestration layers.
//!
//! Coveo owns these shapes, so the client never re-types them. Each model
//! wraps the JSON exactly as the server sent it and exposes the handful of
//! fields the client reads through accessors. A field that is missing, null,
//! or of an unexpected type reads as `None`, and the original value is
//! serialized back unchanged.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// A single search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchResult(Value);

impl SearchResult {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    pub fn uri(&self) -> Option<&str> {
        self.0.get("uri").and_then(Value::as_str)
    }

    /// String field from the `raw` metadata bag (`urihash`, `source`,
    /// `permanentid`, `filetype`, `objecttype`, `ytvideoid`, ...).
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.0.get("raw")?.get(key)?.as_str()
    }
}

impl From<Value> for SearchResult {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Successful response from `POST /rest/search/v2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchResponse(Value);

impl SearchResponse {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn total_count(&self) -> Option<u64> {
        self.0.get("totalCount").and_then(as_count)
    }

    /// Server-side duration in milliseconds.
    pub fn duration(&self) -> Option<u64> {
        self.0.get("duration").and_then(as_count)
    }

    pub fn search_uid(&self) -> Option<&str> {
        self.0.get("searchUid").and_then(Value::as_str)
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.0.get("pipeline").and_then(Value::as_str)
    }

    pub fn visitor_id(&self) -> Option<&str> {
        self.0.get("visitorId").and_then(Value::as_str)
    }

    /// The `results` array; empty when absent or not an array.
    pub fn results(&self) -> Vec<SearchResult> {
        match self.0.get("results") {
            Some(Value::Array(items)) => items.iter().cloned().map(SearchResult).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for SearchResponse {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// A result prepared for display, tagged with its zero-based position.
///
/// Serializes as the result object with a `rank` key added.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub rank: usize,
    pub result: SearchResult,
}

impl Serialize for RankedResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = match self.result.as_value() {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".into(), other.clone());
                map
            }
        };
        map.insert("rank".into(), Value::from(self.rank));
        map.serialize(serializer)
    }
}
