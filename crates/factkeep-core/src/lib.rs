//! Core domain model for the fact archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "factkeep-core";

/// Keys owned by the archive; never copied from an upstream payload.
pub const RESERVED_KEYS: [&str; 3] = ["id", "text", "source"];

/// One accepted fact as persisted in the archive file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub id: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Upstream payload fields stored verbatim next to the fixed fields.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl FactRecord {
    pub fn new(id: u64, text: impl Into<String>, source: Option<String>) -> Self {
        Self {
            id,
            text: text.into(),
            source,
            extra: Map::new(),
        }
    }

    /// Copy every non-reserved field of `payload` into the record.
    pub fn with_passthrough(mut self, payload: &Map<String, JsonValue>) -> Self {
        for (key, value) in payload {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.extra.insert(key.clone(), value.clone());
            }
        }
        self
    }
}

/// A fact as returned by the upstream endpoint, before it is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFact {
    pub text: String,
    pub payload: Map<String, JsonValue>,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

/// Ordered collection of accepted facts, serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Archive {
    records: Vec<FactRecord>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<FactRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id the next appended record receives.
    pub fn next_id(&self) -> u64 {
        self.records.len() as u64 + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactRecord> {
        self.records.iter()
    }

    pub fn push(&mut self, record: FactRecord) {
        self.records.push(record);
    }
}
