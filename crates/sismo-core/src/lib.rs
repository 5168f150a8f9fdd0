//! Core domain model for the IGP seismic snapshot sync.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "sismo-core";

pub const FIELD_REPORT_CODE: &str = "report_code";
pub const FIELD_REFERENCE: &str = "reference";
pub const FIELD_LOCAL_DATETIME: &str = "local_datetime";
pub const FIELD_MAGNITUDE: &str = "magnitude";
pub const FIELD_DEPTH: &str = "depth";
pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";
pub const FIELD_SEQUENCE_NUMBER: &str = "sequence_number";
pub const FIELD_RECORD_ID: &str = "record_id";

/// Free-form textual field mapping carried by every row, kept in source column order.
pub type RowFields = IndexMap<String, String>;

/// Which upstream representation a sync run ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStrategy {
    #[default]
    #[serde(alias = "json")]
    Api,
    #[serde(alias = "table")]
    Html,
}

impl IngestionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for IngestionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" | "json" => Ok(Self::Api),
            "html" | "table" => Ok(Self::Html),
            other => Err(format!("unknown ingestion strategy `{other}` (expected api|html)")),
        }
    }
}

/// One earthquake report as published by the structured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuakeReport {
    pub report_code: String,
    pub reference: String,
    pub local_datetime: String,
    pub magnitude: String,
    pub depth: String,
    pub latitude: String,
    pub longitude: String,
}

impl QuakeReport {
    pub fn into_fields(self) -> RowFields {
        RowFields::from([
            (FIELD_REPORT_CODE.to_string(), self.report_code),
            (FIELD_REFERENCE.to_string(), self.reference),
            (FIELD_LOCAL_DATETIME.to_string(), self.local_datetime),
            (FIELD_MAGNITUDE.to_string(), self.magnitude),
            (FIELD_DEPTH.to_string(), self.depth),
            (FIELD_LATITUDE.to_string(), self.latitude),
            (FIELD_LONGITUDE.to_string(), self.longitude),
        ])
    }
}

/// Extracted row, before the replace step assigns identity and position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub fields: RowFields,
}

impl NormalizedRow {
    pub fn new(fields: RowFields) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl From<QuakeReport> for NormalizedRow {
    fn from(report: QuakeReport) -> Self {
        Self::new(report.into_fields())
    }
}

/// Persisted row: a normalized row plus its store key and batch position.
///
/// Serializes as one flat object so a stored item reads
/// `{"record_id": .., "sequence_number": .., "report_code": .., ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub record_id: String,
    pub sequence_number: String,
    #[serde(flatten)]
    pub fields: RowFields,
}

impl SnapshotRow {
    /// Attach a fresh v4 identifier and the 1-based `position` to `row`.
    ///
    /// Source fields that collide with the two attached keys are overwritten.
    pub fn assign(row: NormalizedRow, position: usize) -> Self {
        let mut fields = row.fields;
        fields.shift_remove(FIELD_RECORD_ID);
        fields.shift_remove(FIELD_SEQUENCE_NUMBER);
        Self {
            record_id: Uuid::new_v4().to_string(),
            sequence_number: position.to_string(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            FIELD_RECORD_ID => Some(self.record_id.as_str()),
            FIELD_SEQUENCE_NUMBER => Some(self.sequence_number.as_str()),
            _ => self.fields.get(key).map(String::as_str),
        }
    }

    pub fn position(&self) -> Option<u64> {
        self.sequence_number.trim().parse().ok()
    }
}

/// Order scanned rows by numeric sequence number; unparsable numbers sort last.
pub fn sort_by_sequence(rows: &mut [SnapshotRow]) {
    rows.sort_by(|a, b| match (a.position(), b.position()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.record_id.cmp(&b.record_id),
    });
}

/// Result handed back to the invoker: a status code plus a JSON-encoded body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResult {
    pub fn json(status_code: u16, body: &JsonValue) -> Self {
        Self {
            status_code,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Decode `body` back into JSON; bodies built by [`InvocationResult::json`] always decode.
    pub fn body_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::from_str(&self.body)
    }
}
