use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ph_core::model::{CommandRecord, RecordId};

/// The vector for one record, stored as a line of `vectors.jsonl`.
///
/// Carries the record's sequence number and capture time so ranking never
/// has to go back to the command log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub record: RecordId,
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub model: String,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn for_record(record: &CommandRecord, model: &str, values: Vec<f32>) -> Self {
        Self {
            record: record.id.clone(),
            seq: record.seq,
            captured_at: record.captured_at,
            model: model.to_string(),
            values,
        }
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: RecordId,
    pub score: f32,
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
}
