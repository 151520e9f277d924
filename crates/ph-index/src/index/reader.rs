use std::cmp::Ordering;
use std::collections::HashMap;

use ph_core::model::RecordId;

use super::vector::{EmbeddingVector, SearchHit};
use crate::embed::cosine_similarity;

/// An immutable view of an environment's index.
///
/// Readers hold an `Arc` to a snapshot while writers publish a new one, so
/// a search never sees a half-applied batch.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    entries: Vec<EmbeddingVector>,
    positions: HashMap<RecordId, usize>,
}

impl IndexSnapshot {
    pub fn new(entries: Vec<EmbeddingVector>) -> Self {
        let mut snapshot = Self::default();
        snapshot.extend(entries);
        snapshot
    }

    pub(crate) fn extend(&mut self, entries: impl IntoIterator<Item = EmbeddingVector>) {
        for entry in entries {
            if self.positions.contains_key(&entry.record) {
                continue;
            }
            self.positions
                .insert(entry.record.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, record: &RecordId) -> bool {
        self.positions.contains_key(record)
    }

    pub fn get(&self, record: &RecordId) -> Option<&EmbeddingVector> {
        self.positions.get(record).map(|&i| &self.entries[i])
    }

    /// Dimensionality of the stored vectors, if any are stored.
    pub fn dims(&self) -> Option<usize> {
        self.entries.first().map(|e| e.dims())
    }

    pub fn entries(&self) -> &[EmbeddingVector] {
        &self.entries
    }

    /// Top `k` entries by cosine similarity to `query`.
    ///
    /// Ordered by score descending; equal scores put the more recently
    /// captured record first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|e| SearchHit {
                record: e.record.clone(),
                score: cosine_similarity(query, &e.values),
                seq: e.seq,
                captured_at: e.captured_at,
            })
            .collect();
        hits.sort_by(rank);
        hits.truncate(k);
        hits
    }
}

fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.captured_at.cmp(&a.captured_at))
        .then_with(|| b.seq.cmp(&a.seq))
}

/// Parse the complete lines of a vector file.
///
/// Returns the entries and the byte length of the newline-terminated
/// prefix; anything after it is a torn write and is ignored.
pub fn parse_vectors(contents: &str) -> (Vec<EmbeddingVector>, usize) {
    let complete_len = contents.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut entries = Vec::new();
    for line in contents[..complete_len].lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EmbeddingVector>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("skipping unreadable vector: {e}"),
        }
    }
    (entries, complete_len)
}
