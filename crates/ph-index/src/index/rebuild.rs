use std::fs;

use ph_core::model::EnvironmentId;
use ph_core::storage::RecordStore;

use super::store::VectorIndex;
use super::vector::EmbeddingVector;
use crate::embed::Embedder;
use crate::error::IndexError;

const REBUILD_BATCH: usize = 256;

/// Rebuild an environment's index from scratch by re-embedding its log.
pub fn rebuild_index(
    store: &RecordStore,
    embedder: &dyn Embedder,
    environment: &EnvironmentId,
) -> Result<(VectorIndex, usize), IndexError> {
    let data = store.data_dir();
    let path = data.vectors_path(environment);
    if path.exists() {
        fs::remove_file(&path)?;
    }

    let index = VectorIndex::create(data, environment)?;
    let mut batch = Vec::with_capacity(REBUILD_BATCH);
    let mut count = 0;
    for record in store.list(environment, None) {
        let record = record?;
        let values = embedder.embed(&record.command);
        batch.push(EmbeddingVector::for_record(&record, embedder.model_name(), values));
        if batch.len() == REBUILD_BATCH {
            count += index.commit(std::mem::take(&mut batch))?;
        }
    }
    count += index.commit(batch)?;

    tracing::info!(environment = %environment, "Indexed {count} commands");
    Ok((index, count))
}
