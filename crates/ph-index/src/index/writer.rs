use std::fs::File;
use std::io::{Seek, SeekFrom, Write as _};

use super::vector::EmbeddingVector;
use crate::error::IndexError;

/// Append `vectors` at `offset`, cutting off anything beyond it first.
///
/// The whole batch goes out in one write followed by an fsync; every
/// record's line is either complete on disk or absent.
pub fn append_vectors(
    file: &mut File,
    offset: u64,
    vectors: &[EmbeddingVector],
) -> Result<(), IndexError> {
    if file.metadata()?.len() != offset {
        tracing::warn!("truncating incomplete vector write");
        file.set_len(offset)?;
    }
    if vectors.is_empty() {
        return Ok(());
    }

    let mut buf = Vec::new();
    for vector in vectors {
        serde_json::to_writer(&mut buf, vector)?;
        buf.push(b'\n');
    }
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&buf)?;
    file.sync_data()?;
    Ok(())
}
