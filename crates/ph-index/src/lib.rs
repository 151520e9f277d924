pub mod ask;
pub mod embed;
pub mod error;
pub mod index;
pub mod search;
pub mod worker;

pub use ask::{Answer, AnswerComposer, AnswerSource, AskEngine, ExtractiveComposer};
pub use embed::{cosine_similarity, Embedder, HashingEmbedder};
pub use error::IndexError;
pub use index::{EmbeddingVector, IndexSnapshot, SearchHit, VectorIndex};
pub use search::SearchEngine;
pub use worker::IndexWorker;
