pub mod reader;
pub mod rebuild;
pub mod store;
pub mod vector;
pub mod writer;

pub use reader::IndexSnapshot;
pub use rebuild::rebuild_index;
pub use store::VectorIndex;
pub use vector::{EmbeddingVector, SearchHit};
