pub mod layout;
pub mod log;
pub mod pointer;

pub use layout::DataDir;
pub use log::{RecordIter, RecordStore};
pub use pointer::ActivePointer;
