//! File-backed persistence for the gateway's data directory.

pub mod storage;
pub mod token_file;

pub use storage::{JsonFileStorage, StorageError, StorageResult};
pub use token_file::SharedTokenFile;
