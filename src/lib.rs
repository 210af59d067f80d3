pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod formats;
pub mod location;
pub mod reader;
pub mod storage;
pub mod streaming;
pub mod table;
pub mod validation;

// Re-export key traits and types
pub use engine::Engine;
pub use error::{Result, TabError};
pub use formats::DataFormat;
pub use reader::{TableReader, open_reader};
pub use storage::{BackendResolver, StorageBackend};
