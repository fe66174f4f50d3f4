//! File system backend for innodb-lock.
//!
//! [`FileSystemEngine`] holds one exclusive advisory OS lock per lock name.
//! Use it standalone to keep a single instance of a job per machine, or as
//! the inner layer of a database engine.

pub mod engine;
pub mod holder;
pub mod name;

pub use engine::{FileSystemEngine, FileSystemEngineBuilder, DEFAULT_RETENTION};
pub use holder::HolderInfo;
