//! Core traits and types for innodb-lock engines.

pub mod config;
pub mod error;
pub mod null;
pub mod options;
pub mod prelude;
pub mod process;
pub mod traits;

pub use error::{LockError, LockErrorKind, LockResult};
pub use prelude::*;
