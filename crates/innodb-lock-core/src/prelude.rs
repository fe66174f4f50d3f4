//! Convenience prelude for lock engine types.

pub use crate::config::{IsolationLevel, LockConfig, LockConfigBuilder};
pub use crate::error::{LockError, LockErrorKind, LockResult};
pub use crate::null::NullEngine;
pub use crate::options::AcquireOptions;
pub use crate::traits::{LockEngine, LockEngineExt};
