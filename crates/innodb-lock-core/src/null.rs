//! Engine that performs no locking.

use crate::error::LockResult;
use crate::options::AcquireOptions;
use crate::traits::LockEngine;

/// An engine that grants every request without locking anything.
///
/// Used as the default inner layer of the database engines, or to turn
/// locking off entirely. It keeps no bookkeeping, so acquiring the same
/// name twice succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

impl NullEngine {
    pub fn new() -> Self {
        Self
    }
}

impl LockEngine for NullEngine {
    async fn acquire(&mut self, _name: &str, _options: AcquireOptions) -> LockResult<()> {
        Ok(())
    }

    async fn release(&mut self, _name: &str) -> LockResult<()> {
        Ok(())
    }

    async fn release_all(&mut self) -> LockResult<()> {
        Ok(())
    }

    async fn unused_locks_remove(&mut self) -> LockResult<()> {
        Ok(())
    }

    fn is_held(&self, _name: &str) -> bool {
        false
    }

    fn held_locks(&self) -> Vec<String> {
        Vec::new()
    }
}
