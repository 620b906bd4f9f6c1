use std::fs::File;

use super::{LockMode, LockRange, Locker};
use crate::config::LockStrategy;
use crate::error::Result;

/// Takes no locks. Safe only while the application admits a single writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocker;

impl Locker for NoLocker {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::None
    }

    fn lock(&mut self, _file: &File, _range: LockRange, _mode: LockMode) -> Result<()> {
        Ok(())
    }

    fn unlock(&mut self, _file: &File, _range: LockRange) -> Result<()> {
        Ok(())
    }
}
