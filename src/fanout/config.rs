use std::time::Duration;

use super::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the fanout, used in logs and errors.
    pub name: String,
    /// Maximum wait for a listener to accept an item before it is evicted.
    pub write_timeout: Duration,
    /// Capacity of each listener's data and error outputs.
    pub output_buffer_size: usize,
}

impl Config {
    pub(super) fn validate(&self) -> Result<()> {
        if self.write_timeout.is_zero() {
            return Err(Error::ZeroWriteTimeout);
        }
        if self.output_buffer_size == 0 {
            return Err(Error::ZeroOutputBufferSize);
        }
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }

        Ok(())
    }
}
