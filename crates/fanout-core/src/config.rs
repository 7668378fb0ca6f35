//! Fanout configuration

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default capacity of every subscriber queue, in frames
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Options applied when a [`Server`](crate::Server) is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Capacity of each subscriber's delivery queue. Counts frames, not bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl FanoutConfig {
    /// Set the per-subscriber queue capacity
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Check the configuration can back a running server
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size must be at least 1"));
        }
        Ok(())
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_buffer_size() {
        assert_eq!(FanoutConfig::default().buffer_size, 100);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = FanoutConfig::default().with_buffer_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_field_uses_default() {
        let config: FanoutConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, FanoutConfig::default());
    }
}
