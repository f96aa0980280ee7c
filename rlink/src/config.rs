use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a link connection, usually read from the `[link]`
/// table of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// The largest number of words one block operation may transfer.
    pub block_size_max: usize,
    /// How long to wait for a reply frame.
    pub reply_timeout_ms: u64,
    /// How often the attention server checks for attention.
    pub attention_poll_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> LinkConfig {
        LinkConfig {
            block_size_max: 256,
            reply_timeout_ms: 1000,
            attention_poll_ms: 50,
        }
    }
}

impl LinkConfig {
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    #[must_use]
    pub fn attention_poll(&self) -> Duration {
        Duration::from_millis(self.attention_poll_ms)
    }
}
