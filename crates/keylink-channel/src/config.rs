use std::time::Duration;

/// Timeout for quick local commands.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for most commands.
pub const NORMAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for APDUs. The key allows a smartcard 30 seconds to answer.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(31);

/// Channel behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// How long BUSY answers are retried before being surfaced.
    pub busy_budget: Duration,
    /// Pause between BUSY retries.
    pub busy_retry_interval: Duration,
    /// INIT/SYNC attempts before [`Channel::sync`](crate::Channel::sync)
    /// gives up with TIMEOUT.
    pub sync_attempts: u32,
    /// Wait per INIT/SYNC attempt.
    pub sync_interval: Duration,
    /// Delay between closing a channel and detaching it from its device.
    pub close_grace: Duration,
    /// Re-enumerations when the first device vanishes before it is opened.
    pub open_retries: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            busy_budget: Duration::from_millis(2500),
            busy_retry_interval: Duration::from_millis(100),
            sync_attempts: 6,
            sync_interval: Duration::from_millis(500),
            close_grace: Duration::from_millis(300),
            open_retries: 3,
        }
    }
}

impl ChannelConfig {
    /// Default configuration with a busy budget given in seconds.
    pub fn with_busy_seconds(seconds: u64) -> Self {
        Self {
            busy_budget: Duration::from_secs(seconds),
            ..Self::default()
        }
    }
}
