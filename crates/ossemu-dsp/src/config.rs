use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session-wide knobs. Deserializes from a partial document, missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rate requested at open, before any control call.
    pub rate: u32,
    pub channels: u32,
    /// Legacy byte counters wrap below this many bytes.
    pub boundary_ceiling: u64,
    /// Pause between resume attempts of a suspended stream.
    pub resume_backoff_ms: u64,
    /// The mapped playback lead is capped at `rate / mmap_advance_divisor`.
    pub mmap_advance_divisor: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate: 8_000,
            channels: 1,
            boundary_ceiling: 0x7fff_ffff,
            resume_backoff_ms: 1_000,
            mmap_advance_divisor: 10,
        }
    }
}

impl SessionConfig {
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_boundary_ceiling(mut self, bytes: u64) -> Self {
        self.boundary_ceiling = bytes;
        self
    }

    pub fn with_resume_backoff(mut self, backoff: Duration) -> Self {
        self.resume_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_mmap_advance_divisor(mut self, divisor: u32) -> Self {
        self.mmap_advance_divisor = divisor;
        self
    }

    pub fn resume_backoff(&self) -> Duration {
        Duration::from_millis(self.resume_backoff_ms)
    }

    /// Upper bound of the mapped playback lead at `rate`, in frames.
    pub fn mmap_advance_cap(&self, rate: u32) -> u64 {
        u64::from(rate / self.mmap_advance_divisor.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.rate, 8_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.resume_backoff(), Duration::from_secs(1));
        assert_eq!(config.mmap_advance_cap(48_000), 4_800);
    }
}
