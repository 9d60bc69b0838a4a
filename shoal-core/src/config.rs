//! Centralized configuration for the piece pickers.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the picker layers.

/// Central configuration for every picker layer.
///
/// Groups related settings into per-strategy sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct PickerConfig {
    pub standard: StandardConfig,
    pub streaming: StreamingConfig,
    pub randomised: RandomisedConfig,
}

/// Settings of the base request-accounting strategy.
#[derive(Debug, Clone)]
pub struct StandardConfig {
    /// Engine-wide fast extension support. When disabled, choking peers are
    /// never asked for allowed-fast pieces and suggestions are ignored.
    pub fast_peer_enabled: bool,
}

impl Default for StandardConfig {
    fn default() -> Self {
        Self {
            fast_peer_enabled: true,
        }
    }
}

/// Playback window sizes for streaming.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Pieces in the high-priority window starting at the playback position.
    /// The low-priority window spans twice as many pieces.
    pub high_priority_count: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            high_priority_count: 15,
        }
    }
}

impl StreamingConfig {
    /// Length of the low-priority window following the playback position.
    pub fn low_priority_count(&self) -> u32 {
        self.high_priority_count.saturating_mul(2)
    }
}

/// Random ordering among equally rare pieces.
#[derive(Debug, Clone, Default)]
pub struct RandomisedConfig {
    /// Fixed seed for reproducible ordering (None = seeded from the OS)
    pub seed: Option<u64>,
}

impl PickerConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(enabled) = std::env::var("SHOAL_FAST_PEER") {
            if let Ok(enabled) = enabled.parse::<bool>() {
                config.standard.fast_peer_enabled = enabled;
            }
        }

        if let Ok(count) = std::env::var("SHOAL_HIGH_PRIORITY_COUNT") {
            if let Ok(count) = count.parse::<u32>() {
                config.streaming.high_priority_count = count;
            }
        }

        if let Ok(seed) = std::env::var("SHOAL_RANDOM_SEED") {
            if let Ok(seed) = seed.parse::<u64>() {
                config.randomised.seed = Some(seed);
            }
        }

        config
    }

    /// Creates a configuration with fixed randomness for tests.
    pub fn deterministic(seed: u64) -> Self {
        Self {
            randomised: RandomisedConfig { seed: Some(seed) },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = PickerConfig::default();
        assert_eq!(config.streaming.high_priority_count, 15);
        assert_eq!(config.streaming.low_priority_count(), 30);
        assert!(config.standard.fast_peer_enabled);
        assert_eq!(config.randomised.seed, None);
    }

    #[test]
    fn test_deterministic_sets_seed_only() {
        let config = PickerConfig::deterministic(7);
        assert_eq!(config.randomised.seed, Some(7));
        assert_eq!(config.streaming.high_priority_count, 15);
    }
}
