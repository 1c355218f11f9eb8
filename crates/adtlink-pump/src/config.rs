use std::time::Duration;

use adtlink_frame::{HEADER_SIZE, MAX_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::{AdtError, Result};

/// Tunables for one ADT instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// RX ring capacity in bytes. Multiplexer clients get rings of this size.
    pub rx_buffer_size: usize,
    /// TX ring capacity in bytes.
    pub tx_buffer_size: usize,
    /// Extra attempts after a transient transport failure.
    pub tx_retry_limit: u32,
    /// Sleep between TX retry attempts, in milliseconds.
    pub tx_retry_delay_ms: u64,
    /// Minimum spacing of RX-missed and TX-drop warnings, in milliseconds.
    pub missed_log_interval_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            rx_buffer_size: 4095,
            tx_buffer_size: 4095,
            tx_retry_limit: 3,
            tx_retry_delay_ms: 2,
            missed_log_interval_ms: 1000,
        }
    }
}

impl PumpConfig {
    /// Reject sizes the ring buffer cannot be built with.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("rx_buffer_size", self.rx_buffer_size),
            ("tx_buffer_size", self.tx_buffer_size),
        ] {
            if size == 0 || size > MAX_CAPACITY {
                return Err(AdtError::InvalidConfig(format!(
                    "{name} must be 1..={MAX_CAPACITY}, got {size}"
                )));
            }
        }
        Ok(())
    }

    /// Reject ring sizes whose wrap point is not on a transport alignment
    /// boundary.
    ///
    /// A ring of `size` bytes has `size + 1` slots, so `size + 1` must be a
    /// multiple of `alignment`. Together with aligned payloads this keeps
    /// every record and every wrap pad at an aligned offset.
    pub fn check_alignment(&self, alignment: usize) -> Result<()> {
        if alignment == 0 || HEADER_SIZE % alignment != 0 {
            return Err(AdtError::InvalidConfig(format!(
                "transport alignment {alignment} must divide the {HEADER_SIZE}-byte header"
            )));
        }
        for (name, size) in [
            ("rx_buffer_size", self.rx_buffer_size),
            ("tx_buffer_size", self.tx_buffer_size),
        ] {
            if (size + 1) % alignment != 0 {
                return Err(AdtError::InvalidConfig(format!(
                    "{name} + 1 must be a multiple of {alignment}, got {size}"
                )));
            }
        }
        Ok(())
    }

    pub fn tx_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tx_retry_delay_ms)
    }

    pub fn missed_log_interval(&self) -> Duration {
        Duration::from_millis(self.missed_log_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PumpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tx_retry_delay(), Duration::from_millis(2));
    }

    #[test]
    fn ring_slots_must_be_whole_alignment_units() {
        assert!(PumpConfig::default().check_alignment(4).is_ok());

        let config = PumpConfig {
            rx_buffer_size: 16,
            ..PumpConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.check_alignment(4),
            Err(AdtError::InvalidConfig(_))
        ));
        assert!(config.check_alignment(1).is_ok());

        let config = PumpConfig {
            rx_buffer_size: 15,
            tx_buffer_size: 19,
            ..PumpConfig::default()
        };
        assert!(config.check_alignment(4).is_ok());
    }

    #[test]
    fn alignment_must_divide_the_header() {
        let config = PumpConfig::default();
        for alignment in [0, 3, 8] {
            assert!(matches!(
                config.check_alignment(alignment),
                Err(AdtError::InvalidConfig(_))
            ));
        }
        assert!(config.check_alignment(2).is_ok());
    }

    #[test]
    fn rejects_out_of_range_sizes() {
        let config = PumpConfig {
            rx_buffer_size: 0,
            ..PumpConfig::default()
        };
        assert!(matches!(config.validate(), Err(AdtError::InvalidConfig(_))));

        let config = PumpConfig {
            tx_buffer_size: MAX_CAPACITY + 1,
            ..PumpConfig::default()
        };
        assert!(matches!(config.validate(), Err(AdtError::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PumpConfig =
            serde_json::from_str(r#"{"rx_buffer_size": 1023, "tx_retry_limit": 5}"#).unwrap();
        assert_eq!(config.rx_buffer_size, 1023);
        assert_eq!(config.tx_retry_limit, 5);
        assert_eq!(config.tx_buffer_size, PumpConfig::default().tx_buffer_size);
    }
}
