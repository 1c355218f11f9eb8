use adtlink_pump::PumpConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Multiplexer configuration.
///
/// Client receive rings are sized like the shared RX ring and client
/// scratch send buffers like the shared TX ring, so the pump settings are
/// all there is. They are flattened so a config file reads the same for
/// either layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    #[serde(flatten)]
    pub pump: PumpConfig,
}

impl MuxConfig {
    pub fn validate(&self) -> Result<()> {
        self.pump.validate()?;
        Ok(())
    }

    pub fn client_buffer_size(&self) -> usize {
        self.pump.rx_buffer_size
    }

    pub fn scratch_size(&self) -> usize {
        self.pump.tx_buffer_size
    }
}

impl From<PumpConfig> for MuxConfig {
    fn from(pump: PumpConfig) -> Self {
        Self { pump }
    }
}
