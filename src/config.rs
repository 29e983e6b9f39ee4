use std::time::Duration;

use serde::{Deserialize, Serialize};
use zapx_receiver::ReceiverConfig;
use zapx_sender::SenderConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Bounded wait for a dialled channel to open.
    pub connect_timeout_ms: u64,
    /// Pause before retrying identity registration after a collision.
    pub id_retry_delay_ms: u64,
    /// Outgoing messages buffered per channel before `send` waits.
    pub channel_capacity: usize,
    /// How often each channel drops stale incoming files.
    pub sweep_interval_ms: u64,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            id_retry_delay_ms: 250,
            channel_capacity: 64,
            sweep_interval_ms: 30_000,
            sender: SenderConfig::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn balanced() -> Self {
        Self::default()
    }

    pub fn low_bandwidth() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            channel_capacity: 16,
            sender: SenderConfig {
                chunk_size: 16 * 1024,
            },
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn id_retry_delay(&self) -> Duration {
        Duration::from_millis(self.id_retry_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
