//! Tunables for the reliable-UDP transport, named once here for cross-reference from every
//! module that consults them.

use serde_derive::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct IpcConfig {
    pub connect_jetons: u32,
    pub accept_jetons: u32,
    pub max_send_command_queue: usize,
    pub max_command_buffer_count: u32,
    pub reorder_heap_cap: usize,
    pub ack_piggyback_cap: usize,
    pub data_retransmit_limit: u32,
    pub connect_retransmit_limit: u32,
    #[serde(with = "duration_millis")]
    pub initial_rto: Duration,
    #[serde(with = "duration_millis")]
    pub max_rto: Duration,
    pub payload_mtu: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            connect_jetons: 1,
            accept_jetons: 3,
            max_send_command_queue: 16,
            max_command_buffer_count: 32,
            reorder_heap_cap: 4,
            ack_piggyback_cap: 8,
            data_retransmit_limit: 8,
            connect_retransmit_limit: 16,
            initial_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(3),
            payload_mtu: 1400,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
