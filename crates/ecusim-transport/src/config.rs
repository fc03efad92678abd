//! Transport configuration

use serde::{Deserialize, Serialize};

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// SocketCAN raw + ISO-TP sockets (Linux only)
    SocketCan(SocketCanConfig),
    /// In-memory bus for testing
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::SocketCan(SocketCanConfig::default())
    }
}

/// SocketCAN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0", "vcan0")
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Request ID the simulated ECU listens on (tester -> ECU)
    #[serde(default = "default_rx_id")]
    pub rx_id: String,
    /// Response ID the simulated ECU answers from (ECU -> tester)
    #[serde(default = "default_tx_id")]
    pub tx_id: String,
    /// Use 29-bit diagnostic identifiers
    #[serde(default)]
    pub extended: bool,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_rx_id() -> String {
    "0x749".to_string()
}

fn default_tx_id() -> String {
    "0x759".to_string()
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            rx_id: default_rx_id(),
            tx_id: default_tx_id(),
            extended: false,
        }
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency per send in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Reported request ID
    #[serde(default = "default_mock_rx_id")]
    pub rx_id: u32,
    /// Reported response ID
    #[serde(default = "default_mock_tx_id")]
    pub tx_id: u32,
}

fn default_mock_rx_id() -> u32 {
    0x749
}

fn default_mock_tx_id() -> u32 {
    0x759
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            rx_id: default_mock_rx_id(),
            tx_id: default_mock_tx_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_transport_config() {
        let config: TransportConfig = toml::from_str(
            r#"
type = "socketcan"
interface = "can1"
rx_id = "0x7E1"
tx_id = "0x7E9"
"#,
        )
        .unwrap();

        match config {
            TransportConfig::SocketCan(cfg) => {
                assert_eq!(cfg.interface, "can1");
                assert_eq!(cfg.rx_id, "0x7E1");
                assert!(!cfg.extended);
            }
            other => panic!("Expected SocketCan, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"type":"mock"}"#).unwrap();
        match config {
            TransportConfig::Mock(cfg) => {
                assert_eq!(cfg.latency_ms, 0);
                assert_eq!(cfg.rx_id, 0x749);
                assert_eq!(cfg.tx_id, 0x759);
            }
            other => panic!("Expected Mock, got {:?}", other),
        }
    }
}
