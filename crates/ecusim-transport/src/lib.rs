//! ecusim-transport - Bus transport layer for the ECU bench simulator
//!
//! The simulator core never deals with channel selection, bitrate or
//! segmentation. It is handed an already-configured [`BusTransport`] that
//! can put individual frames on the bus and exchange already-reassembled
//! diagnostic payloads.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Arc<dyn BusTransport>               │
//! │                                                      │
//! │   send_frame ──────► raw CAN socket (NM frames)      │
//! │   send_payload ────► ISO-TP socket  (UDS responses)  │
//! │   receive_payload ◄─ ISO-TP socket  (UDS requests)   │
//! │                                                      │
//! │   SocketCanBus (Linux)        MockBus (tests)        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every adapter serializes its send path, so frames coming from several
//! independent schedule tasks never interleave mid-transmission.

mod adapter;
pub mod config;
pub mod error;
pub mod frame;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::{AddressInfo, BusTransport};
pub use config::{MockConfig, SocketCanConfig, TransportConfig};
pub use error::TransportError;
pub use frame::{Frame, FrameError, FrameFormat, CLASSIC_MAX_DATA, FD_MAX_DATA};
pub use mock::{MockBus, SentFrame};

use std::sync::Arc;

/// Create a transport adapter based on configuration
pub async fn create_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn BusTransport>, TransportError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        TransportConfig::SocketCan(cfg) => {
            let adapter = socketcan::SocketCanBus::new(cfg)?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        TransportConfig::SocketCan(_) => Err(TransportError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => {
            let adapter = MockBus::new(cfg);
            Ok(Arc::new(adapter))
        }
    }
}

/// Parse a CAN ID from string (supports hex with 0x prefix, decimal otherwise)
pub fn parse_can_id(s: &str) -> Result<u32, TransportError> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };

    u32::from_str_radix(digits, radix)
        .map_err(|e| TransportError::InvalidConfig(format!("Invalid CAN ID '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x7E1").unwrap(), 0x7E1);
        assert_eq!(parse_can_id(" 0X18DA00F1 ").unwrap(), 0x18DA00F1);
        assert_eq!(parse_can_id("2017").unwrap(), 2017);
        assert!(parse_can_id("0xZZ").is_err());
        assert!(parse_can_id("").is_err());
    }

    #[tokio::test]
    async fn test_create_mock_transport() {
        let transport = create_transport(&TransportConfig::Mock(MockConfig::default()))
            .await
            .unwrap();
        let info = transport.address_info();
        assert_eq!(info.rx_id, MockConfig::default().rx_id);
    }
}
