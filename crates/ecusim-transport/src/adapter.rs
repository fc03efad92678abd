//! Transport adapter trait and types

use std::time::Duration;

use async_trait::async_trait;

use super::{Frame, TransportError};

/// Diagnostic addressing of the simulated node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressInfo {
    /// Request ID the node listens on (tester -> ECU)
    pub rx_id: u32,
    /// Response ID the node answers from (ECU -> tester)
    pub tx_id: u32,
    /// Whether the diagnostic IDs are 29-bit
    pub extended: bool,
}

/// Shared bus handle used by every schedule task and by the responder.
///
/// Implementations must serialize concurrent `send_frame`/`send_payload`
/// calls. Receives are single-consumer: only the diagnostic server reads.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Put a single frame on the bus
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Send an already-assembled diagnostic payload to the tester
    ///
    /// Segmentation into individual frames is the transport's business.
    async fn send_payload(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a reassembled diagnostic request
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive_payload(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the underlying sockets; later sends fail with `ConnectionClosed`
    async fn shutdown(&self);

    /// Get the diagnostic address configuration
    fn address_info(&self) -> AddressInfo;
}
