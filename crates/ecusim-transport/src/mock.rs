//! Mock transport adapter for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{AddressInfo, BusTransport, Frame, TransportError};
use crate::config::MockConfig;

/// A frame captured by the mock bus
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// When the frame reached the bus
    pub at: Instant,
    pub frame: Frame,
}

/// In-memory bus that records everything sent and replays injected requests
pub struct MockBus {
    config: MockConfig,
    open: AtomicBool,
    fail_sends: AtomicBool,
    frames: Mutex<Vec<SentFrame>>,
    payloads: Mutex<Vec<Vec<u8>>>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MockBus {
    pub fn new(config: &MockConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            config: config.clone(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Queue a diagnostic request as if the tester had sent it
    pub fn inject_request(&self, payload: Vec<u8>) {
        let _ = self.inbound_tx.send(payload);
    }

    /// Make every following send fail with `SendFailed`
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// All frames sent so far, in bus order
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.frames.lock().clone()
    }

    /// Frames sent on a single identifier, in bus order
    pub fn frames_for(&self, id: u32) -> Vec<SentFrame> {
        self.frames
            .lock()
            .iter()
            .filter(|sent| sent.frame.id() == id)
            .cloned()
            .collect()
    }

    /// All diagnostic payloads sent so far
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.frames.lock().clear();
        self.payloads.lock().clear();
    }

    async fn check_send(&self) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        // Simulate latency
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(
                "Mock transport: send failure injected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BusTransport for MockBus {
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.check_send().await?;

        tracing::trace!(id = frame.id(), data = ?frame.data(), "Mock transport: sent frame");
        self.frames.lock().push(SentFrame {
            at: Instant::now(),
            frame: frame.clone(),
        });
        Ok(())
    }

    async fn send_payload(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.check_send().await?;

        tracing::debug!(payload = %hex::encode_upper(payload), "Mock transport: sent payload");
        self.payloads.lock().push(payload.to_vec());
        Ok(())
    }

    async fn receive_payload(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        tracing::debug!("Mock transport: shut down");
    }

    fn address_info(&self) -> AddressInfo {
        AddressInfo {
            rx_id: self.config.rx_id,
            tx_id: self.config.tx_id,
            extended: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_frames_per_id() {
        let bus = MockBus::new(&MockConfig::default());
        bus.send_frame(&Frame::standard(0x600, vec![0u8; 8]).unwrap())
            .await
            .unwrap();
        bus.send_frame(&Frame::standard(0x391, vec![1u8; 8]).unwrap())
            .await
            .unwrap();

        assert_eq!(bus.sent_frames().len(), 2);
        assert_eq!(bus.frames_for(0x391).len(), 1);
        assert_eq!(bus.frames_for(0x391)[0].frame.data(), &[1u8; 8]);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let bus = MockBus::new(&MockConfig::default());
        bus.set_fail_sends(true);
        let result = bus.send_payload(&[0x50, 0x03]).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(bus.sent_payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_with_none() {
        let bus = MockBus::new(&MockConfig::default());
        let received = bus
            .receive_payload(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(received.is_none());

        bus.inject_request(vec![0x10, 0x03]);
        let received = bus
            .receive_payload(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(received, Some(vec![0x10, 0x03]));
    }

    #[tokio::test]
    async fn test_shutdown_closes_bus() {
        let bus = MockBus::new(&MockConfig::default());
        bus.shutdown().await;
        assert!(!bus.is_open());
        let result = bus
            .send_frame(&Frame::standard(0x600, vec![0u8; 8]).unwrap())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }
}
