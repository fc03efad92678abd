//! SocketCAN adapter: raw CAN for scheduled frames, ISO-TP for diagnostics

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use socketcan_isotp::IsoTpSocket;

use crate::config::SocketCanConfig;
use crate::frame::CLASSIC_MAX_DATA;
use crate::{parse_can_id, AddressInfo, BusTransport, Frame, TransportError};

/// Delay between polls of the non-blocking ISO-TP socket
const READ_POLL_DELAY: Duration = Duration::from_millis(1);

/// SocketCAN bus handle shared by all schedule tasks and the responder
pub struct SocketCanBus {
    raw: Arc<Mutex<CanSocket>>,
    isotp: Arc<Mutex<IsoTpSocket>>,
    address_info: AddressInfo,
    open: AtomicBool,
}

impl SocketCanBus {
    pub fn new(config: &SocketCanConfig) -> Result<Self, TransportError> {
        let rx_id = parse_can_id(&config.rx_id)?;
        let tx_id = parse_can_id(&config.tx_id)?;

        let mut isotp = Self::create_isotp_socket(config, rx_id, tx_id)?;

        // Drain any stale data from the socket (from previous sessions/processes)
        Self::drain_socket(&mut isotp);

        let raw = CanSocket::open(&config.interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                config.interface, e
            ))
        })?;
        raw.set_nonblocking(true).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set non-blocking: {}", e))
        })?;

        tracing::info!(
            interface = %config.interface,
            rx_id = format!("0x{:X}", rx_id),
            tx_id = format!("0x{:X}", tx_id),
            extended = config.extended,
            "SocketCAN transport opened"
        );

        Ok(Self {
            raw: Arc::new(Mutex::new(raw)),
            isotp: Arc::new(Mutex::new(isotp)),
            address_info: AddressInfo {
                rx_id,
                tx_id,
                extended: config.extended,
            },
            open: AtomicBool::new(true),
        })
    }

    fn create_isotp_socket(
        config: &SocketCanConfig,
        rx_id: u32,
        tx_id: u32,
    ) -> Result<IsoTpSocket, TransportError> {
        let rx = to_socketcan_id(rx_id, config.extended)?;
        let tx = to_socketcan_id(tx_id, config.extended)?;

        let socket = IsoTpSocket::open(&config.interface, rx, tx).map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to open ISO-TP socket: {}", e))
        })?;

        socket.set_nonblocking(true).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set non-blocking: {}", e))
        })?;

        Ok(socket)
    }

    /// Drain any pending data from the socket to clear stale messages
    fn drain_socket(socket: &mut IsoTpSocket) {
        while let Ok(data) = socket.read() {
            if data.is_empty() {
                break;
            }
            tracing::debug!(data = ?data, "Drained stale message from socket");
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

fn to_socketcan_id(id: u32, extended: bool) -> Result<Id, TransportError> {
    let converted = if extended {
        ExtendedId::new(id).map(Id::Extended)
    } else {
        u16::try_from(id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    converted.ok_or_else(|| {
        TransportError::InvalidConfig(format!(
            "Invalid {} CAN ID: 0x{:X}",
            if extended { "extended" } else { "standard" },
            id
        ))
    })
}

#[async_trait]
impl BusTransport for SocketCanBus {
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.ensure_open()?;

        if frame.data().len() > CLASSIC_MAX_DATA {
            return Err(TransportError::Unsupported(
                "CAN FD frames on the raw socket".to_string(),
            ));
        }

        let id = to_socketcan_id(frame.id(), frame.is_extended())?;
        let can_frame = CanFrame::new(id, frame.data()).ok_or_else(|| {
            TransportError::SendFailed(format!("Cannot build frame 0x{:X}", frame.id()))
        })?;

        let socket = self.raw.clone();
        tokio::task::spawn_blocking(move || {
            let socket_guard = socket.lock();
            socket_guard
                .write_frame(&can_frame)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("Task join error: {}", e)))?
    }

    async fn send_payload(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;

        let socket = self.isotp.clone();
        let payload = payload.to_vec();

        tokio::task::spawn_blocking(move || {
            let socket_guard = socket.lock();
            socket_guard
                .write(&payload)
                .map(|_| ())
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("Task join error: {}", e)))?
    }

    async fn receive_payload(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.ensure_open()?;

            {
                let mut socket_guard = self.isotp.lock();
                match socket_guard.read() {
                    Ok(data) if !data.is_empty() => return Ok(Some(data.to_vec())),
                    Ok(_) => {}
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(READ_POLL_DELAY).await;
        }
    }

    async fn shutdown(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::info!("SocketCAN transport closed");
        }
    }

    fn address_info(&self) -> AddressInfo {
        self.address_info
    }
}

impl Drop for SocketCanBus {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
