//! Diagnostic request handling
//!
//! [`DiagnosticResponder`] turns one reassembled request into one response
//! payload. Rules are tried in order and the first applicable one wins:
//!
//! 1. a configured case from the [`CaseTable`]
//! 2. segmented-transfer emulation (RoutineControl ack, TransferData echo);
//!    any other routine gets `7F <sid> 31`
//! 3. length-directed synthesis: the first two request bytes (big-endian)
//!    give the response length, the body is `i % 256`
//! 4. negative response `7F <sid> 31`
//!
//! Every request gets an answer. [`DiagnosticServer`] runs the responder
//! against a [`BusTransport`] in a background receive loop.

use std::sync::Arc;
use std::time::Duration;

use ecusim_transport::BusTransport;
use tracing::{debug, info, warn};

use crate::cases::CaseTable;
use crate::config::ResponderConfig;
use crate::task::{shutdown_requested, BackgroundTask};
use crate::uds::{self, nrc, routine_sub_function};

/// Service ID echoed in the negative response to an empty request
pub const EMPTY_REQUEST_SID: u8 = 0x00;

/// Which rule produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Configured,
    TransferAck,
    Synthesized,
    Negative,
}

/// A response payload and the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    pub payload: Vec<u8>,
}

impl Response {
    fn new(kind: ResponseKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

/// Stateless request-to-response mapping
#[derive(Debug, Clone)]
pub struct DiagnosticResponder {
    cases: Arc<CaseTable>,
    config: ResponderConfig,
}

impl DiagnosticResponder {
    pub fn new(cases: Arc<CaseTable>, config: ResponderConfig) -> Self {
        Self { cases, config }
    }

    pub fn cases(&self) -> &CaseTable {
        &self.cases
    }

    /// Produce the response for one request
    pub fn respond(&self, request: &[u8]) -> Response {
        if let Some(entry) = self.cases.find_payload(request) {
            return Response::new(ResponseKind::Configured, entry.response_bytes().to_vec());
        }

        if let Some(response) = self.transfer_response(request) {
            return response;
        }

        if let Some(payload) = self.synthesize(request) {
            return Response::new(ResponseKind::Synthesized, payload);
        }

        let sid = request.first().copied().unwrap_or(EMPTY_REQUEST_SID);
        Response::new(
            ResponseKind::Negative,
            uds::negative_response(sid, nrc::REQUEST_OUT_OF_RANGE),
        )
    }

    /// Segmented-transfer emulation; `None` when the request is not one of
    /// the two transfer services. A transfer request is always answered here,
    /// never synthesized.
    fn transfer_response(&self, request: &[u8]) -> Option<Response> {
        let (&sid, rest) = request.split_first()?;
        let reject = |code| {
            Response::new(ResponseKind::Negative, uds::negative_response(sid, code))
        };

        if sid == self.config.routine_control {
            if request.len() < 4 {
                return Some(reject(nrc::INCORRECT_MESSAGE_LENGTH));
            }
            let sub_function = rest[0];
            let routine = u16::from_be_bytes([rest[1], rest[2]]);
            if sub_function != routine_sub_function::START_ROUTINE
                || routine != self.config.ack_routine
            {
                return Some(reject(nrc::REQUEST_OUT_OF_RANGE));
            }
            let [hi, lo] = routine.to_be_bytes();
            return Some(Response::new(
                ResponseKind::TransferAck,
                uds::positive_response(sid, &[sub_function, hi, lo, 0x00]),
            ));
        }

        if sid == self.config.transfer_data {
            return Some(match rest.first() {
                Some(&sequence) => Response::new(
                    ResponseKind::TransferAck,
                    uds::positive_response(sid, &[sequence]),
                ),
                None => reject(nrc::INCORRECT_MESSAGE_LENGTH),
            });
        }

        None
    }

    /// Length-directed filler; `None` for an empty request or a zero length
    fn synthesize(&self, request: &[u8]) -> Option<Vec<u8>> {
        let len = match request {
            [] => return None,
            [_] => 2,
            [hi, lo, ..] => usize::from(u16::from_be_bytes([*hi, *lo])),
        };
        let len = len
            .min(self.config.max_payload_len)
            .min(uds::MAX_PAYLOAD_LEN);
        if len == 0 {
            return None;
        }

        Some((0..len).map(|i| (i % 256) as u8).collect())
    }
}

/// Background receive loop answering requests on the transport
pub struct DiagnosticServer {
    responder: Arc<DiagnosticResponder>,
    transport: Arc<dyn BusTransport>,
    poll_timeout: Duration,
    poll_interval: Duration,
    task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

impl DiagnosticServer {
    pub fn new(responder: Arc<DiagnosticResponder>, transport: Arc<dyn BusTransport>) -> Self {
        let poll_timeout = Duration::from_millis(responder.config.poll_timeout_ms);
        let poll_interval = Duration::from_millis(responder.config.poll_interval_ms);
        Self {
            responder,
            transport,
            poll_timeout,
            poll_interval,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Start the receive loop. No-op if it is already running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let responder = self.responder.clone();
        let transport = self.transport.clone();
        let poll_timeout = self.poll_timeout;
        let poll_interval = self.poll_interval;
        *task = Some(BackgroundTask::spawn(move |shutdown| {
            receive_loop(responder, transport, poll_timeout, poll_interval, shutdown)
        }));

        let address = self.transport.address_info();
        info!(
            rx_id = format!("0x{:03X}", address.rx_id),
            tx_id = format!("0x{:03X}", address.tx_id),
            cases = self.responder.cases().len(),
            "Diagnostic server started"
        );
    }

    /// Stop the receive loop and wait for it to exit
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.stop().await;
            info!("Diagnostic server stopped");
        }
    }
}

impl Drop for DiagnosticServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    responder: Arc<DiagnosticResponder>,
    transport: Arc<dyn BusTransport>,
    poll_timeout: Duration,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match transport.receive_payload(poll_timeout).await {
            Ok(Some(request)) => {
                let response = responder.respond(&request);
                debug!(
                    request = %hex::encode_upper(&request),
                    response = %hex::encode_upper(&response.payload),
                    kind = ?response.kind,
                    "Diagnostic request"
                );
                if let Err(e) = transport.send_payload(&response.payload).await {
                    warn!(?e, "Failed to send diagnostic response");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(?e, "Failed to receive diagnostic request"),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
    debug!("Receive loop exited");
}
