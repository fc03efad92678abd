//! Wiring of the responder, the diagnostic server and the mode controller
//! onto one shared transport

use std::sync::Arc;

use ecusim_transport::{create_transport, BusTransport};
use tracing::info;

use crate::cases::CaseTable;
use crate::config::EcuSimConfig;
use crate::error::SimError;
use crate::mode::{ModeController, ModeTiming};
use crate::responder::{DiagnosticResponder, DiagnosticServer};

/// A fully assembled simulator
pub struct Simulator {
    controller: ModeController,
    server: DiagnosticServer,
}

impl Simulator {
    /// Open the configured transport and build everything on top of it
    pub async fn from_config(config: &EcuSimConfig) -> Result<Self, SimError> {
        let transport = create_transport(&config.transport_config()?).await?;
        Self::with_transport(config, transport)
    }

    /// Build on an already opened transport
    pub fn with_transport(
        config: &EcuSimConfig,
        transport: Arc<dyn BusTransport>,
    ) -> Result<Self, SimError> {
        let cases = CaseTable::load(&config.cases)?;
        info!(path = %config.cases, entries = cases.len(), "Case table loaded");

        let responder = Arc::new(DiagnosticResponder::new(
            Arc::new(cases),
            config.responder.clone(),
        ));
        let server = DiagnosticServer::new(responder, transport.clone());

        let jobs = config.build_jobs(&transport)?;
        let controller = ModeController::new(jobs, transport, ModeTiming::from(&config.modes));

        Ok(Self { controller, server })
    }

    pub fn controller(&self) -> &ModeController {
        &self.controller
    }

    pub fn server(&self) -> &DiagnosticServer {
        &self.server
    }

    /// Start answering diagnostic requests. The controller stays Idle.
    pub async fn start(&self) {
        self.server.start().await;
    }

    /// Stop the receive loop, then every job, then release the transport
    pub async fn shutdown(&self) {
        self.server.stop().await;
        self.controller.terminate().await;
    }
}
