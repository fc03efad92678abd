//! ecusim - ECU bench simulator
//!
//! Stands in for an ECU on a CAN bench so diagnostic tooling can be tested
//! without hardware. Two things run side by side on one shared transport:
//!
//! - network-management traffic: [`FrameJob`]s transmit phased periodic
//!   frames, grouped and driven through operating modes by the
//!   [`ModeController`]
//! - diagnostics: the [`DiagnosticServer`] answers every request using the
//!   [`DiagnosticResponder`] (canned [`CaseTable`] entries first, then
//!   built-in rules)
//!
//! # Example
//!
//! ```ignore
//! let config = EcuSimConfig::load("config/ecusim.toml")?;
//! let sim = Simulator::from_config(&config).await?;
//! sim.start().await;
//! sim.controller().normal().await?;
//! ```

pub mod cases;
pub mod config;
pub mod console;
pub mod error;
pub mod mode;
pub mod nodes;
pub mod responder;
pub mod schedule;
pub mod simulator;
pub mod uds;

mod task;

pub use cases::{CaseEntry, CaseTable, CaseTableError};
pub use config::{ConfigError, EcuSimConfig};
pub use error::{ModeError, SimError};
pub use mode::{CycleObserver, JobSet, ModeController, ModeSnapshot, ModeState, ModeTiming};
pub use nodes::{NodeAddress, NodeTable};
pub use responder::{DiagnosticResponder, DiagnosticServer, Response, ResponseKind};
pub use schedule::{
    FrameJob, JobSnapshot, JobSpec, OverridePhase, Phase, ScheduleError, Threshold,
};
pub use simulator::Simulator;
