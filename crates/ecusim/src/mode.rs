//! Operating modes and timed transitions
//!
//! ```text
//!            normal                polling               auto
//!   Idle ───────────► Normal ───────────► Polling     (any) ───► AutoTestCycle
//!    ▲                                      │                      │
//!    └────────── polling dwell expires ─────┘         ┌────────────┘
//!                                                     ▼
//!                            Normal ──5s──► Polling ──5s──► Quiescent ──45s──┐
//!                              ▲                                             │
//!                              └─────────────────────────────────────────────┘
//! ```
//!
//! Every command bumps a generation counter and cancels the pending deferred
//! step (polling auto-stop or the auto-test cycle) before doing anything
//! else. A deferred step re-checks the generation under the state lock
//! before touching any job, so a cancelled step has no side effects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ecusim_transport::BusTransport;
use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::error::ModeError;
use crate::schedule::{FrameJob, JobSnapshot};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeState {
    #[default]
    Idle,
    Normal,
    Polling,
    AutoTestCycle,
    Terminated,
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeState::Idle => "idle",
            ModeState::Normal => "normal",
            ModeState::Polling => "polling",
            ModeState::AutoTestCycle => "auto-test",
            ModeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Dwell times of the timed transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTiming {
    pub polling_dwell: Duration,
    pub normal_dwell: Duration,
    pub quiescent: Duration,
}

impl Default for ModeTiming {
    fn default() -> Self {
        Self {
            polling_dwell: Duration::from_secs(5),
            normal_dwell: Duration::from_secs(5),
            quiescent: Duration::from_secs(45),
        }
    }
}

/// The fixed set of jobs a controller owns
#[derive(Default)]
pub struct JobSet {
    /// Wake/keep-alive jobs
    pub normal: Vec<Arc<FrameJob>>,
    /// Polling-request jobs
    pub arm: Vec<Arc<FrameJob>>,
}

impl JobSet {
    pub fn all(&self) -> impl Iterator<Item = &Arc<FrameJob>> {
        self.normal.iter().chain(self.arm.iter())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<FrameJob>> {
        self.all().find(|job| job.name() == name)
    }
}

async fn start_all(jobs: &[Arc<FrameJob>]) {
    for job in jobs {
        job.start().await;
    }
}

async fn stop_all(jobs: &[Arc<FrameJob>]) {
    for job in jobs {
        job.stop().await;
    }
}

/// Receives the auto-test cycle count
pub trait CycleObserver: Send + Sync {
    fn cycle_started(&self, cycle: u64);
}

/// Default observer: one log event per cycle
#[derive(Debug, Default)]
pub struct TracingObserver;

impl CycleObserver for TracingObserver {
    fn cycle_started(&self, cycle: u64) {
        info!(cycle, "Auto-test cycle started");
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub mode: ModeState,
    pub cycles: u64,
    pub jobs: Vec<(String, JobSnapshot)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CyclePhase {
    Normal,
    Polling,
    Quiescent,
}

impl CyclePhase {
    fn next(self) -> Self {
        match self {
            CyclePhase::Normal => CyclePhase::Polling,
            CyclePhase::Polling => CyclePhase::Quiescent,
            CyclePhase::Quiescent => CyclePhase::Normal,
        }
    }

    fn dwell(self, timing: &ModeTiming) -> Duration {
        match self {
            CyclePhase::Normal => timing.normal_dwell,
            CyclePhase::Polling => timing.polling_dwell,
            CyclePhase::Quiescent => timing.quiescent,
        }
    }
}

/// Guarded by `Inner::state`; only one command or deferred step runs at a time
#[derive(Default)]
struct ControllerState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

struct Inner {
    jobs: JobSet,
    transport: Arc<dyn BusTransport>,
    timing: ModeTiming,
    observer: Arc<dyn CycleObserver>,
    state: tokio::sync::Mutex<ControllerState>,
    /// Abort handle of `ControllerState::pending`, reachable without the async lock
    abort: Mutex<Option<AbortHandle>>,
    /// Written only while `state` is held
    mode: Mutex<ModeState>,
    cycles: AtomicU64,
}

impl Inner {
    fn mode(&self) -> ModeState {
        *self.mode.lock()
    }

    fn set_mode(&self, mode: ModeState) {
        let previous = std::mem::replace(&mut *self.mode.lock(), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Mode changed");
        }
    }

    fn set_pending(&self, state: &mut ControllerState, handle: JoinHandle<()>) {
        *self.abort.lock() = Some(handle.abort_handle());
        state.pending = Some(handle);
    }

    fn clear_pending(&self, state: &mut ControllerState) -> Option<JoinHandle<()>> {
        self.abort.lock().take();
        state.pending.take()
    }

    /// Invalidate and join the pending deferred step
    async fn cancel_pending(&self, state: &mut ControllerState) -> u64 {
        state.generation += 1;
        if let Some(handle) = self.clear_pending(state) {
            handle.abort();
            let _ = handle.await;
            debug!(generation = state.generation, "Pending transition cancelled");
        }
        state.generation
    }

    async fn enter_cycle_phase(&self, phase: CyclePhase) {
        match phase {
            CyclePhase::Normal => {
                stop_all(&self.jobs.arm).await;
                start_all(&self.jobs.normal).await;
                let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
                self.observer.cycle_started(cycle);
            }
            CyclePhase::Polling => {
                stop_all(&self.jobs.normal).await;
                start_all(&self.jobs.arm).await;
            }
            CyclePhase::Quiescent => {
                stop_all(&self.jobs.arm).await;
            }
        }
        debug!(?phase, "Auto-test phase entered");
    }
}

/// Drives the owned frame jobs through the operating modes
pub struct ModeController {
    inner: Arc<Inner>,
}

impl ModeController {
    pub fn new(jobs: JobSet, transport: Arc<dyn BusTransport>, timing: ModeTiming) -> Self {
        Self::with_observer(jobs, transport, timing, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        jobs: JobSet,
        transport: Arc<dyn BusTransport>,
        timing: ModeTiming,
        observer: Arc<dyn CycleObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                transport,
                timing,
                observer,
                state: tokio::sync::Mutex::new(ControllerState::default()),
                abort: Mutex::new(None),
                mode: Mutex::new(ModeState::Idle),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    pub fn mode(&self) -> ModeState {
        self.inner.mode()
    }

    /// Number of auto-test cycles entered so far
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> &JobSet {
        &self.inner.jobs
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            mode: self.mode(),
            cycles: self.cycles(),
            jobs: self
                .inner
                .jobs
                .all()
                .map(|job| (job.name().to_string(), job.snapshot()))
                .collect(),
        }
    }

    async fn lock_live(&self) -> Result<tokio::sync::MutexGuard<'_, ControllerState>, ModeError> {
        let state = self.inner.state.lock().await;
        if self.inner.mode() == ModeState::Terminated {
            return Err(ModeError::Terminated);
        }
        Ok(state)
    }

    /// Start the wake/keep-alive jobs. No-op when already in Normal.
    pub async fn normal(&self) -> Result<(), ModeError> {
        let mut state = self.lock_live().await?;
        if self.inner.mode() == ModeState::Normal {
            return Ok(());
        }

        self.inner.cancel_pending(&mut state).await;
        stop_all(&self.inner.jobs.arm).await;
        start_all(&self.inner.jobs.normal).await;
        self.inner.set_mode(ModeState::Normal);
        Ok(())
    }

    /// Replace the normal jobs with the arm jobs for the polling dwell,
    /// then stop them and fall back to Idle.
    pub async fn polling(&self) -> Result<(), ModeError> {
        let mut state = self.lock_live().await?;
        let generation = self.inner.cancel_pending(&mut state).await;

        // Normal jobs share identifiers with the arm jobs; they must be
        // fully quiet before the first arm frame goes out.
        stop_all(&self.inner.jobs.normal).await;
        stop_all(&self.inner.jobs.arm).await;
        start_all(&self.inner.jobs.arm).await;
        self.inner.set_mode(ModeState::Polling);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.timing.polling_dwell).await;

            let mut state = inner.state.lock().await;
            if state.generation != generation {
                return;
            }
            inner.clear_pending(&mut state);
            stop_all(&inner.jobs.arm).await;
            inner.set_mode(ModeState::Idle);
            info!("Polling dwell elapsed, arm jobs stopped");
        });
        self.inner.set_pending(&mut state, handle);
        Ok(())
    }

    /// Run the unattended Normal / Polling / Quiescent cycle until another
    /// command arrives. Re-commanding restarts the cycle at Normal.
    pub async fn auto_test(&self) -> Result<(), ModeError> {
        let mut state = self.lock_live().await?;
        let generation = self.inner.cancel_pending(&mut state).await;

        stop_all(&self.inner.jobs.normal).await;
        self.inner.enter_cycle_phase(CyclePhase::Normal).await;
        self.inner.set_mode(ModeState::AutoTestCycle);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut phase = CyclePhase::Normal;
            loop {
                tokio::time::sleep(phase.dwell(&inner.timing)).await;
                phase = phase.next();

                let state = inner.state.lock().await;
                if state.generation != generation {
                    return;
                }
                inner.enter_cycle_phase(phase).await;
            }
        });
        self.inner.set_pending(&mut state, handle);
        Ok(())
    }

    /// Stop every job and cancel the pending transition
    pub async fn stop(&self) -> Result<(), ModeError> {
        let mut state = self.lock_live().await?;
        self.inner.cancel_pending(&mut state).await;
        stop_all(&self.inner.jobs.normal).await;
        stop_all(&self.inner.jobs.arm).await;
        self.inner.set_mode(ModeState::Idle);
        Ok(())
    }

    /// Activate the temporary override of the named job
    pub async fn trigger_override(&self, name: &str) -> Result<(), ModeError> {
        let _state = self.lock_live().await?;
        let job = self
            .inner
            .jobs
            .find(name)
            .ok_or_else(|| ModeError::UnknownJob(name.to_string()))?;
        if !job.activate_override() {
            return Err(ModeError::NoOverride(name.to_string()));
        }
        Ok(())
    }

    /// Stop everything and release the transport. Idempotent.
    pub async fn terminate(&self) {
        let mut state = self.inner.state.lock().await;
        if self.inner.mode() == ModeState::Terminated {
            return;
        }

        self.inner.cancel_pending(&mut state).await;
        stop_all(&self.inner.jobs.normal).await;
        stop_all(&self.inner.jobs.arm).await;
        self.inner.transport.shutdown().await;
        self.inner.set_mode(ModeState::Terminated);
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.abort.lock().take() {
            handle.abort();
        }
    }
}
