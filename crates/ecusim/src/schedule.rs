//! Per-identifier periodic frame scheduling
//!
//! A [`FrameJob`] owns the transmission pattern of one bus identifier: an
//! ordered list of [`Phase`]s, each with its own payload and interval, plus
//! an optional temporary [`OverridePhase`]. Phase 0 is active at start; a
//! phase hands over to the next one once its [`Threshold`] is reached and
//! the last phase is kept forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ecusim_transport::{BusTransport, Frame, FrameError, FrameFormat};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::task::{shutdown_requested, BackgroundTask};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Job '{0}' has no phases")]
    EmptySchedule(String),

    #[error("Job '{0}' has a zero transmission interval")]
    ZeroInterval(String),

    #[error("Job '{job}': {source}")]
    Frame {
        job: String,
        #[source]
        source: FrameError,
    },
}

/// When a phase hands over to the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// After this many frames were sent in the phase (0 skips the phase)
    Frames(u32),
    /// After this much time has passed since the phase was entered
    Elapsed(Duration),
    /// Never leave this phase
    Never,
}

/// One segment of a schedule
#[derive(Debug, Clone)]
pub struct Phase {
    pub payload: Bytes,
    pub interval: Duration,
    pub threshold: Threshold,
}

impl Phase {
    pub fn new(payload: impl Into<Bytes>, interval: Duration, threshold: Threshold) -> Self {
        Self {
            payload: payload.into(),
            interval,
            threshold,
        }
    }

    /// Phase that lasts `frames` frames
    pub fn frames(payload: impl Into<Bytes>, interval: Duration, frames: u32) -> Self {
        Self::new(payload, interval, Threshold::Frames(frames))
    }

    /// Phase that is never left
    pub fn steady(payload: impl Into<Bytes>, interval: Duration) -> Self {
        Self::new(payload, interval, Threshold::Never)
    }
}

/// Temporary payload that preempts the schedule for a number of frames
#[derive(Debug, Clone)]
pub struct OverridePhase {
    pub payload: Bytes,
    pub interval: Duration,
    pub frames: u32,
}

/// Everything needed to build a [`FrameJob`]
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub id: u32,
    pub format: FrameFormat,
    pub phases: Vec<Phase>,
    pub override_phase: Option<OverridePhase>,
}

/// Point-in-time view of a job's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobSnapshot {
    pub running: bool,
    pub frames_sent: u64,
    pub phase_index: usize,
    pub override_active: bool,
}

/// Immutable, pre-validated schedule shared with the send loop
#[derive(Debug)]
struct Schedule {
    name: String,
    id: u32,
    phases: Vec<ScheduledPhase>,
    override_phase: Option<ScheduledOverride>,
}

#[derive(Debug)]
struct ScheduledPhase {
    frame: Frame,
    interval: Duration,
    threshold: Threshold,
}

#[derive(Debug)]
struct ScheduledOverride {
    frame: Frame,
    interval: Duration,
    frames: u32,
}

/// Mutable progress, touched by the send loop and by `stop()`
#[derive(Debug, Default)]
struct Progress {
    phase_index: usize,
    frames_in_phase: u32,
    phase_entered: Option<Instant>,
    frames_sent: u64,
    override_active: bool,
    override_sent: u32,
}

impl Progress {
    /// Pick the frame for this tick and advance the schedule
    fn next_tick(&mut self, schedule: &Schedule, now: Instant) -> (Frame, Duration) {
        if self.override_active {
            if let Some(ovr) = &schedule.override_phase {
                if self.override_sent < ovr.frames {
                    self.override_sent += 1;
                    self.frames_sent += 1;
                    if self.override_sent >= ovr.frames {
                        self.override_active = false;
                        self.override_sent = 0;
                    }
                    return (ovr.frame.clone(), ovr.interval);
                }
            }
            self.override_active = false;
            self.override_sent = 0;
        }

        if self.phase_entered.is_none() {
            self.phase_entered = Some(now);
        }
        self.advance_while_due(schedule, now);

        let phase = &schedule.phases[self.phase_index];
        let tick = (phase.frame.clone(), phase.interval);
        self.frames_in_phase = self.frames_in_phase.saturating_add(1);
        self.frames_sent += 1;

        self.advance_while_due(schedule, now);
        tick
    }

    fn advance_while_due(&mut self, schedule: &Schedule, now: Instant) {
        while self.phase_index + 1 < schedule.phases.len() {
            let due = match schedule.phases[self.phase_index].threshold {
                Threshold::Frames(n) => self.frames_in_phase >= n,
                Threshold::Elapsed(d) => {
                    let entered = self.phase_entered.unwrap_or(now);
                    now.duration_since(entered) >= d
                }
                Threshold::Never => false,
            };
            if !due {
                break;
            }

            self.phase_index += 1;
            self.frames_in_phase = 0;
            self.phase_entered = Some(now);
            debug!(
                job = %schedule.name,
                phase = self.phase_index,
                "Phase transition"
            );
        }
    }
}

/// Periodic transmitter for a single bus identifier
pub struct FrameJob {
    schedule: Arc<Schedule>,
    transport: Arc<dyn BusTransport>,
    progress: Arc<Mutex<Progress>>,
    running: AtomicBool,
    task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

impl FrameJob {
    pub fn new(spec: JobSpec, transport: Arc<dyn BusTransport>) -> Result<Self, ScheduleError> {
        if spec.phases.is_empty() {
            return Err(ScheduleError::EmptySchedule(spec.name));
        }
        let zero_interval = spec.phases.iter().any(|phase| phase.interval.is_zero())
            || spec
                .override_phase
                .as_ref()
                .is_some_and(|ovr| ovr.interval.is_zero());
        if zero_interval {
            return Err(ScheduleError::ZeroInterval(spec.name));
        }

        let build = |payload: &Bytes| {
            Frame::new(spec.id, payload.clone(), spec.format).map_err(|source| {
                ScheduleError::Frame {
                    job: spec.name.clone(),
                    source,
                }
            })
        };

        let phases = spec
            .phases
            .iter()
            .map(|phase| {
                Ok(ScheduledPhase {
                    frame: build(&phase.payload)?,
                    interval: phase.interval,
                    threshold: phase.threshold,
                })
            })
            .collect::<Result<Vec<_>, ScheduleError>>()?;

        let override_phase = spec
            .override_phase
            .as_ref()
            .map(|ovr| {
                Ok::<_, ScheduleError>(ScheduledOverride {
                    frame: build(&ovr.payload)?,
                    interval: ovr.interval,
                    frames: ovr.frames,
                })
            })
            .transpose()?;

        Ok(Self {
            schedule: Arc::new(Schedule {
                name: spec.name,
                id: spec.id,
                phases,
                override_phase,
            }),
            transport,
            progress: Arc::new(Mutex::new(Progress::default())),
            running: AtomicBool::new(false),
            task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.schedule.name
    }

    pub fn id(&self) -> u32 {
        self.schedule.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn has_override(&self) -> bool {
        self.schedule.override_phase.is_some()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let progress = self.progress.lock();
        JobSnapshot {
            running: self.is_running(),
            frames_sent: progress.frames_sent,
            phase_index: progress.phase_index,
            override_active: progress.override_active,
        }
    }

    /// Launch the send loop. No-op if it is already running.
    ///
    /// Progress is not reset here; only [`FrameJob::stop`] does that.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let schedule = self.schedule.clone();
        let progress = self.progress.clone();
        let transport = self.transport.clone();
        *task = Some(BackgroundTask::spawn(move |shutdown| {
            send_loop(schedule, progress, transport, shutdown)
        }));
        self.running.store(true, Ordering::SeqCst);

        info!(
            job = %self.schedule.name,
            id = format!("0x{:03X}", self.schedule.id),
            "Frame job started"
        );
    }

    /// Stop the send loop and wait for it to exit, then reset progress.
    ///
    /// No frame for this job reaches the transport after this returns.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(running) = task.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        running.stop().await;
        *self.progress.lock() = Progress::default();

        info!(job = %self.schedule.name, "Frame job stopped");
    }

    /// Arm the temporary override; it takes effect on the next tick.
    ///
    /// Returns false when the job has no override configured.
    pub fn activate_override(&self) -> bool {
        if self.schedule.override_phase.is_none() {
            return false;
        }
        let mut progress = self.progress.lock();
        progress.override_active = true;
        progress.override_sent = 0;
        info!(job = %self.schedule.name, "Override activated");
        true
    }
}

impl Drop for FrameJob {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn send_loop(
    schedule: Arc<Schedule>,
    progress: Arc<Mutex<Progress>>,
    transport: Arc<dyn BusTransport>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let (frame, interval) = progress.lock().next_tick(&schedule, Instant::now());

        if let Err(e) = transport.send_frame(&frame).await {
            warn!(job = %schedule.name, ?e, "Failed to send frame");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
    debug!(job = %schedule.name, "Send loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(phases: Vec<(u8, Threshold)>) -> Schedule {
        Schedule {
            name: "test".to_string(),
            id: 0x391,
            phases: phases
                .into_iter()
                .map(|(marker, threshold)| ScheduledPhase {
                    frame: Frame::standard(0x391, vec![marker]).unwrap(),
                    interval: Duration::from_millis(20),
                    threshold,
                })
                .collect(),
            override_phase: Some(ScheduledOverride {
                frame: Frame::standard(0x391, vec![0xEEu8]).unwrap(),
                interval: Duration::from_millis(20),
                frames: 2,
            }),
        }
    }

    fn markers(schedule: &Schedule, progress: &mut Progress, ticks: usize) -> Vec<u8> {
        let now = Instant::now();
        (0..ticks)
            .map(|_| progress.next_tick(schedule, now).0.data()[0])
            .collect()
    }

    #[test]
    fn test_frame_threshold_switches_once() {
        let schedule = schedule(vec![(1, Threshold::Frames(3)), (2, Threshold::Never)]);
        let mut progress = Progress::default();
        assert_eq!(markers(&schedule, &mut progress, 6), vec![1, 1, 1, 2, 2, 2]);
        assert_eq!(progress.phase_index, 1);
        assert_eq!(progress.frames_sent, 6);
    }

    #[test]
    fn test_zero_threshold_skips_phase() {
        let schedule = schedule(vec![
            (1, Threshold::Frames(0)),
            (2, Threshold::Frames(2)),
            (3, Threshold::Never),
        ]);
        let mut progress = Progress::default();
        assert_eq!(markers(&schedule, &mut progress, 4), vec![2, 2, 3, 3]);
    }

    #[test]
    fn test_last_phase_is_kept() {
        let schedule = schedule(vec![(1, Threshold::Frames(1)), (2, Threshold::Frames(1))]);
        let mut progress = Progress::default();
        assert_eq!(markers(&schedule, &mut progress, 4), vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_single_phase_never_transitions() {
        let schedule = schedule(vec![(7, Threshold::Frames(1))]);
        let mut progress = Progress::default();
        assert_eq!(markers(&schedule, &mut progress, 3), vec![7, 7, 7]);
        assert_eq!(progress.phase_index, 0);
    }

    #[test]
    fn test_override_preempts_then_resumes() {
        let schedule = schedule(vec![(1, Threshold::Frames(3)), (2, Threshold::Never)]);
        let mut progress = Progress::default();
        assert_eq!(markers(&schedule, &mut progress, 2), vec![1, 1]);

        progress.override_active = true;
        assert_eq!(
            markers(&schedule, &mut progress, 4),
            vec![0xEE, 0xEE, 1, 2]
        );
        assert!(!progress.override_active);
    }

    #[test]
    fn test_elapsed_threshold() {
        let schedule = schedule(vec![
            (1, Threshold::Elapsed(Duration::from_millis(50))),
            (2, Threshold::Never),
        ]);
        let mut progress = Progress::default();
        let start = Instant::now();

        let at = |ms: u64| start + Duration::from_millis(ms);
        assert_eq!(progress.next_tick(&schedule, at(0)).0.data()[0], 1);
        assert_eq!(progress.next_tick(&schedule, at(40)).0.data()[0], 1);
        assert_eq!(progress.next_tick(&schedule, at(60)).0.data()[0], 2);
    }
}
