//! Job lifecycle: state machine, cooperative stop/pause, progress tracking.
//!
//! ```text
//!          begin                 finish
//!   Idle ────────▶ Running ─────────────▶ Completed | Failed | Stopped
//!                   │   ▲
//!             pause │   │ resume
//!                   ▼   │
//!                  Paused
//! ```
//!
//! A job owns two independent flags, `stop` and `pause`, plus its state, all
//! atomics behind one `Arc`.  [`JobHandle`]s flip the flags from any thread;
//! the worker only looks at them in [`JobControl::checkpoint`], between work
//! units.  Nothing blocks on a lock: a paused worker sleeps for the poll
//! interval and looks again.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use serde::Serialize;

// ── JobState ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum JobState {
    Idle      = 0,
    Running   = 1,
    Paused    = 2,
    Completed = 3,
    Failed    = 4,
    Stopped   = 5,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => JobState::Running,
            2 => JobState::Paused,
            3 => JobState::Completed,
            4 => JobState::Failed,
            5 => JobState::Stopped,
            _ => JobState::Idle,
        }
    }

    /// Running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Running | JobState::Paused)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Stopped)
    }

    pub fn name(self) -> &'static str {
        match self {
            JobState::Idle      => "idle",
            JobState::Running   => "running",
            JobState::Paused    => "paused",
            JobState::Completed => "completed",
            JobState::Failed    => "failed",
            JobState::Stopped   => "stopped",
        }
    }
}

/// Returned by [`JobControl::checkpoint`] when the stop flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

// ── JobControl ───────────────────────────────────────────────────────────────

/// Shared flags of one job.
#[derive(Debug)]
pub struct JobControl {
    stop:  AtomicBool,
    pause: AtomicBool,
    state: AtomicU8,
}

impl Default for JobControl {
    fn default() -> Self {
        Self {
            stop:  AtomicBool::new(false),
            pause: AtomicBool::new(false),
            state: AtomicU8::new(JobState::Idle as u8),
        }
    }
}

impl JobControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: JobState, to: JobState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            debug!("job {} -> {}", from.name(), to.name());
        }
        moved
    }

    /// Idle → Running.  Returns `false` if the job was already started.
    pub fn begin(&self) -> bool {
        self.transition(JobState::Idle, JobState::Running)
    }

    /// Record the terminal state.  Only an active job can finish.
    pub fn finish(&self, outcome: JobState) {
        debug_assert!(outcome.is_finished());
        let current = self.state();
        if current.is_active() {
            self.transition(current, outcome);
        }
        self.pause.store(false, Ordering::SeqCst);
    }

    /// Called by the worker between work units.  Returns [`Interrupted`] if
    /// a stop was requested; blocks, polling every `poll`, while paused.
    pub fn checkpoint(&self, poll: Duration) -> Result<(), Interrupted> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Err(Interrupted);
            }
            if !self.pause.load(Ordering::SeqCst) {
                break;
            }
            self.transition(JobState::Running, JobState::Paused);
            thread::sleep(poll);
        }
        self.transition(JobState::Paused, JobState::Running);
        Ok(())
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

// ── JobHandle ────────────────────────────────────────────────────────────────

/// Cloneable remote control for one job.  Every method is a no-op unless the
/// job is running or paused; the return value says whether it took effect.
#[derive(Debug, Clone)]
pub struct JobHandle {
    control: Arc<JobControl>,
}

impl JobHandle {
    pub fn new(control: Arc<JobControl>) -> Self {
        Self { control }
    }

    /// Ask the worker to abort before its next unit.  Also wakes a paused
    /// worker on its next poll.
    pub fn stop(&self) -> bool {
        if !self.state().is_active() {
            return false;
        }
        self.control.stop.store(true, Ordering::SeqCst);
        true
    }

    pub fn pause(&self) -> bool {
        if !self.state().is_active() {
            return false;
        }
        self.control.pause.store(true, Ordering::SeqCst);
        true
    }

    pub fn resume(&self) -> bool {
        if !self.state().is_active() {
            return false;
        }
        self.control.pause.store(false, Ordering::SeqCst);
        true
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// Percent-complete that never moves backwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    last: f64,
}

impl ProgressTracker {
    /// Percentage after `completed` of `total` units, clamped to [0, 100]
    /// and never below a previously returned value.
    pub fn advance(&mut self, completed: usize, total: usize) -> f64 {
        let pct = if total == 0 {
            100.0
        } else {
            (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        self.last = self.last.max(pct);
        self.last
    }
}
