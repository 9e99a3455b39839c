//! Xrun accounting and recovery policy.
//!
//! A transient xrun (missed deadline, DMA under/overflow) stops the
//! pipeline and re-arms it: STOP → PREPARE → START. Because a stopped
//! pipeline parks in PREPARE, the re-prepare is a no-op and the whole
//! recovery path allocates nothing. A second xrun inside the report
//! window means the stream is genuinely broken; it is reported to the
//! host and the pipeline stays stopped.

use apx_core::{ApxError, StatusSink};

use crate::constants::XRUN_WINDOW_TICKS;

/// What the scheduler should do about a recorded xrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrunAction {
    /// First offence in the window: silently stop/prepare/start.
    Recover,
    /// Repeated offence: report host-visible error, leave stopped.
    ReportAndStop,
}

/// Per-pipeline xrun history.
#[derive(Debug, Default)]
pub struct XrunMonitor {
    last_xrun_tick: Option<u64>,
    total: u64,
}

impl XrunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an xrun at `tick` and decides the response.
    pub fn record(&mut self, tick: u64, status: &dyn StatusSink) -> XrunAction {
        self.total += 1;
        let repeated = self
            .last_xrun_tick
            .is_some_and(|last| tick.saturating_sub(last) <= XRUN_WINDOW_TICKS);
        self.last_xrun_tick = Some(tick);

        if repeated {
            status.set_status(ApxError::Xrun.code());
            XrunAction::ReportAndStop
        } else {
            XrunAction::Recover
        }
    }

    /// Xruns recorded since creation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Forgets history, used when a pipeline is reset by the host.
    pub fn clear(&mut self) {
        self.last_xrun_tick = None;
    }
}
