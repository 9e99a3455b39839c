//! Panic codes and the host-visible status register.
//!
//! Fatal conditions write `0x0DEAD000 | code` into a 32-bit status word the
//! host polls; trace points write call-site tags into a second word. On
//! hardware both map to mailbox registers; on the host they are plain
//! atomics that tests can observe.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

/// Base pattern for panic codes.
pub const PANIC_BASE: u32 = 0x0DEA_D000;

/// Reason codes OR-ed into [`PANIC_BASE`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicReason {
    /// Internal object graph corruption.
    Corruption = 0x1,
    /// A lifecycle transition that the state machine forbids.
    IllegalTransition = 0x2,
    /// An allocation on the real-time path.
    RtAllocation = 0x3,
    /// Watchdog fired while a copy pass was still running.
    Watchdog = 0x4,
}

/// Builds the 32-bit panic word for `reason`.
#[inline]
pub const fn panic_code(reason: PanicReason) -> u32 {
    PANIC_BASE | reason as u32
}

/// Sink for status and trace words.
///
/// Implementations must be wait-free; the LL pass writes trace tags.
pub trait StatusSink: Send + Sync {
    /// Latches a status word (panic codes, IPC completion codes).
    fn set_status(&self, value: u32);

    /// Records a trace tag for the current call site.
    fn trace(&self, tag: u32);
}

/// Host-side status register backed by atomics.
///
/// Keeps the latest status word and the last trace tag; good enough for
/// tests and for simulation runs where no mailbox hardware exists.
#[derive(Debug, Default)]
pub struct HostStatusRegister {
    status: AtomicU32,
    last_trace: AtomicU32,
}

impl HostStatusRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently latched status word.
    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Most recently recorded trace tag.
    pub fn last_trace(&self) -> u32 {
        self.last_trace.load(Ordering::Acquire)
    }
}

impl StatusSink for HostStatusRegister {
    fn set_status(&self, value: u32) {
        self.status.store(value, Ordering::Release);
    }

    fn trace(&self, tag: u32) {
        self.last_trace.store(tag, Ordering::Release);
    }
}

/// Shared handle to the platform status sink.
pub type StatusHandle = Arc<dyn StatusSink>;

/// Reports a fatal condition: latches the panic word and logs it.
///
/// The caller decides whether to unwind; firmware targets reboot, host
/// simulations surface the error.
pub fn report_panic(sink: &dyn StatusSink, reason: PanicReason) {
    let code = panic_code(reason);
    sink.set_status(code);
    log::error!("fatal: {reason:?} (status {code:#010x})");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_code_layout() {
        assert_eq!(panic_code(PanicReason::Corruption), 0x0DEA_D001);
        assert_eq!(panic_code(PanicReason::IllegalTransition), 0x0DEA_D002);
        assert_eq!(panic_code(PanicReason::Watchdog), 0x0DEA_D004);
    }

    #[test]
    fn test_host_register_latches() {
        let reg = HostStatusRegister::new();
        report_panic(&reg, PanicReason::Watchdog);
        assert_eq!(reg.status(), panic_code(PanicReason::Watchdog));

        reg.trace(0x42);
        assert_eq!(reg.last_trace(), 0x42);
    }
}
