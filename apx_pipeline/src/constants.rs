//! Platform constants.
//!
//! Per-platform tuning lives here so ports override one module instead of
//! hunting magic numbers through the runtime.

/// Default LL scheduling period in microseconds.
pub const DEFAULT_PERIOD_US: u64 = 1_000;

/// Drain timeout for host-side DMA on a stop trigger.
pub const HOST_DMA_TIMEOUT_US: u64 = 50_000;

/// Drain timeout for link (DAI) DMA on a stop trigger.
pub const DAI_DMA_TIMEOUT_US: u64 = 1_333;

/// Consecutive starved DAI ticks tolerated before an xrun is raised.
pub const DAI_STARVATION_TICKS: u32 = 2;

/// Window (in ticks) within which a second xrun is reported to the host
/// instead of silently recovered.
pub const XRUN_WINDOW_TICKS: u64 = 16;

/// Consecutive zero-progress ticks an ACTIVE pipeline may spend before
/// the stall is treated as a missed deadline.
pub const STALL_TICKS_BEFORE_XRUN: u32 = 2;

/// Most attachments a single component may carry per direction.
pub const MAX_ATTACHMENTS: usize = 8;

/// Default number of DP worker threads.
pub const DP_WORKERS: usize = 2;
