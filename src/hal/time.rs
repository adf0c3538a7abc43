use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock access for the controller and its readers. Wall time stamps hint
/// lifecycle events; kernel time pairs with the monotonic kernel counters.
pub trait TimeSource: Send + Sync {
    /// Wall-clock time since the epoch.
    fn now(&self) -> Duration;
    /// CLOCK_MONOTONIC, matching the time base of the kernel stat counters.
    fn kernel_time(&self) -> Duration;
}

pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }

    fn kernel_time(&self) -> Duration {
        let ts = rustix::time::clock_gettime(rustix::time::ClockId::Monotonic);
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }
}
