//! This file is part of Adaptive-CPU.
//! Licensed under the GNU GPL v3 or later.

pub mod algorithms;
pub mod config;
pub mod daemon;
pub mod hal;
pub mod monitors;
pub mod resources;

pub use algorithms::throttle::ThrottleDecision;
pub use config::tunables::AdaptiveCpuConfig;
pub use daemon::controller::AdaptiveCpu;
pub use daemon::types::AcpuError;
pub use monitors::work_durations::WorkDuration;
