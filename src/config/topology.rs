//! CPU topology of the supported devices. Adaptive CPU currently targets
//! raven/oriole only, so the core and policy layout is fixed.

pub const NUM_CPU_CORES: usize = 8;
pub const NUM_CPU_POLICIES: usize = 3;

/// First core of each frequency policy, in ascending policy order. All cores
/// within a policy report equivalent frequency data.
pub const CPU_POLICY_INDICES: [usize; NUM_CPU_POLICIES] = [0, 4, 6];
