/// The closed set of power ceilings the model can select. The integer values
/// are part of the configuration wire format and must not change.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThrottleDecision {
    NoThrottle = 0,
    Throttle50 = 1,
    Throttle60 = 2,
    Throttle70 = 3,
    Throttle80 = 4,
    Throttle90 = 5,
}

pub const FIRST_THROTTLE_DECISION: u32 = ThrottleDecision::NoThrottle as u32;
pub const LAST_THROTTLE_DECISION: u32 = ThrottleDecision::Throttle90 as u32;

const HINT_NAMES_50: [&str; 3] = [
    "LOW_POWER_LITTLE_CLUSTER_50",
    "LOW_POWER_MID_CLUSTER_50",
    "LOW_POWER_CPU_50",
];
const HINT_NAMES_60: [&str; 3] = [
    "LOW_POWER_LITTLE_CLUSTER_60",
    "LOW_POWER_MID_CLUSTER_60",
    "LOW_POWER_CPU_60",
];
const HINT_NAMES_70: [&str; 3] = [
    "LOW_POWER_LITTLE_CLUSTER_70",
    "LOW_POWER_MID_CLUSTER_70",
    "LOW_POWER_CPU_70",
];
const HINT_NAMES_80: [&str; 3] = [
    "LOW_POWER_LITTLE_CLUSTER_80",
    "LOW_POWER_MID_CLUSTER_80",
    "LOW_POWER_CPU_80",
];
const HINT_NAMES_90: [&str; 3] = [
    "LOW_POWER_LITTLE_CLUSTER_90",
    "LOW_POWER_MID_CLUSTER_90",
    "LOW_POWER_CPU_90",
];

impl ThrottleDecision {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ThrottleDecision::NoThrottle),
            1 => Some(ThrottleDecision::Throttle50),
            2 => Some(ThrottleDecision::Throttle60),
            3 => Some(ThrottleDecision::Throttle70),
            4 => Some(ThrottleDecision::Throttle80),
            5 => Some(ThrottleDecision::Throttle90),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Hint names emitted to the hint manager for this decision, in emission
    /// order. `NoThrottle` maps to no hints.
    pub fn hint_names(self) -> &'static [&'static str] {
        match self {
            ThrottleDecision::NoThrottle => &[],
            ThrottleDecision::Throttle50 => &HINT_NAMES_50,
            ThrottleDecision::Throttle60 => &HINT_NAMES_60,
            ThrottleDecision::Throttle70 => &HINT_NAMES_70,
            ThrottleDecision::Throttle80 => &HINT_NAMES_80,
            ThrottleDecision::Throttle90 => &HINT_NAMES_90,
        }
    }

    /// Human-readable label for dumps. This formatter is lossy: it has no arm
    /// for `Throttle50`, which renders as "unknown".
    pub fn label(self) -> &'static str {
        match self {
            ThrottleDecision::NoThrottle => "NO_THROTTLE",
            ThrottleDecision::Throttle60 => "THROTTLE_60",
            ThrottleDecision::Throttle70 => "THROTTLE_70",
            ThrottleDecision::Throttle80 => "THROTTLE_80",
            ThrottleDecision::Throttle90 => "THROTTLE_90",
            _ => "unknown",
        }
    }
}
