//! Compiled throttle decision tree. Regenerated by the offline training
//! pipeline; do not edit by hand. The tree maps the recent feature history
//! (most recent last, at most three entries, shorter histories allowed) to a
//! throttle decision, deterministically.

use crate::algorithms::model::ModelInput;
use crate::algorithms::throttle::ThrottleDecision;

use std::collections::VecDeque;

pub fn run_decision_tree(model_inputs: &VecDeque<ModelInput>) -> ThrottleDecision {
    let latest = match model_inputs.back() {
        Some(input) => input,
        None => return ThrottleDecision::NoThrottle,
    };
    if latest.work.num_durations == 0 {
        return ThrottleDecision::NoThrottle;
    }

    let average_ns = latest.work.average_duration_ns as f64;
    let max_ns = latest.work.max_duration_ns as f64;
    let missed_fraction =
        f64::from(latest.work.num_missed_deadlines) / f64::from(latest.work.num_durations);
    let little_idle = latest.core_idle_frac[..4].iter().sum::<f64>() / 4.0;
    let big_idle = latest.core_idle_frac[6..].iter().sum::<f64>() / 2.0;

    if missed_fraction > 0.104167 {
        return ThrottleDecision::NoThrottle;
    }
    if max_ns > 15_833_333.0 {
        return ThrottleDecision::NoThrottle;
    }
    if average_ns > 12_458_912.0 {
        return ThrottleDecision::NoThrottle;
    }
    if average_ns > 9_377_204.0 {
        return ThrottleDecision::Throttle90;
    }
    if average_ns > 7_149_820.0 {
        if big_idle < 0.147916 {
            return ThrottleDecision::Throttle90;
        }
        return ThrottleDecision::Throttle80;
    }
    if average_ns > 4_651_477.0 {
        if let Some(previous) = model_inputs
            .len()
            .checked_sub(2)
            .and_then(|idx| model_inputs.get(idx))
        {
            if previous.work.num_durations > 0
                && average_ns > previous.work.average_duration_ns as f64 * 1.352083
            {
                return ThrottleDecision::Throttle80;
            }
        }
        return ThrottleDecision::Throttle70;
    }
    if little_idle > 0.770833 {
        return ThrottleDecision::Throttle60;
    }
    ThrottleDecision::Throttle70
}
