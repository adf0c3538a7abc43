use crate::algorithms::decision_tree::run_decision_tree;
use crate::algorithms::throttle::ThrottleDecision;
use crate::config::topology::{NUM_CPU_CORES, NUM_CPU_POLICIES};
use crate::config::tunables::AdaptiveCpuConfig;
use crate::daemon::types::AcpuError;
use crate::hal::properties::PropertyStore;
use crate::monitors::cpu_frequency::CpuPolicyAverageFrequency;
use crate::monitors::work_durations::WorkDurationFeatures;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

const K_DEVICE_PROPERTY: &str = "ro.product.device";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Raven,
    Oriole,
    Unknown,
}

pub fn read_device(properties: &dyn PropertyStore) -> Device {
    let device_property = properties.get(K_DEVICE_PROPERTY).unwrap_or_default();
    let device = match device_property.as_str() {
        "raven" => Device::Raven,
        "oriole" => Device::Oriole,
        _ => {
            log::warn!(
                "Failed to parse device property, setting to UNKNOWN: {}",
                device_property
            );
            Device::Unknown
        }
    };
    log::debug!(
        "Parsed device: device_property={}, device={:?}",
        device_property,
        device
    );
    device
}

/// One control step's feature vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInput {
    /// Average frequency per policy, ascending policy id.
    pub policy_avg_hz: [f64; NUM_CPU_POLICIES],
    /// Idle fraction per core. May slightly exceed 1.0 with the primary
    /// reader.
    pub core_idle_frac: [f64; NUM_CPU_CORES],
    pub work: WorkDurationFeatures,
    pub previous_decision: ThrottleDecision,
    pub device: Device,
}

impl ModelInput {
    /// Fills the frequency features from a reader result. The list must hold
    /// exactly one entry per policy, strictly increasing by policy id.
    pub fn set_cpu_frequencies(
        &mut self,
        frequencies: &[CpuPolicyAverageFrequency],
    ) -> Result<(), AcpuError> {
        if frequencies.len() != NUM_CPU_POLICIES {
            log::error!(
                "Received incorrect amount of CPU policy frequencies, expected {}, received {}",
                NUM_CPU_POLICIES,
                frequencies.len()
            );
            return Err(AcpuError::InvalidInput(format!(
                "expected {} policy frequencies, got {}",
                NUM_CPU_POLICIES,
                frequencies.len()
            )));
        }
        let mut previous_policy_id: i64 = -1;
        for (i, frequency) in frequencies.iter().enumerate() {
            if previous_policy_id >= i64::from(frequency.policy_id) {
                log::error!(
                    "CPU frequencies weren't sorted by policy ID, found {} {}",
                    previous_policy_id,
                    frequency.policy_id
                );
                return Err(AcpuError::InvalidInput(
                    "policy frequencies not sorted by policy id".to_string(),
                ));
            }
            previous_policy_id = i64::from(frequency.policy_id);
            self.policy_avg_hz[i] = frequency.average_frequency_hz as f64;
        }
        Ok(())
    }
}

/// Decision function over the recent feature history. Either explores (a
/// uniform draw over the configured options) or delegates to the compiled
/// decision tree.
pub struct Model {
    rng: StdRng,
}

impl Model {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for replaying decisions.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn run(
        &mut self,
        model_inputs: &VecDeque<ModelInput>,
        config: &AdaptiveCpuConfig,
    ) -> ThrottleDecision {
        if config.random_throttle_decision_probability > 0.0
            && self.rng.gen::<f64>() < config.random_throttle_decision_probability
        {
            let option = self.rng.gen_range(0..config.random_throttle_options.len());
            let throttle_decision = config.random_throttle_options[option];
            log::debug!(
                "Randomly overrode throttle decision: {}",
                throttle_decision.as_u32()
            );
            return throttle_decision;
        }
        run_decision_tree(model_inputs)
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn zero_input() -> ModelInput {
        ModelInput {
            policy_avg_hz: [0.0; NUM_CPU_POLICIES],
            core_idle_frac: [0.0; NUM_CPU_CORES],
            work: WorkDurationFeatures::default(),
            previous_decision: ThrottleDecision::NoThrottle,
            device: Device::Unknown,
        }
    }

    fn frequency(policy_id: u32, average_frequency_hz: u64) -> CpuPolicyAverageFrequency {
        CpuPolicyAverageFrequency {
            policy_id,
            average_frequency_hz,
        }
    }

    struct FakeProperties(HashMap<String, String>);

    impl PropertyStore for FakeProperties {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn set_cpu_frequencies_accepts_sorted_policies() {
        let mut input = zero_input();
        input
            .set_cpu_frequencies(&[frequency(0, 100), frequency(4, 200), frequency(6, 300)])
            .unwrap();
        assert_eq!(input.policy_avg_hz, [100.0, 200.0, 300.0]);
    }

    #[test]
    fn set_cpu_frequencies_rejects_unsorted_policies() {
        let mut input = zero_input();
        assert!(input
            .set_cpu_frequencies(&[frequency(4, 100), frequency(0, 200), frequency(6, 300)])
            .is_err());
    }

    #[test]
    fn set_cpu_frequencies_rejects_duplicate_policies() {
        let mut input = zero_input();
        assert!(input
            .set_cpu_frequencies(&[frequency(0, 100), frequency(0, 200), frequency(6, 300)])
            .is_err());
    }

    #[test]
    fn set_cpu_frequencies_rejects_wrong_count() {
        let mut input = zero_input();
        assert!(input
            .set_cpu_frequencies(&[frequency(0, 100), frequency(4, 200)])
            .is_err());
    }

    #[test]
    fn random_override_draws_from_configured_options() {
        let config = AdaptiveCpuConfig {
            random_throttle_decision_probability: 1.0,
            random_throttle_options: vec![ThrottleDecision::Throttle80],
            ..AdaptiveCpuConfig::default()
        };
        let mut model = Model::with_seed(42);
        let history = VecDeque::from([zero_input()]);
        for _ in 0..16 {
            assert_eq!(model.run(&history, &config), ThrottleDecision::Throttle80);
        }
    }

    #[test]
    fn zero_probability_always_runs_the_tree() {
        let config = AdaptiveCpuConfig::default();
        let mut model = Model::with_seed(7);
        let tree_decision = run_decision_tree(&VecDeque::from([zero_input()]));
        for _ in 0..16 {
            assert_eq!(
                model.run(&VecDeque::from([zero_input()]), &config),
                tree_decision
            );
        }
    }

    #[test]
    fn seeded_models_agree() {
        let config = AdaptiveCpuConfig {
            random_throttle_decision_probability: 0.5,
            ..AdaptiveCpuConfig::default()
        };
        let history = VecDeque::from([zero_input()]);
        let mut a = Model::with_seed(1234);
        let mut b = Model::with_seed(1234);
        for _ in 0..64 {
            assert_eq!(a.run(&history, &config), b.run(&history, &config));
        }
    }

    #[test]
    fn reads_device_from_property() {
        let raven = FakeProperties(
            [("ro.product.device".to_string(), "raven".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(read_device(&raven), Device::Raven);

        let oriole = FakeProperties(
            [("ro.product.device".to_string(), "oriole".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(read_device(&oriole), Device::Oriole);

        let other = FakeProperties(HashMap::new());
        assert_eq!(read_device(&other), Device::Unknown);
    }
}
