use crate::algorithms::throttle::{
    ThrottleDecision, FIRST_THROTTLE_DECISION, LAST_THROTTLE_DECISION,
};
use crate::daemon::types::AcpuError;
use crate::hal::properties::PropertyStore;

use std::fmt;
use std::time::Duration;

const K_ITERATION_SLEEP_DURATION_PROPERTY: &str = "debug.adaptivecpu.iteration_sleep_duration_ms";
const K_HINT_TIMEOUT_PROPERTY: &str = "debug.adaptivecpu.hint_timeout_ms";
// "percent" as the property range is 0-100, while in-memory it is a
// probability in 0-1.
const K_RANDOM_THROTTLE_DECISION_PERCENT_PROPERTY: &str =
    "debug.adaptivecpu.random_throttle_decision_percent";
const K_RANDOM_THROTTLE_OPTIONS_PROPERTY: &str = "debug.adaptivecpu.random_throttle_options";
const K_ENABLED_HINT_TIMEOUT_PROPERTY: &str = "debug.adaptivecpu.enabled_hint_timeout_ms";

const ITERATION_SLEEP_DURATION_MIN: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveCpuConfig {
    pub iteration_sleep: Duration,
    pub hint_timeout: Duration,
    pub random_throttle_decision_probability: f64,
    pub random_throttle_options: Vec<ThrottleDecision>,
    pub enabled_hint_timeout: Duration,
}

impl Default for AdaptiveCpuConfig {
    fn default() -> Self {
        Self {
            // The model is typically trained against a 25ms cadence; 1s is a
            // conservative fallback when the property is unset.
            iteration_sleep: Duration::from_millis(1000),
            hint_timeout: Duration::from_millis(2000),
            random_throttle_decision_probability: 0.0,
            random_throttle_options: vec![
                ThrottleDecision::NoThrottle,
                ThrottleDecision::Throttle50,
                ThrottleDecision::Throttle60,
                ThrottleDecision::Throttle70,
                ThrottleDecision::Throttle80,
                ThrottleDecision::Throttle90,
            ],
            enabled_hint_timeout: Duration::from_secs(120 * 60),
        }
    }
}

impl AdaptiveCpuConfig {
    pub fn read_from_properties(
        properties: &dyn PropertyStore,
    ) -> Result<AdaptiveCpuConfig, AcpuError> {
        let default = AdaptiveCpuConfig::default();

        let iteration_sleep = Duration::from_millis(u64::from(read_u32_property(
            properties,
            K_ITERATION_SLEEP_DURATION_PROPERTY,
            default.iteration_sleep.as_millis() as u32,
        )))
        .max(ITERATION_SLEEP_DURATION_MIN);

        let hint_timeout = Duration::from_millis(u64::from(read_u32_property(
            properties,
            K_HINT_TIMEOUT_PROPERTY,
            default.hint_timeout.as_millis() as u32,
        )));

        let random_throttle_decision_percent = read_u32_property(
            properties,
            K_RANDOM_THROTTLE_DECISION_PERCENT_PROPERTY,
            (default.random_throttle_decision_probability * 100.0) as u32,
        );
        let random_throttle_decision_probability =
            f64::from(random_throttle_decision_percent) / 100.0;
        if random_throttle_decision_probability > 1.0 {
            log::error!(
                "Received bad value for {}: {}",
                K_RANDOM_THROTTLE_DECISION_PERCENT_PROPERTY,
                random_throttle_decision_percent
            );
            return Err(AcpuError::Config(format!(
                "{} out of range: {}",
                K_RANDOM_THROTTLE_DECISION_PERCENT_PROPERTY, random_throttle_decision_percent
            )));
        }

        let random_throttle_options_str = properties
            .get(K_RANDOM_THROTTLE_OPTIONS_PROPERTY)
            .unwrap_or_else(|| format_throttle_decisions(&default.random_throttle_options));
        let random_throttle_options = parse_throttle_decisions(&random_throttle_options_str)?;

        let enabled_hint_timeout = Duration::from_millis(u64::from(read_u32_property(
            properties,
            K_ENABLED_HINT_TIMEOUT_PROPERTY,
            default.enabled_hint_timeout.as_millis() as u32,
        )));

        Ok(AdaptiveCpuConfig {
            iteration_sleep,
            hint_timeout,
            random_throttle_decision_probability,
            random_throttle_options,
            enabled_hint_timeout,
        })
    }
}

impl fmt::Display for AdaptiveCpuConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AdaptiveCpuConfig(iteration_sleep={}ms, hint_timeout={}ms, \
             random_throttle_decision_probability={}, random_throttle_options=[{}], \
             enabled_hint_timeout={}ms)",
            self.iteration_sleep.as_millis(),
            self.hint_timeout.as_millis(),
            self.random_throttle_decision_probability,
            format_throttle_decisions(&self.random_throttle_options),
            self.enabled_hint_timeout.as_millis()
        )
    }
}

/// Reads a property as a count of milliseconds (or a bare unsigned integer).
/// Absent, negative or non-numeric values fall back to the default.
fn read_u32_property(properties: &dyn PropertyStore, key: &str, default: u32) -> u32 {
    match properties.get(key) {
        Some(value) => value.parse::<u32>().unwrap_or(default),
        None => default,
    }
}

/// Strict parse of a comma-separated decimal list. Any malformed element,
/// out-of-range value or empty result fails the whole load.
fn parse_throttle_decisions(input: &str) -> Result<Vec<ThrottleDecision>, AcpuError> {
    let mut output = Vec::new();
    for element in input.split(',') {
        let raw: u32 = element.parse().map_err(|_| {
            log::error!("Failed to parse as int: str={}, input={}", element, input);
            AcpuError::Config(format!("bad throttle decision element: '{}'", element))
        })?;
        if !(FIRST_THROTTLE_DECISION..=LAST_THROTTLE_DECISION).contains(&raw) {
            log::error!(
                "Failed to parse throttle decision: throttleDecision={}, input={}",
                raw,
                input
            );
            return Err(AcpuError::Config(format!(
                "throttle decision out of range: {}",
                raw
            )));
        }
        // Range checked above, so the conversion is total.
        if let Some(decision) = ThrottleDecision::from_u32(raw) {
            output.push(decision);
        }
    }
    if output.is_empty() {
        log::error!(
            "Failed to find any throttle decisions, must have at least one: {}",
            input
        );
        return Err(AcpuError::Config("empty throttle decision list".to_string()));
    }
    Ok(output)
}

fn format_throttle_decisions(throttle_decisions: &[ThrottleDecision]) -> String {
    throttle_decisions
        .iter()
        .map(|decision| decision.as_u32().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    struct FakeProperties {
        values: HashMap<String, String>,
    }

    impl FakeProperties {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                values: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl PropertyStore for FakeProperties {
        fn get(&self, key: &str) -> Option<String> {
            self.values.get(key).cloned()
        }
    }

    #[test]
    fn valid_load() {
        let properties = FakeProperties::new(&[
            ("debug.adaptivecpu.iteration_sleep_duration_ms", "25"),
            ("debug.adaptivecpu.hint_timeout_ms", "500"),
            ("debug.adaptivecpu.random_throttle_decision_percent", "25"),
            ("debug.adaptivecpu.random_throttle_options", "0,3,4"),
            ("debug.adaptivecpu.enabled_hint_timeout_ms", "1000"),
        ]);
        let config = AdaptiveCpuConfig::read_from_properties(&properties).unwrap();
        assert_eq!(config.iteration_sleep, Duration::from_millis(25));
        assert_eq!(config.hint_timeout, Duration::from_millis(500));
        assert_eq!(config.random_throttle_decision_probability, 0.25);
        assert_eq!(
            config.random_throttle_options,
            vec![
                ThrottleDecision::NoThrottle,
                ThrottleDecision::Throttle70,
                ThrottleDecision::Throttle80,
            ]
        );
        assert_eq!(config.enabled_hint_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn absent_properties_yield_defaults() {
        let properties = FakeProperties::new(&[]);
        let config = AdaptiveCpuConfig::read_from_properties(&properties).unwrap();
        assert_eq!(config, AdaptiveCpuConfig::default());
    }

    #[test]
    fn iteration_sleep_clamped_to_floor() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.iteration_sleep_duration_ms", "2")]);
        let config = AdaptiveCpuConfig::read_from_properties(&properties).unwrap();
        assert_eq!(config.iteration_sleep, Duration::from_millis(20));
    }

    #[test]
    fn negative_iteration_sleep_uses_default() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.iteration_sleep_duration_ms", "-100")]);
        let config = AdaptiveCpuConfig::read_from_properties(&properties).unwrap();
        assert_eq!(config.iteration_sleep, Duration::from_millis(1000));
    }

    #[test]
    fn options_with_whitespace_fail() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.random_throttle_options", "0,1 ,2,3")]);
        assert!(AdaptiveCpuConfig::read_from_properties(&properties).is_err());
    }

    #[test]
    fn options_out_of_range_fail() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.random_throttle_options", "0,1,2,9")]);
        assert!(AdaptiveCpuConfig::read_from_properties(&properties).is_err());
    }

    #[test]
    fn empty_options_fail() {
        let properties = FakeProperties::new(&[("debug.adaptivecpu.random_throttle_options", "")]);
        assert!(AdaptiveCpuConfig::read_from_properties(&properties).is_err());
    }

    #[test]
    fn trailing_comma_fails() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.random_throttle_options", "0,2,")]);
        assert!(AdaptiveCpuConfig::read_from_properties(&properties).is_err());
    }

    #[test]
    fn percent_above_100_fails() {
        let properties =
            FakeProperties::new(&[("debug.adaptivecpu.random_throttle_decision_percent", "101")]);
        assert!(AdaptiveCpuConfig::read_from_properties(&properties).is_err());
    }

    #[test]
    fn display_round_trips_the_integer_set() {
        let config = AdaptiveCpuConfig::default();
        let repr = config.to_string();
        assert!(repr.contains("random_throttle_options=[0,1,2,3,4,5]"));
        assert!(repr.contains("iteration_sleep=1000ms"));
    }
}
