use crate::algorithms::throttle::ThrottleDecision;
use crate::config::tunables::AdaptiveCpuConfig;
use crate::hal::time::TimeSource;
use crate::monitors::work_durations::WorkDurationFeatures;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Diagnostic counters for the control loop, rendered into bug report dumps.
pub struct AdaptiveCpuStats {
    time_source: Arc<dyn TimeSource>,
    num_started_runs: u64,
    num_successful_runs: u64,
    num_throttles: BTreeMap<ThrottleDecision, u64>,
    throttle_durations: BTreeMap<ThrottleDecision, Duration>,
    num_durations: BTreeMap<ThrottleDecision, u64>,
    num_missed_deadlines: BTreeMap<ThrottleDecision, u64>,
    total_run_duration: Duration,
    start_time: Option<Duration>,
    last_run_start_time: Duration,
    last_run_success_time: Option<Duration>,
}

impl AdaptiveCpuStats {
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            time_source,
            num_started_runs: 0,
            num_successful_runs: 0,
            num_throttles: BTreeMap::new(),
            throttle_durations: BTreeMap::new(),
            num_durations: BTreeMap::new(),
            num_missed_deadlines: BTreeMap::new(),
            total_run_duration: Duration::ZERO,
            start_time: None,
            last_run_start_time: Duration::ZERO,
            last_run_success_time: None,
        }
    }

    pub fn register_start_run(&mut self) {
        self.num_started_runs += 1;
        self.last_run_start_time = self.time_source.now();
        if self.start_time.is_none() {
            self.start_time = Some(self.last_run_start_time);
        }
    }

    pub fn register_successful_run(
        &mut self,
        previous_decision: ThrottleDecision,
        decision: ThrottleDecision,
        work: WorkDurationFeatures,
        config: &AdaptiveCpuConfig,
    ) {
        self.num_successful_runs += 1;
        *self.num_throttles.entry(decision).or_default() += 1;
        let run_success_time = self.time_source.now();
        self.total_run_duration += run_success_time.saturating_sub(self.last_run_start_time);
        // previous_decision attribution is skipped until a prior successful
        // run exists to anchor it.
        if let Some(last_success_time) = self.last_run_success_time {
            // The cap keeps long idle gaps (worker blocked with no incoming
            // durations) from being attributed to the previous decision.
            *self.throttle_durations.entry(previous_decision).or_default() += run_success_time
                .saturating_sub(last_success_time)
                .min(config.hint_timeout);
            *self.num_durations.entry(previous_decision).or_default() +=
                u64::from(work.num_durations);
            *self.num_missed_deadlines.entry(previous_decision).or_default() +=
                u64::from(work.num_missed_deadlines);
        }
        self.last_run_success_time = Some(run_success_time);
    }

    pub fn dump_to_stream(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        writeln!(stream, "Stats:")?;
        writeln!(
            stream,
            "- Successful runs / total runs: {} / {}",
            self.num_successful_runs, self.num_started_runs
        )?;
        writeln!(
            stream,
            "- Total run duration: {}",
            format_duration(self.total_run_duration)
        )?;
        if self.num_successful_runs > 0 {
            let average_run_ns =
                self.total_run_duration.as_nanos() as u64 / self.num_successful_runs;
            writeln!(
                stream,
                "- Average run duration: {}",
                format_duration(Duration::from_nanos(average_run_ns))
            )?;
            let elapsed = self
                .time_source
                .now()
                .saturating_sub(self.start_time.unwrap_or_default());
            writeln!(
                stream,
                "- Running time fraction: {}",
                self.total_run_duration.as_nanos() as f64 / elapsed.as_nanos() as f64
            )?;
        }

        writeln!(stream, "- Number of throttles:")?;
        let mut total_num_throttles: u64 = 0;
        for (decision, num_throttles) in &self.num_throttles {
            writeln!(stream, "  - {}: {}", decision.label(), num_throttles)?;
            total_num_throttles += num_throttles;
        }
        writeln!(stream, "  - Total: {}", total_num_throttles)?;

        writeln!(stream, "- Time spent throttling:")?;
        let mut total_throttle_duration = Duration::ZERO;
        for (decision, throttle_duration) in &self.throttle_durations {
            writeln!(
                stream,
                "  - {}: {}",
                decision.label(),
                format_duration(*throttle_duration)
            )?;
            total_throttle_duration += *throttle_duration;
        }
        writeln!(
            stream,
            "  - Total: {}",
            format_duration(total_throttle_duration)
        )?;

        writeln!(stream, "- Missed deadlines per throttle:")?;
        let mut total_num_durations: u64 = 0;
        let mut total_num_missed_deadlines: u64 = 0;
        for (decision, num_durations) in &self.num_durations {
            let num_missed_deadlines = self
                .num_missed_deadlines
                .get(decision)
                .copied()
                .unwrap_or_default();
            writeln!(
                stream,
                "  - {}: {} / {} ({})",
                decision.label(),
                num_missed_deadlines,
                num_durations,
                num_missed_deadlines as f64 / *num_durations as f64
            )?;
            total_num_durations += num_durations;
            total_num_missed_deadlines += num_missed_deadlines;
        }
        writeln!(
            stream,
            "  - Total: {} / {} ({})",
            total_num_missed_deadlines,
            total_num_durations,
            total_num_missed_deadlines as f64 / total_num_durations as f64
        )
    }
}

/// Autoscaling pretty-printer. The ms band intentionally hands off to seconds
/// at 100ms.
fn format_duration(duration: Duration) -> String {
    let mut count = duration.as_nanos() as f64;
    let suffix;
    if count < 1e3 {
        suffix = "ns";
    } else if count < 1e6 {
        suffix = "us";
        count /= 1e3;
    } else if count < 1e8 {
        suffix = "ms";
        count /= 1e6;
    } else {
        suffix = "s";
        count /= 1e9;
    }
    format!("{:.6}{}", count, suffix)
}
