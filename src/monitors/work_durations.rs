use crate::daemon::types::AcpuError;

use std::sync::Mutex;

/// The standard target duration, based on 60 FPS. Durations submitted with
/// different targets are normalised against this target, so a duration at 80%
/// of its own budget scales to 0.8 * NORMAL_TARGET_DURATION_NS.
pub const NORMAL_TARGET_DURATION_NS: i64 = 16_666_666;

// Durations outside (0, MAX_DURATION_NS] are ignored.
const MAX_DURATION_NS: i64 = 600 * NORMAL_TARGET_DURATION_NS;

// If the processing thread stops draining while producers keep reporting,
// stop accepting batches rather than growing without bound.
const MAX_UNPROCESSED_BATCHES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkDuration {
    pub timestamp_ns: i64,
    pub duration_ns: i64,
}

struct WorkDurationBatch {
    durations: Vec<WorkDuration>,
    target_duration_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkDurationFeatures {
    pub average_duration_ns: i64,
    pub max_duration_ns: i64,
    pub num_missed_deadlines: u32,
    pub num_durations: u32,
}

/// Mailbox between the reporting endpoint and the control loop. Producers
/// append batches; the worker swaps the whole list out and reduces it.
#[derive(Default)]
pub struct WorkDurationProcessor {
    // Batches reported since get_features() last ran, least recent first.
    batches: Mutex<Vec<WorkDurationBatch>>,
}

impl WorkDurationProcessor {
    pub fn report_work_durations(
        &self,
        durations: Vec<WorkDuration>,
        target_duration_ns: i64,
    ) -> Result<(), AcpuError> {
        log::debug!(
            "Received {} work durations with target {}ns",
            durations.len(),
            target_duration_ns
        );
        let mut batches = self.batches.lock().unwrap();
        if batches.len() >= MAX_UNPROCESSED_BATCHES {
            log::error!("Adaptive CPU isn't processing work durations fast enough");
            batches.clear();
            return Err(AcpuError::QueueOverflow);
        }
        batches.push(WorkDurationBatch {
            durations,
            target_duration_ns,
        });
        Ok(())
    }

    pub fn get_features(&self) -> WorkDurationFeatures {
        let batches = std::mem::take(&mut *self.batches.lock().unwrap());

        let mut durations_sum_ns: i64 = 0;
        let mut max_duration_ns: i64 = 0;
        let mut num_missed_deadlines: u32 = 0;
        let mut num_durations: u32 = 0;
        for batch in &batches {
            if batch.target_duration_ns <= 0 {
                log::warn!(
                    "Dropping work duration batch with non-positive target: {}ns",
                    batch.target_duration_ns
                );
                continue;
            }
            for work_duration in &batch.durations {
                let duration_ns = work_duration.duration_ns;
                if duration_ns <= 0 || duration_ns > MAX_DURATION_NS {
                    continue;
                }

                // MAX_DURATION_NS * NORMAL_TARGET_DURATION_NS fits comfortably
                // within i64.
                let duration_normalized_ns =
                    duration_ns * NORMAL_TARGET_DURATION_NS / batch.target_duration_ns;
                durations_sum_ns += duration_normalized_ns;
                max_duration_ns = max_duration_ns.max(duration_normalized_ns);
                if duration_ns > batch.target_duration_ns {
                    num_missed_deadlines += 1;
                }
                num_durations += 1;
            }
        }

        if num_durations == 0 {
            return WorkDurationFeatures::default();
        }
        WorkDurationFeatures {
            average_duration_ns: durations_sum_ns / i64::from(num_durations),
            max_duration_ns,
            num_missed_deadlines,
            num_durations,
        }
    }

    /// True if report_work_durations has been called since get_features last
    /// ran.
    pub fn has_work_durations(&self) -> bool {
        !self.batches.lock().unwrap().is_empty()
    }
}
