use crate::daemon::types::AcpuError;
use crate::hal::filesystem::Filesystem;
use crate::resources::sys_paths::K_CPU_POLICY_DIR;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuPolicyAverageFrequency {
    pub policy_id: u32,
    pub average_frequency_hz: u64,
}

// A sane time_in_state table has tens of rows; anything bigger points at a
// kernel bug or a parse gone wrong.
const MAX_FREQUENCIES_PER_POLICY: usize = 500;

/// Delta-based reader over the cpufreq time_in_state tables, yielding the
/// time-weighted average frequency per policy since the previous read.
pub struct CpuFrequencyReader {
    filesystem: Arc<dyn Filesystem>,
    cpu_policy_ids: Vec<u32>,
    previous_cpu_policy_frequencies: BTreeMap<u32, BTreeMap<u64, Duration>>,
}

impl CpuFrequencyReader {
    pub fn new(filesystem: Arc<dyn Filesystem>) -> Self {
        Self {
            filesystem,
            cpu_policy_ids: Vec::new(),
            previous_cpu_policy_frequencies: BTreeMap::new(),
        }
    }

    pub fn init(&mut self) -> Result<(), AcpuError> {
        self.cpu_policy_ids = self.read_cpu_policy_ids()?;
        self.previous_cpu_policy_frequencies = self.read_cpu_policy_frequencies()?;
        Ok(())
    }

    /// Average frequencies since the previous call, ordered by ascending
    /// policy id.
    pub fn get_recent_cpu_policy_frequencies(
        &mut self,
    ) -> Result<Vec<CpuPolicyAverageFrequency>, AcpuError> {
        let cpu_policy_frequencies = self.read_cpu_policy_frequencies()?;
        let mut result = Vec::with_capacity(cpu_policy_frequencies.len());
        for (&policy_id, frequencies) in &cpu_policy_frequencies {
            let previous_frequencies = self
                .previous_cpu_policy_frequencies
                .get(&policy_id)
                .ok_or_else(|| {
                    log::error!("Couldn't find policy {} in previous frequencies", policy_id);
                    AcpuError::Reader(format!("policy {} missing from previous read", policy_id))
                })?;
            let mut weighted_frequencies_sum_hz: u64 = 0;
            let mut time_sum_ms: u64 = 0;
            for (&frequency_hz, &time) in frequencies {
                let previous_time = previous_frequencies.get(&frequency_hz).ok_or_else(|| {
                    log::error!(
                        "Couldn't find frequency {} in previous frequencies",
                        frequency_hz
                    );
                    AcpuError::Reader(format!(
                        "frequency {} missing from previous read",
                        frequency_hz
                    ))
                })?;
                let recent_time_ms = time.saturating_sub(*previous_time).as_millis() as u64;
                weighted_frequencies_sum_hz += frequency_hz * recent_time_ms;
                time_sum_ms += recent_time_ms;
            }
            let average_frequency_hz = if time_sum_ms != 0 {
                weighted_frequencies_sum_hz / time_sum_ms
            } else {
                0
            };
            result.push(CpuPolicyAverageFrequency {
                policy_id,
                average_frequency_hz,
            });
        }
        self.previous_cpu_policy_frequencies = cpu_policy_frequencies;
        Ok(result)
    }

    fn read_cpu_policy_frequencies(
        &self,
    ) -> Result<BTreeMap<u32, BTreeMap<u64, Duration>>, AcpuError> {
        let mut result = BTreeMap::new();
        for &cpu_policy_id in &self.cpu_policy_ids {
            let path = format!(
                "/sys/devices/system/cpu/cpufreq/policy{}/stats/time_in_state",
                cpu_policy_id
            );
            let content = self.filesystem.read_to_string(&path)?;

            let mut cpu_frequencies = BTreeMap::new();
            for line in content.lines() {
                // Time unit in time_in_state is 10s of milliseconds:
                // https://www.kernel.org/doc/Documentation/cpu-freq/cpufreq-stats.txt
                let mut fields = line.split_whitespace();
                let parsed = (
                    fields.next().and_then(|v| v.parse::<u64>().ok()),
                    fields.next().and_then(|v| v.parse::<u64>().ok()),
                );
                let (Some(frequency_hz), Some(time_10ms)) = parsed else {
                    log::error!("Failed to parse time_in_state line: {}", line);
                    return Err(AcpuError::Reader(format!(
                        "bad time_in_state line: '{}'",
                        line
                    )));
                };
                cpu_frequencies.insert(frequency_hz, Duration::from_millis(time_10ms * 10));
            }
            if cpu_frequencies.len() > MAX_FREQUENCIES_PER_POLICY {
                log::error!(
                    "Found {} frequencies for policy {}, aborting",
                    cpu_frequencies.len(),
                    cpu_policy_id
                );
                return Err(AcpuError::Reader(format!(
                    "too many frequencies for policy {}",
                    cpu_policy_id
                )));
            }
            result.insert(cpu_policy_id, cpu_frequencies);
        }
        Ok(result)
    }

    fn read_cpu_policy_ids(&self) -> Result<Vec<u32>, AcpuError> {
        let entries = self.filesystem.list_directory(K_CPU_POLICY_DIR)?;
        let mut result: Vec<u32> = entries
            .iter()
            .filter_map(|entry| entry.strip_prefix("policy"))
            .filter_map(|id| id.parse::<u32>().ok())
            .collect();
        // Sorted so get_recent_cpu_policy_frequencies always returns
        // frequencies ordered by policy id.
        result.sort_unstable();
        Ok(result)
    }

    pub fn dump_to_stream(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        writeln!(stream, "CPU frequencies from time_in_state:")?;
        for (policy_id, frequencies) in &self.previous_cpu_policy_frequencies {
            writeln!(
                stream,
                "- policy{}: {} frequencies",
                policy_id,
                frequencies.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::filesystem::FileStream;

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    struct FakeFilesystem {
        directories: HashMap<String, Vec<String>>,
        files: Mutex<HashMap<String, VecDeque<String>>>,
    }

    impl FakeFilesystem {
        fn with_policies(policies: &[&str]) -> Self {
            let mut directories = HashMap::new();
            directories.insert(
                K_CPU_POLICY_DIR.to_string(),
                policies.iter().map(|s| s.to_string()).collect(),
            );
            Self {
                directories,
                files: Mutex::new(HashMap::new()),
            }
        }

        fn queue_time_in_state(&self, policy_id: u32, content: &str) {
            let path = format!(
                "/sys/devices/system/cpu/cpufreq/policy{}/stats/time_in_state",
                policy_id
            );
            self.files
                .lock()
                .unwrap()
                .entry(path)
                .or_default()
                .push_back(content.to_string());
        }
    }

    impl Filesystem for FakeFilesystem {
        fn open_stream(&self, _path: &str) -> Result<Box<dyn FileStream>, AcpuError> {
            unimplemented!()
        }

        fn read_to_string(&self, path: &str) -> Result<String, AcpuError> {
            let mut files = self.files.lock().unwrap();
            let queue = files
                .get_mut(path)
                .ok_or_else(|| AcpuError::Reader(format!("no fake file at {}", path)))?;
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue
                    .front()
                    .cloned()
                    .ok_or_else(|| AcpuError::Reader(format!("no fake content at {}", path)))
            }
        }

        fn list_directory(&self, path: &str) -> Result<Vec<String>, AcpuError> {
            self.directories
                .get(path)
                .cloned()
                .ok_or_else(|| AcpuError::Reader(format!("no fake directory at {}", path)))
        }
    }

    #[test]
    fn discovers_and_sorts_policy_ids() {
        let filesystem = FakeFilesystem::with_policies(&["policy6", "policy0", "policy4", "boost"]);
        let reader = CpuFrequencyReader::new(Arc::new(filesystem));
        assert_eq!(reader.read_cpu_policy_ids().unwrap(), vec![0, 4, 6]);
    }

    #[test]
    fn computes_time_weighted_average() {
        let filesystem = FakeFilesystem::with_policies(&["policy0"]);
        // 300MHz for 1s then 1GHz for 3s of additional residency.
        filesystem.queue_time_in_state(0, "300000 100\n1000000 100\n");
        filesystem.queue_time_in_state(0, "300000 200\n1000000 400\n");
        let mut reader = CpuFrequencyReader::new(Arc::new(filesystem));
        reader.init().unwrap();

        let frequencies = reader.get_recent_cpu_policy_frequencies().unwrap();
        assert_eq!(
            frequencies,
            vec![CpuPolicyAverageFrequency {
                policy_id: 0,
                average_frequency_hz: (300_000 * 1000 + 1_000_000 * 3000) / 4000,
            }]
        );
    }

    #[test]
    fn zero_residency_delta_yields_zero() {
        let filesystem = FakeFilesystem::with_policies(&["policy0"]);
        filesystem.queue_time_in_state(0, "300000 100\n");
        let mut reader = CpuFrequencyReader::new(Arc::new(filesystem));
        reader.init().unwrap();

        let frequencies = reader.get_recent_cpu_policy_frequencies().unwrap();
        assert_eq!(frequencies[0].average_frequency_hz, 0);
    }

    #[test]
    fn unseen_frequency_fails() {
        let filesystem = FakeFilesystem::with_policies(&["policy0"]);
        filesystem.queue_time_in_state(0, "300000 100\n");
        filesystem.queue_time_in_state(0, "300000 200\n1000000 50\n");
        let mut reader = CpuFrequencyReader::new(Arc::new(filesystem));
        reader.init().unwrap();
        assert!(reader.get_recent_cpu_policy_frequencies().is_err());
    }

    #[test]
    fn malformed_line_fails() {
        let filesystem = FakeFilesystem::with_policies(&["policy0"]);
        filesystem.queue_time_in_state(0, "300000 garbage\n");
        let mut reader = CpuFrequencyReader::new(Arc::new(filesystem));
        assert!(reader.init().is_err());
    }
}
