use crate::config::topology::{CPU_POLICY_INDICES, NUM_CPU_CORES, NUM_CPU_POLICIES};
use crate::daemon::types::AcpuError;
use crate::hal::filesystem::{FileStream, Filesystem};
use crate::hal::time::TimeSource;
use crate::resources::sys_paths::K_ACPU_STATS_PATH;

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

/// Per-core record exposed by the kernel, in native layout: two u64 fields,
/// host byte order, 16 bytes per core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcpuStats {
    pub weighted_sum_freq: u64,
    pub total_idle_time_ns: u64,
}

const STATS_RECORD_SIZE: usize = 16;
const READ_BUFFER_SIZE: usize = STATS_RECORD_SIZE * NUM_CPU_CORES;

/// Delta-based reader over the packed kernel stats file. The file handle is
/// opened once at init and rewound on every read.
pub struct KernelCpuFeatureReader {
    filesystem: Arc<dyn Filesystem>,
    time_source: Arc<dyn TimeSource>,
    stats_file: Option<Box<dyn FileStream>>,
    previous_stats: [AcpuStats; NUM_CPU_CORES],
    previous_read_time: Duration,
}

impl KernelCpuFeatureReader {
    pub fn new(filesystem: Arc<dyn Filesystem>, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            filesystem,
            time_source,
            stats_file: None,
            previous_stats: [AcpuStats::default(); NUM_CPU_CORES],
            previous_read_time: Duration::ZERO,
        }
    }

    /// Opens the stats file and captures the baseline counters.
    pub fn init(&mut self) -> Result<(), AcpuError> {
        self.stats_file = Some(self.filesystem.open_stream(K_ACPU_STATS_PATH)?);
        let (stats, read_time) = self.read_stats()?;
        self.previous_stats = stats;
        self.previous_read_time = read_time;
        Ok(())
    }

    /// Average frequency per policy and idle fraction per core, computed from
    /// the counter deltas since the previous read.
    pub fn get_recent_cpu_features(
        &mut self,
    ) -> Result<([f64; NUM_CPU_POLICIES], [f64; NUM_CPU_CORES]), AcpuError> {
        let (stats, read_time) = self.read_stats()?;
        let time_delta_ns = read_time
            .saturating_sub(self.previous_read_time)
            .as_nanos() as f64;

        let mut policy_avg_hz = [0.0; NUM_CPU_POLICIES];
        for (policy, &stats_idx) in CPU_POLICY_INDICES.iter().enumerate() {
            // Frequency data is equivalent for all cores in a policy, so only
            // the first core of each policy is read.
            if stats[stats_idx].weighted_sum_freq < self.previous_stats[stats_idx].weighted_sum_freq
            {
                log::warn!(
                    "New weighted_sum_freq is less than old: new={}, old={}",
                    stats[stats_idx].weighted_sum_freq,
                    self.previous_stats[stats_idx].weighted_sum_freq
                );
                self.previous_stats[stats_idx].weighted_sum_freq =
                    stats[stats_idx].weighted_sum_freq;
            }
            policy_avg_hz[policy] = (stats[stats_idx].weighted_sum_freq
                - self.previous_stats[stats_idx].weighted_sum_freq)
                as f64
                / time_delta_ns;
        }

        let mut core_idle_frac = [0.0; NUM_CPU_CORES];
        for core in 0..NUM_CPU_CORES {
            if stats[core].total_idle_time_ns < self.previous_stats[core].total_idle_time_ns {
                log::warn!(
                    "New total_idle_time_ns is less than old: new={}, old={}",
                    stats[core].total_idle_time_ns,
                    self.previous_stats[core].total_idle_time_ns
                );
                self.previous_stats[core].total_idle_time_ns = stats[core].total_idle_time_ns;
            }
            core_idle_frac[core] = (stats[core].total_idle_time_ns
                - self.previous_stats[core].total_idle_time_ns)
                as f64
                / time_delta_ns;
        }

        self.previous_stats = stats;
        self.previous_read_time = read_time;
        Ok((policy_avg_hz, core_idle_frac))
    }

    fn read_stats(&mut self) -> Result<([AcpuStats; NUM_CPU_CORES], Duration), AcpuError> {
        let read_time = self.time_source.kernel_time();
        let file = self
            .stats_file
            .as_mut()
            .ok_or_else(|| AcpuError::Init("stats file not open".to_string()))?;
        file.seek(SeekFrom::Start(0)).map_err(AcpuError::Io)?;

        let mut buffer = [0u8; READ_BUFFER_SIZE];
        file.read_exact(&mut buffer).map_err(|e| {
            log::error!("Failed to read stats file: {}", e);
            AcpuError::Reader(format!("short read of {}: {}", K_ACPU_STATS_PATH, e))
        })?;

        let mut stats = [AcpuStats::default(); NUM_CPU_CORES];
        for (core, record) in buffer.chunks_exact(STATS_RECORD_SIZE).enumerate() {
            stats[core] = AcpuStats {
                weighted_sum_freq: u64::from_ne_bytes(record[..8].try_into().unwrap()),
                total_idle_time_ns: u64::from_ne_bytes(record[8..].try_into().unwrap()),
            };
        }
        Ok((stats, read_time))
    }

    pub fn dump_to_stream(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        writeln!(stream, "CPU features from acpu_stats:")?;
        for (core, stats) in self.previous_stats.iter().enumerate() {
            writeln!(
                stream,
                "- CPU {}: weighted_sum_freq={}, total_idle_time_ns={}",
                core, stats.weighted_sum_freq, stats.total_idle_time_ns
            )?;
        }
        writeln!(
            stream,
            "- Last read time: {}ns",
            self.previous_read_time.as_nanos()
        )
    }
}
