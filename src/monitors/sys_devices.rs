use crate::config::topology::NUM_CPU_CORES;
use crate::daemon::types::AcpuError;
use crate::hal::filesystem::Filesystem;
use crate::hal::time::TimeSource;
use crate::resources::sys_paths::K_CPU_IDLE_DIR;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTime {
    idle_time: Duration,
    total_time: Duration,
}

/// Alternative CPU load reader summing the per-state idle counters under
/// /sys/devices/system/cpu/cpuN/cpuidle. Idle time comes from the kernel;
/// total time comes from the monotonic clock.
pub struct CpuLoadReaderSysDevices {
    filesystem: Arc<dyn Filesystem>,
    time_source: Arc<dyn TimeSource>,
    idle_state_names: Vec<String>,
    previous_cpu_times: [CpuTime; NUM_CPU_CORES],
}

impl CpuLoadReaderSysDevices {
    pub fn new(filesystem: Arc<dyn Filesystem>, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            filesystem,
            time_source,
            idle_state_names: Vec::new(),
            previous_cpu_times: [CpuTime::default(); NUM_CPU_CORES],
        }
    }

    pub fn init(&mut self) -> Result<(), AcpuError> {
        self.idle_state_names = self.read_idle_state_names()?;
        self.previous_cpu_times = self.read_cpu_times()?;
        Ok(())
    }

    pub fn get_recent_cpu_loads(
        &mut self,
        core_idle_frac: &mut [f64; NUM_CPU_CORES],
    ) -> Result<(), AcpuError> {
        let cpu_times = self.read_cpu_times()?;
        for cpu_id in 0..NUM_CPU_CORES {
            let cpu_time = cpu_times[cpu_id];
            let previous = self.previous_cpu_times[cpu_id];
            let mut recent_idle_time = cpu_time.idle_time.saturating_sub(previous.idle_time);
            let recent_total_time = cpu_time.total_time.saturating_sub(previous.total_time);
            if recent_idle_time > recent_total_time {
                // Happens occasionally: idle time is a kernel counter while
                // total time is sampled in userspace.
                recent_idle_time = recent_total_time;
            }
            core_idle_frac[cpu_id] =
                recent_idle_time.as_nanos() as f64 / recent_total_time.as_nanos() as f64;
        }
        self.previous_cpu_times = cpu_times;
        Ok(())
    }

    fn read_cpu_times(&self) -> Result<[CpuTime; NUM_CPU_CORES], AcpuError> {
        let total_time = self.time_source.kernel_time();

        let mut result = [CpuTime::default(); NUM_CPU_CORES];
        for (cpu_id, cpu_time) in result.iter_mut().enumerate() {
            let mut idle_time = Duration::ZERO;
            for idle_state_name in &self.idle_state_names {
                let path = format!(
                    "/sys/devices/system/cpu/cpu{}/cpuidle/{}/time",
                    cpu_id, idle_state_name
                );
                // Times are reported in microseconds:
                // https://www.kernel.org/doc/Documentation/cpuidle/sysfs.txt
                let idle_time_us = self.filesystem.read_to_string(&path)?;
                idle_time +=
                    Duration::from_micros(idle_time_us.trim().parse::<u64>().unwrap_or(0));
            }
            *cpu_time = CpuTime {
                idle_time,
                total_time,
            };
        }
        Ok(result)
    }

    fn read_idle_state_names(&self) -> Result<Vec<String>, AcpuError> {
        let entries = self.filesystem.list_directory(K_CPU_IDLE_DIR)?;
        if entries.is_empty() {
            log::error!("Found no idle state names");
            return Err(AcpuError::Init("empty cpuidle directory".to_string()));
        }
        let mut result = Vec::new();
        for idle_state_name in entries {
            if idle_state_name.is_empty() || idle_state_name.starts_with('.') {
                continue;
            }
            let files = self
                .filesystem
                .list_directory(&format!("{}/{}", K_CPU_IDLE_DIR, idle_state_name))?;
            if !files.iter().any(|file| file == "time") {
                continue;
            }
            result.push(idle_state_name);
        }
        Ok(result)
    }

    pub fn dump_to_stream(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        writeln!(stream, "CPU loads from /sys/devices/system/cpu/cpuN/cpuidle:")?;
        for (cpu_id, cpu_time) in self.previous_cpu_times.iter().enumerate() {
            writeln!(
                stream,
                "- CPU={}, idleTime={}us, totalTime={}us",
                cpu_id,
                cpu_time.idle_time.as_micros(),
                cpu_time.total_time.as_micros()
            )?;
        }
        Ok(())
    }
}
