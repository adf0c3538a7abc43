use crate::config::topology::NUM_CPU_CORES;
use crate::daemon::types::AcpuError;
use crate::hal::filesystem::Filesystem;
use crate::resources::sys_paths::K_PROC_STAT_PATH;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTime {
    idle_time_ms: u64,
    total_time_ms: u64,
}

/// Alternative CPU load reader parsing /proc/stat. Reopens the file on every
/// read; keeps only the previous per-CPU jiffy snapshot.
pub struct CpuLoadReaderProcStat {
    filesystem: Arc<dyn Filesystem>,
    previous_cpu_times: BTreeMap<u32, CpuTime>,
    clock_ticks_per_second: u64,
}

impl CpuLoadReaderProcStat {
    pub fn new(filesystem: Arc<dyn Filesystem>) -> Self {
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self::with_clock_ticks(filesystem, if ticks > 0 { ticks as u64 } else { 100 })
    }

    fn with_clock_ticks(filesystem: Arc<dyn Filesystem>, clock_ticks_per_second: u64) -> Self {
        Self {
            filesystem,
            previous_cpu_times: BTreeMap::new(),
            clock_ticks_per_second,
        }
    }

    pub fn init(&mut self) -> Result<(), AcpuError> {
        self.previous_cpu_times = self.read_cpu_times()?;
        Ok(())
    }

    pub fn get_recent_cpu_loads(
        &mut self,
        core_idle_frac: &mut [f64; NUM_CPU_CORES],
    ) -> Result<(), AcpuError> {
        let cpu_times = self.read_cpu_times()?;
        if cpu_times.is_empty() {
            log::error!("Failed to find any CPU times");
            return Err(AcpuError::Reader("no CPU lines in /proc/stat".to_string()));
        }
        for (&cpu_id, cpu_time) in &cpu_times {
            let previous = self.previous_cpu_times.get(&cpu_id).ok_or_else(|| {
                log::error!("Couldn't find CPU {} in previous CPU times", cpu_id);
                AcpuError::Reader(format!("CPU {} missing from previous snapshot", cpu_id))
            })?;
            let recent_idle_ms = cpu_time.idle_time_ms.saturating_sub(previous.idle_time_ms);
            let recent_total_ms = cpu_time.total_time_ms.saturating_sub(previous.total_time_ms);
            if recent_idle_ms > recent_total_ms {
                log::error!(
                    "Found more recent idle time than total time: idle={}, total={}",
                    recent_idle_ms,
                    recent_total_ms
                );
                return Err(AcpuError::Reader(
                    "idle time delta exceeds total time delta".to_string(),
                ));
            }
            if (cpu_id as usize) < NUM_CPU_CORES {
                core_idle_frac[cpu_id as usize] = recent_idle_ms as f64 / recent_total_ms as f64;
            }
        }
        self.previous_cpu_times = cpu_times;
        Ok(())
    }

    fn read_cpu_times(&self) -> Result<BTreeMap<u32, CpuTime>, AcpuError> {
        let content = self.filesystem.read_to_string(K_PROC_STAT_PATH)?;
        let mut result = BTreeMap::new();
        for line in content.lines() {
            // Only per-CPU lines carry an id directly after the label; the
            // aggregate "cpu" line does not.
            let Some(rest) = line.strip_prefix("cpu") else {
                continue;
            };
            if !rest.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            let mut fields = rest.split_whitespace();
            let Some(cpu_id) = fields.next().and_then(|id| id.parse::<u32>().ok()) else {
                continue;
            };
            // Order & values taken from `fs/proc/stat.c`.
            let mut values = [0u64; 10];
            let mut parsed = 0;
            for value in values.iter_mut() {
                match fields.next().and_then(|field| field.parse::<u64>().ok()) {
                    Some(v) => *value = v,
                    None => break,
                }
                parsed += 1;
            }
            if parsed != values.len() {
                continue;
            }
            let [user, nice, system, idle, io_wait, irq, soft_irq, steal, guest, guest_nice] =
                values;
            let idle_time_jiffies = idle + io_wait;
            let total_time_jiffies = user
                + nice
                + system
                + irq
                + soft_irq
                + steal
                + guest
                + guest_nice
                + idle_time_jiffies;
            result.insert(
                cpu_id,
                CpuTime {
                    idle_time_ms: self.jiffies_to_ms(idle_time_jiffies),
                    total_time_ms: self.jiffies_to_ms(total_time_jiffies),
                },
            );
        }
        Ok(result)
    }

    fn jiffies_to_ms(&self, jiffies: u64) -> u64 {
        jiffies * 1000 / self.clock_ticks_per_second
    }

    pub fn dump_to_stream(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        writeln!(stream, "CPU loads from /proc/stat:")?;
        for (cpu_id, cpu_time) in &self.previous_cpu_times {
            writeln!(
                stream,
                "- CPU={}, idleTime={}ms, totalTime={}ms",
                cpu_id, cpu_time.idle_time_ms, cpu_time.total_time_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::filesystem::FileStream;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeFilesystem {
        contents: Mutex<VecDeque<String>>,
    }

    impl FakeFilesystem {
        fn new(contents: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                contents: Mutex::new(contents.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    impl Filesystem for FakeFilesystem {
        fn open_stream(&self, _path: &str) -> Result<Box<dyn FileStream>, AcpuError> {
            unimplemented!()
        }

        fn read_to_string(&self, path: &str) -> Result<String, AcpuError> {
            assert_eq!(path, K_PROC_STAT_PATH);
            self.contents
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AcpuError::Reader("unexpected read".to_string()))
        }

        fn list_directory(&self, _path: &str) -> Result<Vec<String>, AcpuError> {
            unimplemented!()
        }
    }

    fn stat_line(cpu_id: u32, active: u64, idle: u64) -> String {
        // Splits active time over user/system, idle time over idle/iowait.
        format!(
            "cpu{} {} 0 {} {} {} 0 0 0 0 0\n",
            cpu_id,
            active / 2,
            active - active / 2,
            idle / 2,
            idle - idle / 2
        )
    }

    fn full_stat(active_jiffies: u64, idle_jiffies: u64) -> String {
        let mut content = String::from("cpu  99999 0 99999 99999 99999 0 0 0 0 0\n");
        for cpu_id in 0..NUM_CPU_CORES as u32 {
            content.push_str(&stat_line(cpu_id, active_jiffies, idle_jiffies));
        }
        content.push_str("intr 12345\nctxt 67890\n");
        content
    }

    fn reader_with(contents: &[&str]) -> CpuLoadReaderProcStat {
        // Fixed tick rate so jiffies convert to exact milliseconds.
        CpuLoadReaderProcStat::with_clock_ticks(FakeFilesystem::new(contents), 100)
    }

    #[test]
    fn computes_idle_fraction_from_deltas() {
        // 100 jiffies active / 100 idle at init, then +60 active / +140 idle.
        let mut reader = reader_with(&[&full_stat(100, 100), &full_stat(160, 240)]);
        reader.init().unwrap();

        let mut core_idle_frac = [0.0; NUM_CPU_CORES];
        reader.get_recent_cpu_loads(&mut core_idle_frac).unwrap();
        assert_eq!(core_idle_frac, [0.7; NUM_CPU_CORES]);
    }

    #[test]
    fn aggregate_cpu_line_is_skipped() {
        let mut reader = reader_with(&[&full_stat(100, 100)]);
        reader.init().unwrap();
        assert_eq!(reader.previous_cpu_times.len(), NUM_CPU_CORES);
    }

    #[test]
    fn missing_previous_cpu_fails() {
        let first = full_stat(100, 100).replace(&stat_line(7, 100, 100), "");
        let mut reader = reader_with(&[&first, &full_stat(160, 240)]);
        reader.init().unwrap();

        let mut core_idle_frac = [0.0; NUM_CPU_CORES];
        assert!(reader.get_recent_cpu_loads(&mut core_idle_frac).is_err());
    }

    #[test]
    fn idle_delta_exceeding_total_delta_fails() {
        // An active-counter regression makes the idle delta outrun the total.
        let mut reader = reader_with(&[&full_stat(100, 100), &full_stat(40, 300)]);
        reader.init().unwrap();

        let mut core_idle_frac = [0.0; NUM_CPU_CORES];
        assert!(reader.get_recent_cpu_loads(&mut core_idle_frac).is_err());
    }

    #[test]
    fn empty_file_fails() {
        let mut reader = reader_with(&[&full_stat(100, 100), "intr 1\n"]);
        reader.init().unwrap();

        let mut core_idle_frac = [0.0; NUM_CPU_CORES];
        assert!(reader.get_recent_cpu_loads(&mut core_idle_frac).is_err());
    }

    #[test]
    fn dump_renders_previous_snapshot() {
        let mut reader = reader_with(&[&full_stat(100, 100)]);
        reader.init().unwrap();

        let mut output = Vec::new();
        reader.dump_to_stream(&mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("CPU loads from /proc/stat:\n"));
        assert!(text.contains("- CPU=0, idleTime=1000ms, totalTime=2000ms"));
    }
}
