use crate::algorithms::model::{read_device, Device, Model, ModelInput};
use crate::algorithms::throttle::ThrottleDecision;
use crate::config::tunables::AdaptiveCpuConfig;
use crate::daemon::stats::AdaptiveCpuStats;
use crate::hal::filesystem::Filesystem;
use crate::hal::hints::HintManager;
use crate::hal::properties::PropertyStore;
use crate::hal::time::TimeSource;
use crate::monitors::kernel_features::KernelCpuFeatureReader;
use crate::monitors::work_durations::{WorkDuration, WorkDurationProcessor};

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

// The model receives the previous N inputs, including the most recent one.
const NUM_HISTORICAL_MODEL_INPUTS: usize = 3;

struct ControllerShared {
    is_enabled: AtomicBool,
    should_reload_config: AtomicBool,
    last_enabled_hint_time_ns: AtomicU64,
    work_durations: WorkDurationProcessor,
    wait_mutex: Mutex<()>,
    work_available: Condvar,
    // Touched briefly by the worker each iteration so dump_state can render a
    // consistent snapshot from any thread.
    config: Mutex<AdaptiveCpuConfig>,
    stats: Mutex<AdaptiveCpuStats>,
    kernel_reader: Mutex<KernelCpuFeatureReader>,
    time_source: Arc<dyn TimeSource>,
    properties: Arc<dyn PropertyStore>,
    hint_manager: Arc<dyn HintManager>,
}

/// The adaptive CPU controller. Owns the worker thread, the work duration
/// mailbox and the feature readers; drives the hint manager from the model's
/// decisions.
pub struct AdaptiveCpu {
    shared: Arc<ControllerShared>,
    loop_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AdaptiveCpu {
    pub fn new(
        filesystem: Arc<dyn Filesystem>,
        time_source: Arc<dyn TimeSource>,
        properties: Arc<dyn PropertyStore>,
        hint_manager: Arc<dyn HintManager>,
    ) -> Self {
        let shared = Arc::new(ControllerShared {
            is_enabled: AtomicBool::new(false),
            should_reload_config: AtomicBool::new(false),
            last_enabled_hint_time_ns: AtomicU64::new(0),
            work_durations: WorkDurationProcessor::default(),
            wait_mutex: Mutex::new(()),
            work_available: Condvar::new(),
            config: Mutex::new(AdaptiveCpuConfig::default()),
            stats: Mutex::new(AdaptiveCpuStats::new(Arc::clone(&time_source))),
            kernel_reader: Mutex::new(KernelCpuFeatureReader::new(
                filesystem,
                Arc::clone(&time_source),
            )),
            time_source,
            properties,
            hint_manager,
        });
        Self {
            shared,
            loop_thread: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled.load(Ordering::Acquire)
    }

    pub fn hint_received(&self, enable: bool) {
        log::info!("Adaptive CPU received hint: enable={}", enable);
        if enable {
            self.start_thread();
        } else {
            self.suspend_thread();
        }
    }

    fn start_thread(&self) {
        let mut loop_thread = self.loop_thread.lock().unwrap();
        log::info!("Starting Adaptive CPU thread");
        self.shared.is_enabled.store(true, Ordering::Release);
        self.shared.should_reload_config.store(true, Ordering::Release);
        self.shared.last_enabled_hint_time_ns.store(
            self.shared.time_source.now().as_nanos() as u64,
            Ordering::Release,
        );
        if loop_thread.is_none() {
            let shared = Arc::clone(&self.shared);
            let spawn_result = thread::Builder::new()
                .name("adaptivecpu".to_string())
                .spawn(move || {
                    // Creator threads may run at raised priorities; reset to
                    // the default.
                    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, 0) };
                    if ret != 0 {
                        log::error!("setpriority on Adaptive CPU thread failed: {}", ret);
                    }
                    log::info!("Started Adaptive CPU thread successfully");
                    run_main_loop(&shared);
                    log::error!("Adaptive CPU thread ended, this should never happen!");
                });
            match spawn_result {
                Ok(handle) => *loop_thread = Some(handle),
                Err(e) => log::error!("Failed to spawn Adaptive CPU thread: {}", e),
            }
        }
    }

    fn suspend_thread(&self) {
        log::info!("Stopping Adaptive CPU thread");
        // The worker drains to its wait point and blocks until re-enabled;
        // the thread itself is never destroyed.
        self.shared.is_enabled.store(false, Ordering::Release);
    }

    /// Fast path for producers. Rejected pushes disable the controller until
    /// the next enable hint.
    pub fn report_work_durations(&self, durations: Vec<WorkDuration>, target_duration_ns: i64) {
        if !self.is_enabled() {
            return;
        }
        if self
            .shared
            .work_durations
            .report_work_durations(durations, target_duration_ns)
            .is_err()
        {
            self.shared.is_enabled.store(false, Ordering::Release);
            return;
        }
        let _guard = self.shared.wait_mutex.lock().unwrap();
        self.shared.work_available.notify_one();
    }

    pub fn dump_state(&self, sink: &mut dyn Write) {
        if let Err(e) = self.write_state(sink) {
            log::error!("Failed to dump state: {}", e);
        }
    }

    fn write_state(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        writeln!(sink, "========== Begin Adaptive CPU stats ==========")?;
        writeln!(sink, "Enabled: {}", self.is_enabled())?;
        writeln!(sink, "Config: {}", *self.shared.config.lock().unwrap())?;
        self.shared
            .kernel_reader
            .lock()
            .unwrap()
            .dump_to_stream(sink)?;
        self.shared.stats.lock().unwrap().dump_to_stream(sink)?;
        writeln!(sink, "==========  End Adaptive CPU stats  ==========")
    }
}

fn wait_for_enabled_and_work_durations(shared: &ControllerShared) {
    let mut guard = shared.wait_mutex.lock().unwrap();
    while !(shared.is_enabled.load(Ordering::Acquire)
        && shared.work_durations.has_work_durations())
    {
        guard = shared.work_available.wait(guard).unwrap();
    }
}

fn run_main_loop(shared: &ControllerShared) {
    let mut historical_model_inputs: VecDeque<ModelInput> = VecDeque::new();
    let mut previous_throttle_decision = ThrottleDecision::NoThrottle;
    let mut model = Model::new();
    let mut config = AdaptiveCpuConfig::default();
    let mut device = Device::Unknown;
    let mut is_initialized = false;
    let mut last_throttle_hint_time = Duration::ZERO;
    loop {
        wait_for_enabled_and_work_durations(shared);

        let last_enabled_hint_time =
            Duration::from_nanos(shared.last_enabled_hint_time_ns.load(Ordering::Acquire));
        if last_enabled_hint_time + config.enabled_hint_timeout < shared.time_source.now() {
            log::info!(
                "Adaptive CPU hint timed out, last enabled time={}ns",
                last_enabled_hint_time.as_nanos()
            );
            shared.is_enabled.store(false, Ordering::Release);
            continue;
        }

        if shared.should_reload_config.load(Ordering::Acquire) {
            match AdaptiveCpuConfig::read_from_properties(&*shared.properties) {
                Ok(new_config) => {
                    log::info!("Read config: {}", new_config);
                    *shared.config.lock().unwrap() = new_config.clone();
                    config = new_config;
                    shared.should_reload_config.store(false, Ordering::Release);
                }
                Err(e) => {
                    log::error!("Failed to read config: {}", e);
                    shared.is_enabled.store(false, Ordering::Release);
                    continue;
                }
            }
        }

        shared.stats.lock().unwrap().register_start_run();

        if !is_initialized {
            if let Err(e) = shared.kernel_reader.lock().unwrap().init() {
                log::error!("Failed to init kernel CPU feature reader: {}", e);
                shared.is_enabled.store(false, Ordering::Release);
                continue;
            }
            device = read_device(&*shared.properties);
            is_initialized = true;
        }

        let work = shared.work_durations.get_features();
        log::debug!(
            "Got work durations: count={}, average={}ns",
            work.num_durations,
            work.average_duration_ns
        );
        if work.num_durations == 0 {
            continue;
        }

        let (policy_avg_hz, core_idle_frac) =
            match shared.kernel_reader.lock().unwrap().get_recent_cpu_features() {
                Ok(features) => features,
                Err(e) => {
                    log::error!("Failed to read CPU features: {}", e);
                    shared.is_enabled.store(false, Ordering::Release);
                    continue;
                }
            };

        historical_model_inputs.push_back(ModelInput {
            policy_avg_hz,
            core_idle_frac,
            work,
            previous_decision: previous_throttle_decision,
            device,
        });
        if historical_model_inputs.len() > NUM_HISTORICAL_MODEL_INPUTS {
            historical_model_inputs.pop_front();
        }

        let throttle_decision = model.run(&historical_model_inputs, &config);
        log::debug!("Model decision: {}", throttle_decision.as_u32());

        {
            let now = shared.time_source.now();
            // Resend the hints, even unchanged, if the previous send is close
            // to timing out. "Close to" is half the hint timeout, as the next
            // run isn't guaranteed to land before the actual timeout.
            let throttle_hint_may_timeout =
                now.saturating_sub(last_throttle_hint_time) > config.hint_timeout / 2;
            if throttle_decision != previous_throttle_decision || throttle_hint_may_timeout {
                last_throttle_hint_time = now;
                for hint_name in throttle_decision.hint_names() {
                    shared.hint_manager.do_hint(hint_name, config.hint_timeout);
                }
            }
            if throttle_decision != previous_throttle_decision {
                for hint_name in previous_throttle_decision.hint_names() {
                    shared.hint_manager.end_hint(hint_name);
                }
                previous_throttle_decision = throttle_decision;
            }
        }

        shared.stats.lock().unwrap().register_successful_run(
            previous_throttle_decision,
            throttle_decision,
            work,
            &config,
        );

        thread::sleep(config.iteration_sleep);
    }
}
