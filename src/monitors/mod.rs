pub mod cpu_frequency;
pub mod kernel_features;
pub mod proc_stat;
pub mod sys_devices;
pub mod work_durations;
