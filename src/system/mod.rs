//! Host statistics for the UI's resource panel.

pub mod stats;

pub use stats::{parse_nvidia_smi, GpuStats, StatsCollector, StatsError, SystemStats};
