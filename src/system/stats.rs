//! Host resource statistics.
//!
//! CPU and memory come from `sysinfo`; GPU utilization, VRAM and GPU
//! temperature come from `nvidia-smi` when it is installed. Results are
//! cached for a short TTL because CPU sampling needs a refresh interval and
//! spawning `nvidia-smi` per request is wasteful.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::System;
use thiserror::Error;
use tokio::process::Command;

use crate::config::SystemConfig;

const NVIDIA_SMI: &str = "nvidia-smi";
const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats sampling task failed: {0}")]
    Sampling(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    /// Global CPU usage, percent.
    pub cpu: f64,
    /// Used memory, percent of total.
    pub ram: f64,
    /// GPU utilization, percent.
    pub gpu: Option<f64>,
    /// Used VRAM, percent of total.
    pub vram: Option<f64>,
    /// GPU temperature, degrees Celsius.
    pub temp: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuStats {
    pub utilization: Option<f64>,
    pub vram: Option<f64>,
    pub temperature: Option<f64>,
}

pub struct StatsCollector {
    system: Arc<Mutex<System>>,
    cache: tokio::sync::Mutex<Option<(Instant, SystemStats)>>,
    ttl: Duration,
}

impl StatsCollector {
    pub fn new(config: &SystemConfig) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a baseline.
        system.refresh_cpu_usage();
        Self {
            system: Arc::new(Mutex::new(system)),
            cache: tokio::sync::Mutex::new(None),
            ttl: Duration::from_millis(config.stats_cache_ms),
        }
    }

    /// Current stats, served from cache unless it expired or `bypass_cache`.
    pub async fn snapshot(&self, bypass_cache: bool) -> Result<SystemStats, StatsError> {
        // Held across sampling so concurrent callers share one sample.
        let mut cache = self.cache.lock().await;
        if !bypass_cache {
            if let Some((taken, stats)) = cache.as_ref() {
                if taken.elapsed() < self.ttl {
                    return Ok(SystemStats {
                        cached: true,
                        ..stats.clone()
                    });
                }
            }
        }

        let stats = self.sample().await?;
        *cache = Some((Instant::now(), stats.clone()));
        Ok(stats)
    }

    async fn sample(&self) -> Result<SystemStats, StatsError> {
        let system = Arc::clone(&self.system);
        let (cpu, ram) = tokio::task::spawn_blocking(move || {
            let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                f64::from(system.global_cpu_usage()),
                percent(system.used_memory() as f64, system.total_memory() as f64),
            )
        })
        .await?;

        let gpu = query_gpu().await;
        Ok(SystemStats {
            cpu: round1(cpu),
            ram: round1(ram.unwrap_or(0.0)),
            gpu: gpu.and_then(|g| g.utilization),
            vram: gpu.and_then(|g| g.vram),
            temp: gpu.and_then(|g| g.temperature),
            timestamp: Utc::now(),
            cached: false,
        })
    }
}

async fn query_gpu() -> Option<GpuStats> {
    let output = Command::new(NVIDIA_SMI)
        .args([
            "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu",
            "--format=csv,noheader,nounits",
        ])
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(NVIDIA_SMI_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(Ok(output)) => {
            tracing::debug!(status = %output.status, "nvidia-smi exited with failure");
            None
        }
        Ok(Err(e)) => {
            tracing::trace!(error = %e, "nvidia-smi not available");
            None
        }
        Err(_) => {
            tracing::warn!(timeout = ?NVIDIA_SMI_TIMEOUT, "nvidia-smi timed out");
            None
        }
    }
}

/// Parse the first GPU line of `nvidia-smi --format=csv,noheader,nounits`.
///
/// Fields that report `[N/A]` or fail to parse come back as `None`.
pub fn parse_nvidia_smi(output: &str) -> Option<GpuStats> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let fields: Vec<Option<f64>> = line
        .split(',')
        .map(|field| field.trim().parse::<f64>().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }

    let vram = match (fields[1], fields[2]) {
        (Some(used), Some(total)) => percent(used, total).map(round1),
        _ => None,
    };
    Some(GpuStats {
        utilization: fields[0],
        vram,
        temperature: fields[3],
    })
}

fn percent(part: f64, total: f64) -> Option<f64> {
    (total > 0.0).then(|| part / total * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
