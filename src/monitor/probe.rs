//! System load probes
//!
//! The sampler reads CPU and memory through [`SystemProbe`]. On Linux
//! [`ProcProbe`] derives both from `/proc`; [`FixedProbe`] reports values
//! set by the caller, for simulation and tests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One reading of system load
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSample {
    /// Whole-system CPU utilisation, 0-100
    pub cpu_percent: f64,
    /// Memory in use, in MiB
    pub memory_used_mb: f64,
}

/// Source of system load readings
pub trait SystemProbe: Send {
    /// Take a reading; `None` when the platform cannot provide one
    fn sample(&mut self) -> Option<SystemSample>;
}

/// Reads `/proc/stat` and `/proc/meminfo`
///
/// CPU usage is computed from the difference between consecutive reads,
/// so the first sample after construction reports usage since boot.
#[derive(Debug, Default)]
pub struct ProcProbe {
    last: Option<CpuTimes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl ProcProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SystemProbe for ProcProbe {
    fn sample(&mut self) -> Option<SystemSample> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;

        let times = parse_cpu_times(&stat)?;
        let cpu_percent = cpu_percent_between(self.last.unwrap_or(CpuTimes { idle: 0, total: 0 }), times);
        self.last = Some(times);

        Some(SystemSample {
            cpu_percent,
            memory_used_mb: parse_memory_used_mb(&meminfo)?,
        })
    }
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest time is already folded into user/nice
    let total = fields.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

fn cpu_percent_between(previous: CpuTimes, current: CpuTimes) -> f64 {
    let total = current.total.saturating_sub(previous.total);
    if total == 0 {
        return 0.0;
    }
    let idle = current.idle.saturating_sub(previous.idle).min(total);
    (total - idle) as f64 / total as f64 * 100.0
}

fn parse_memory_used_mb(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total_kb = field("MemTotal:")?;
    let available_kb = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    Some(total_kb.saturating_sub(available_kb) as f64 / 1024.0)
}

/// Probe returning whatever value was last set through its handle
#[derive(Debug, Clone, Default)]
pub struct FixedProbe {
    sample: Arc<Mutex<Option<SystemSample>>>,
}

impl FixedProbe {
    pub fn new(cpu_percent: f64, memory_used_mb: f64) -> Self {
        Self {
            sample: Arc::new(Mutex::new(Some(SystemSample {
                cpu_percent,
                memory_used_mb,
            }))),
        }
    }

    /// Probe that never produces a reading
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, cpu_percent: f64, memory_used_mb: f64) {
        *self.sample.lock() = Some(SystemSample {
            cpu_percent,
            memory_used_mb,
        });
    }
}

impl SystemProbe for FixedProbe {
    fn sample(&mut self) -> Option<SystemSample> {
        *self.sample.lock()
    }
}
