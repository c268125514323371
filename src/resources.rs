//! # Resource Sampling
//!
//! While a test executes, a background task records CPU utilization, resident
//! memory of the harness process and the device thermal state at a fixed
//! cadence. The collector reduces the samples to peaks when the test is
//! finalized.
//!
//! The sampler owns its buffer. Once [`ResourceSampler::stop`] returns no
//! further sample is appended, so reading peaks after a stop is stable.

use crate::results::ThermalState;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One point-in-time reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub thermal_state: ThermalState,
}

/// Reduction of a sample window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourcePeaks {
    pub peak_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub thermal_state: ThermalState,
}

impl ResourcePeaks {
    pub fn from_samples(samples: &[ResourceSample]) -> Self {
        samples.iter().fold(Self::default(), |acc, s| Self {
            peak_cpu_percent: acc.peak_cpu_percent.max(s.cpu_percent),
            peak_memory_mb: acc.peak_memory_mb.max(s.memory_mb),
            thermal_state: acc.thermal_state.max(s.thermal_state),
        })
    }
}

/// Source of resource readings
pub trait ResourceProbe: Send + 'static {
    fn sample(&mut self) -> anyhow::Result<ResourceSample>;
}

/// Probe backed by `sysinfo` and the Linux thermal sysfs tree
pub struct SysinfoProbe {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Cannot resolve own pid, memory will read 0: {}", e))
            .ok();
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system, pid }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> anyhow::Result<ResourceSample> {
        self.system.refresh_cpu_usage();
        let cpu_percent = self.system.global_cpu_usage() as f64;

        let memory_mb = match self.pid {
            Some(pid) => {
                self.system
                    .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                self.system
                    .process(pid)
                    .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
                    .unwrap_or(0.0)
            }
            None => 0.0,
        };

        let thermal_state = read_max_zone_temperature(Path::new("/sys/class/thermal"))
            .map(ThermalState::from_celsius)
            .unwrap_or_default();

        Ok(ResourceSample {
            cpu_percent,
            memory_mb,
            thermal_state,
        })
    }
}

/// Hottest `thermal_zone*/temp` reading under `root`, in Celsius
///
/// The kernel reports millidegrees. Returns `None` when no zone is readable,
/// e.g. in containers or on non-Linux hosts.
pub fn read_max_zone_temperature(root: &Path) -> Option<f32> {
    let entries = std::fs::read_dir(root).ok()?;
    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("temp")).ok())
        .filter_map(|raw| raw.trim().parse::<f32>().ok())
        .map(|milli| milli / 1000.0)
        .reduce(f32::max)
}

struct SamplerTask {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Cancellable background sampling loop
pub struct ResourceSampler {
    interval: Duration,
    probe: Arc<Mutex<Box<dyn ResourceProbe>>>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    task: Option<SamplerTask>,
}

impl ResourceSampler {
    pub fn new(interval: Duration) -> Self {
        Self::with_probe(interval, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(interval: Duration, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            interval,
            probe: Arc::new(Mutex::new(probe)),
            samples: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|t| t.active.load(Ordering::Acquire))
    }

    /// Begin sampling. No-op while already running.
    ///
    /// Outside a tokio runtime nothing is spawned and the window stays empty.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; resource sampling disabled for this test");
            return;
        };

        let active = Arc::new(AtomicBool::new(true));
        let handle = runtime.spawn(sample_loop(
            self.interval,
            Arc::clone(&self.probe),
            Arc::clone(&self.samples),
            Arc::clone(&active),
        ));
        debug!(interval = ?self.interval, "Resource sampler started");
        self.task = Some(SamplerTask { active, handle });
    }

    /// Stop sampling. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        {
            // Flip under the buffer lock so no append can follow this call.
            let _guard = self.samples.lock();
            task.active.store(false, Ordering::Release);
        }
        task.handle.abort();
        debug!("Resource sampler stopped");
    }

    pub fn clear(&mut self) {
        self.samples.lock().clear();
    }

    pub fn samples(&self) -> Vec<ResourceSample> {
        self.samples.lock().clone()
    }

    pub fn peaks(&self) -> ResourcePeaks {
        ResourcePeaks::from_samples(&self.samples.lock())
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    interval: Duration,
    probe: Arc<Mutex<Box<dyn ResourceProbe>>>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    active: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let sample = match probe.lock().sample() {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Resource sample failed, recording zeros: {}", e);
                ResourceSample::default()
            }
        };

        let mut buffer = samples.lock();
        if !active.load(Ordering::Acquire) {
            break;
        }
        buffer.push(sample);
    }
}
