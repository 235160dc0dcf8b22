//! Host probes.
//!
//! `SysinfoSampler` reads the real host through `sysinfo`. `FixedSampler`
//! returns whatever reading it was last given and is used for dry runs and
//! tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

use canopy_state::SamplingError;

/// Raw host usage. Percentages are 0–100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostReading {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub memory_available_mb: u64,
}

/// Source of host readings.
///
/// `probe` may block; the monitor runs it on the blocking pool.
pub trait HostSampler: Send + Sync {
    fn probe(&self) -> Result<HostReading, SamplingError>;
}

/// Last global CPU reading and when it was taken.
///
/// CPU usage is a delta between two refreshes; refreshing again inside
/// `min_interval` yields 0 or close to 100, so callers closer together
/// than that share the cached value.
#[derive(Debug)]
struct CpuCache {
    min_interval: Duration,
    last: Option<(Instant, f64)>,
}

impl CpuCache {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    fn read(&mut self, now: Instant, refresh: impl FnOnce() -> f64) -> f64 {
        if let Some((at, value)) = self.last
            && now.saturating_duration_since(at) < self.min_interval
        {
            return value;
        }
        let value = refresh();
        self.last = Some((now, value));
        value
    }
}

struct SysinfoState {
    system: System,
    cpu: CpuCache,
}

/// Reads memory, global CPU and disk usage from the running host.
///
/// Shared by the resource monitor and the metrics facade; probes closer
/// together than `MINIMUM_CPU_UPDATE_INTERVAL` reuse the last CPU value.
pub struct SysinfoSampler {
    state: Mutex<SysinfoState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first probe is meaningful.
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        Self {
            state: Mutex::new(SysinfoState {
                system,
                cpu: CpuCache::new(System::MINIMUM_CPU_UPDATE_INTERVAL),
            }),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler for SysinfoSampler {
    fn probe(&self) -> Result<HostReading, SamplingError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| SamplingError::Probe("sysinfo state poisoned".into()))?;
        let SysinfoState { system: sys, cpu } = &mut *guard;

        sys.refresh_memory();
        sys.refresh_disks();
        let cpu_percent = cpu.read(Instant::now(), || {
            sys.refresh_cpu();
            sys.global_cpu_info().cpu_usage() as f64
        });

        let total_memory = sys.total_memory();
        if total_memory == 0 {
            return Err(SamplingError::Probe("host reports no memory".into()));
        }
        let used_memory = sys.used_memory();
        let memory_percent = used_memory as f64 / total_memory as f64 * 100.0;
        let memory_available_mb = sys.available_memory() / (1024 * 1024);

        let (total_disk, free_disk) = sys.disks().iter().fold((0u64, 0u64), |(t, f), d| {
            (t + d.total_space(), f + d.available_space())
        });
        let disk_percent = if total_disk > 0 {
            (total_disk - free_disk.min(total_disk)) as f64 / total_disk as f64 * 100.0
        } else {
            0.0
        };

        debug!(memory_percent, cpu_percent, disk_percent, "host probed");
        Ok(HostReading {
            memory_percent,
            cpu_percent,
            disk_percent,
            memory_available_mb,
        })
    }
}

/// Sampler returning a caller-controlled reading, or a probe failure when
/// cleared.
pub struct FixedSampler {
    reading: Mutex<Option<HostReading>>,
}

impl FixedSampler {
    pub fn new(reading: HostReading) -> Self {
        Self {
            reading: Mutex::new(Some(reading)),
        }
    }

    /// A sampler whose every probe fails.
    pub fn failing() -> Self {
        Self {
            reading: Mutex::new(None),
        }
    }

    /// Convenience constructor from memory/cpu/disk percentages.
    pub fn percent(memory: f64, cpu: f64, disk: f64) -> Self {
        Self::new(HostReading {
            memory_percent: memory,
            cpu_percent: cpu,
            disk_percent: disk,
            memory_available_mb: 4096,
        })
    }

    pub fn set(&self, reading: Option<HostReading>) {
        if let Ok(mut r) = self.reading.lock() {
            *r = reading;
        }
    }
}

impl HostSampler for FixedSampler {
    fn probe(&self) -> Result<HostReading, SamplingError> {
        self.reading
            .lock()
            .map_err(|_| SamplingError::Probe("fixed reading poisoned".into()))?
            .ok_or_else(|| SamplingError::Unavailable("no reading configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_reading_is_in_range() {
        let sampler = SysinfoSampler::new();
        // Containers without /proc may legitimately fail; a success must be sane.
        if let Ok(r) = sampler.probe() {
            assert!((0.0..=100.0).contains(&r.memory_percent));
            assert!(r.cpu_percent >= 0.0);
            assert!((0.0..=100.0).contains(&r.disk_percent));
        }
    }

    #[test]
    fn back_to_back_probes_share_cpu_reading() {
        let sampler = SysinfoSampler::new();
        if let (Ok(a), Ok(b)) = (sampler.probe(), sampler.probe()) {
            assert_eq!(a.cpu_percent, b.cpu_percent);
        }
    }

    #[test]
    fn cpu_cache_refreshes_only_after_interval() {
        let mut cache = CpuCache::new(Duration::from_millis(200));
        let start = Instant::now();
        let mut refreshes = 0;

        let first = cache.read(start, || {
            refreshes += 1;
            35.0
        });
        let second = cache.read(start + Duration::from_millis(5), || {
            refreshes += 1;
            99.0
        });
        assert_eq!(first, 35.0);
        assert_eq!(second, 35.0);
        assert_eq!(refreshes, 1);

        let later = cache.read(start + Duration::from_millis(250), || {
            refreshes += 1;
            50.0
        });
        assert_eq!(later, 50.0);
        assert_eq!(refreshes, 2);
    }

    #[test]
    fn fixed_sampler_can_fail() {
        let sampler = FixedSampler::percent(40.0, 30.0, 20.0);
        assert_eq!(sampler.probe().unwrap().cpu_percent, 30.0);

        sampler.set(None);
        assert!(sampler.probe().is_err());
        assert!(FixedSampler::failing().probe().is_err());
    }
}
