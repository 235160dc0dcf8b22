//! Prometheus text exposition format.
//!
//! Renders a metrics tick into the Prometheus text exposition format so
//! an external scraper or dashboard can poll it.

use std::fmt::Write;

use crate::facade::MetricsTick;

/// Render one tick as a block of GAUGE metrics.
pub fn render_prometheus(tick: &MetricsTick) -> String {
    let p = &tick.performance;
    let r = &tick.resources;

    let gauges: [(&str, &str, String); 14] = [
        ("canopy_success_rate", "Completed over finished tasks (0.0-1.0).", format!("{:.4}", p.success_rate)),
        ("canopy_error_rate", "Failed over finished tasks (0.0-1.0).", format!("{:.4}", p.error_rate)),
        ("canopy_avg_latency_seconds", "Mean task latency in seconds.", format!("{:.3}", p.avg_latency_seconds)),
        ("canopy_throughput_per_second", "Completed tasks per second.", format!("{:.3}", p.throughput_per_second)),
        ("canopy_worker_utilization", "Busy workers over target workers (0.0-1.0).", format!("{:.4}", tick.worker_utilization)),
        ("canopy_queue_depth", "Tasks waiting in the queue.", p.queue_depth.to_string()),
        ("canopy_queue_to_worker_ratio", "Queued tasks per target worker.", format!("{:.3}", tick.queue_to_worker_ratio)),
        ("canopy_active_workers", "Workers holding a pool slot.", p.active_workers.to_string()),
        ("canopy_target_workers", "Current worker ceiling.", p.target_workers.to_string()),
        ("canopy_performance_score", "Weighted performance score (0.0-1.0).", format!("{:.4}", tick.performance_score)),
        ("canopy_memory_percent", "Host memory usage.", format!("{:.1}", r.memory_percent)),
        ("canopy_cpu_percent", "Host CPU usage.", format!("{:.1}", r.cpu_percent)),
        ("canopy_disk_percent", "Host disk usage.", format!("{:.1}", r.disk_percent)),
        ("canopy_scaling_capacity", "Normalized resource headroom (0.0-1.0).", format!("{:.4}", tick.scaling_capacity)),
    ];

    let mut out = String::new();
    for (name, help, value) in gauges {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} gauge");
        let _ = writeln!(out, "{name} {value}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_state::{PerformanceSnapshot, ResourceSnapshot};

    fn test_tick() -> MetricsTick {
        let mut perf = PerformanceSnapshot::fallback(1000);
        perf.success_rate = 0.95;
        perf.target_workers = 50;
        perf.queue_depth = 12;
        MetricsTick::derive(3, perf, ResourceSnapshot::new(1000, 45.0, 40.0, 30.0, 4096))
    }

    #[test]
    fn render_includes_core_gauges() {
        let output = render_prometheus(&test_tick());

        assert!(output.contains("# TYPE canopy_success_rate gauge"));
        assert!(output.contains("canopy_success_rate 0.9500"));
        assert!(output.contains("canopy_target_workers 50"));
        assert!(output.contains("canopy_queue_depth 12"));
        assert!(output.contains("canopy_memory_percent 45.0"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&test_tick());

        for line in output.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let name = parts.next().unwrap();
            let value = parts.next().unwrap();
            assert!(name.starts_with("canopy_"), "unexpected metric: {line}");
            assert!(value.parse::<f64>().is_ok(), "value should be numeric: {line}");
            assert!(parts.next().is_none());
        }
    }
}
