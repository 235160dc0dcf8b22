//! Domain types for the canopy scheduler.
//!
//! Tasks, worker identifiers, and the immutable snapshot and decision
//! records that flow between the metrics pipeline, the scaling engine and
//! the auto-tuner. All types serialize to JSON for the journal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Hierarchical task identifier, e.g. `"1.3.2"`.
pub type TaskId = String;

/// Identifier of a worker routine, e.g. `"worker-7"`.
pub type WorkerId = String;

/// Priority stride per tree level. Any sibling index below this keeps
/// shallower tasks ahead of deeper ones.
pub const PRIORITY_DEPTH_STRIDE: u64 = 1000;

// ── Tasks ─────────────────────────────────────────────────────────

/// A folder or page in the documentation tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub label: String,
    /// Locator handed to the fetcher (URL, filesystem path, ...).
    pub path: String,
    pub depth: u32,
    pub guid: Option<String>,
    pub is_leaf: bool,
}

/// Child node as reported by a `PageFetcher`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildDescriptor {
    pub label: String,
    pub path: String,
    pub guid: Option<String>,
    pub is_leaf: bool,
}

/// A unit of crawl work. Exactly one worker owns a task at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    /// Back-reference for lookups only.
    pub parent_id: Option<TaskId>,
    pub node: NodeInfo,
    /// Lower sorts first.
    pub priority: u64,
    pub retry_count: u32,
    pub created_at: u64,
}

impl Task {
    /// The task for the tree root.
    pub fn root(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: "1".to_string(),
            parent_id: None,
            node: NodeInfo {
                label: label.into(),
                path: path.into(),
                depth: 0,
                guid: None,
                is_leaf: false,
            },
            priority: 0,
            retry_count: 0,
            created_at: epoch_secs(),
        }
    }

    /// Build the task for this task's `index`-th child (1-based).
    pub fn child(&self, index: usize, child: &ChildDescriptor) -> Self {
        let depth = self.node.depth + 1;
        Self {
            id: format!("{}.{}", self.id, index),
            parent_id: Some(self.id.clone()),
            node: NodeInfo {
                label: child.label.clone(),
                path: child.path.clone(),
                depth,
                guid: child.guid.clone(),
                is_leaf: child.is_leaf,
            },
            priority: depth as u64 * PRIORITY_DEPTH_STRIDE + index as u64,
            retry_count: 0,
            created_at: epoch_secs(),
        }
    }
}

/// Payload stored for a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub node: NodeInfo,
    pub children: Vec<ChildDescriptor>,
    pub elapsed_ms: u64,
}

// ── Performance ───────────────────────────────────────────────────

/// Point-in-time view of crawl performance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub timestamp: u64,
    /// Completed / (completed + failed), 0.0–1.0.
    pub success_rate: f64,
    /// Failed / (completed + failed), 0.0–1.0.
    pub error_rate: f64,
    pub avg_latency_seconds: f64,
    pub throughput_per_second: f64,
    /// Busy workers / target workers, capped at 1.0.
    pub worker_utilization: f64,
    pub queue_depth: usize,
    pub queue_to_worker_ratio: f64,
    pub active_workers: u32,
    pub busy_workers: u32,
    pub target_workers: u32,
    pub completed: u64,
    pub failed: u64,
    /// Weighted blend of success, speed, efficiency, balance and stability.
    pub performance_score: f64,
}

impl PerformanceSnapshot {
    /// Neutral snapshot substituted when collection fails.
    pub fn fallback(timestamp: u64) -> Self {
        Self {
            timestamp,
            success_rate: 0.9,
            error_rate: 0.0,
            avg_latency_seconds: 1.0,
            throughput_per_second: 0.0,
            worker_utilization: 0.0,
            queue_depth: 0,
            queue_to_worker_ratio: 0.0,
            active_workers: 0,
            busy_workers: 0,
            target_workers: 0,
            completed: 0,
            failed: 0,
            performance_score: 0.5,
        }
    }
}

// ── Resources ─────────────────────────────────────────────────────

/// Coarse host load classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Low,
    Normal,
    High,
    Critical,
}

impl LoadLevel {
    pub fn classify(memory_percent: f64, cpu_percent: f64) -> Self {
        if memory_percent > 90.0 || cpu_percent > 90.0 {
            LoadLevel::Critical
        } else if memory_percent > 80.0 || cpu_percent > 80.0 {
            LoadLevel::High
        } else if memory_percent < 50.0 && cpu_percent < 50.0 {
            LoadLevel::Low
        } else {
            LoadLevel::Normal
        }
    }
}

/// Point-in-time view of host resources. Percentages are 0–100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    pub timestamp: u64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub memory_available_mb: u64,
    pub load_level: LoadLevel,
    /// Normalized headroom, 0 = none, 1 = abundant.
    pub scaling_capacity: f64,
}

impl ResourceSnapshot {
    /// Build a snapshot and derive `load_level` and `scaling_capacity`.
    pub fn new(
        timestamp: u64,
        memory_percent: f64,
        cpu_percent: f64,
        disk_percent: f64,
        memory_available_mb: u64,
    ) -> Self {
        let headroom = |usage: f64| ((100.0 - usage) / 100.0).max(0.0);
        let scaling_capacity = 0.5 * headroom(memory_percent)
            + 0.3 * headroom(cpu_percent)
            + 0.2 * headroom(disk_percent);

        Self {
            timestamp,
            memory_percent,
            cpu_percent,
            disk_percent,
            memory_available_mb,
            load_level: LoadLevel::classify(memory_percent, cpu_percent),
            scaling_capacity: scaling_capacity.clamp(0.0, 1.0),
        }
    }

    /// Conservative mid-range snapshot used when sampling fails.
    pub fn fallback(timestamp: u64) -> Self {
        Self::new(timestamp, 50.0, 25.0, 50.0, 1024)
    }

    pub fn is_safe_to_scale_up(&self) -> bool {
        self.memory_percent < 80.0
            && self.cpu_percent < 85.0
            && self.disk_percent < 90.0
            && matches!(self.load_level, LoadLevel::Low | LoadLevel::Normal)
    }

    pub fn requires_scale_down(&self) -> bool {
        self.memory_percent > 90.0
            || self.cpu_percent > 95.0
            || self.disk_percent > 95.0
            || self.load_level == LoadLevel::Critical
    }
}

// ── Scaling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoChange,
}

/// Output of one scaling-engine tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub timestamp: u64,
    pub action: ScalingAction,
    pub current_workers: u32,
    pub target_workers: u32,
    pub confidence: f64,
    pub reasoning: String,
    /// Set only for emergency scale-downs.
    pub safety_override: bool,
}

impl ScalingDecision {
    pub fn no_change(
        timestamp: u64,
        current_workers: u32,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            action: ScalingAction::NoChange,
            current_workers,
            target_workers: current_workers,
            confidence,
            reasoning: reasoning.into(),
            safety_override: false,
        }
    }

    pub fn is_change(&self) -> bool {
        self.action != ScalingAction::NoChange
    }
}

// ── Tuning ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    PeakLoad,
    LowActivity,
    Degrading,
    SteadyState,
}

/// A recurring shape detected in the performance history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformancePattern {
    pub kind: PatternKind,
    pub confidence: f64,
    pub duration_secs: u64,
    /// The statistics that triggered detection.
    pub characteristics: BTreeMap<String, f64>,
    pub recommended_action: String,
}

/// A proposed change to one tuning parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuningRecommendation {
    pub parameter: String,
    pub current_value: f64,
    pub recommended_value: f64,
    pub confidence: f64,
    pub reason: String,
    pub expected_improvement: String,
}

/// Audit record for an applied parameter change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuningChange {
    pub timestamp: u64,
    pub parameter: String,
    pub old_value: f64,
    pub new_value: f64,
    pub confidence: f64,
    pub reason: String,
    /// `TuningParameters` version produced by the commit.
    pub version: u64,
}

/// Seconds since the unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(label: &str) -> ChildDescriptor {
        ChildDescriptor {
            label: label.to_string(),
            path: format!("/docs/{label}"),
            guid: None,
            is_leaf: false,
        }
    }

    #[test]
    fn child_ids_encode_lineage() {
        let root = Task::root("docs", "/docs");
        let second = root.child(2, &child("guides"));
        let nested = second.child(3, &child("install"));

        assert_eq!(second.id, "1.2");
        assert_eq!(nested.id, "1.2.3");
        assert_eq!(nested.parent_id.as_deref(), Some("1.2"));
        assert_eq!(nested.node.depth, 2);
    }

    #[test]
    fn shallower_tasks_sort_first() {
        let root = Task::root("docs", "/docs");
        let last_sibling = root.child(999, &child("z"));
        let grandchild = root.child(1, &child("a")).child(1, &child("b"));
        assert!(last_sibling.priority < grandchild.priority);
        assert_eq!(last_sibling.priority, 1999);
        assert_eq!(grandchild.priority, 2001);
    }

    #[test]
    fn load_level_thresholds() {
        assert_eq!(LoadLevel::classify(96.0, 10.0), LoadLevel::Critical);
        assert_eq!(LoadLevel::classify(40.0, 91.0), LoadLevel::Critical);
        assert_eq!(LoadLevel::classify(85.0, 10.0), LoadLevel::High);
        assert_eq!(LoadLevel::classify(45.0, 40.0), LoadLevel::Low);
        assert_eq!(LoadLevel::classify(60.0, 40.0), LoadLevel::Normal);
    }

    #[test]
    fn scaling_capacity_weights_memory_most() {
        let snap = ResourceSnapshot::new(0, 40.0, 40.0, 40.0, 4096);
        assert!((snap.scaling_capacity - 0.6).abs() < 1e-9);

        let full = ResourceSnapshot::new(0, 120.0, 100.0, 100.0, 0);
        assert_eq!(full.scaling_capacity, 0.0);
    }

    #[test]
    fn resource_predicates() {
        let calm = ResourceSnapshot::new(0, 45.0, 40.0, 30.0, 8192);
        assert!(calm.is_safe_to_scale_up());
        assert!(!calm.requires_scale_down());

        let hot_memory = ResourceSnapshot::new(0, 96.0, 20.0, 30.0, 128);
        assert!(!hot_memory.is_safe_to_scale_up());
        assert!(hot_memory.requires_scale_down());

        let full_disk = ResourceSnapshot::new(0, 30.0, 20.0, 97.0, 8192);
        assert!(full_disk.requires_scale_down());
    }

    #[test]
    fn fallbacks_are_neutral() {
        let perf = PerformanceSnapshot::fallback(7);
        assert_eq!(perf.success_rate, 0.9);
        assert_eq!(perf.avg_latency_seconds, 1.0);

        let res = ResourceSnapshot::fallback(7);
        assert_eq!(res.load_level, LoadLevel::Normal);
        assert!(!res.requires_scale_down());
    }

    #[test]
    fn decision_serializes_snake_case() {
        let d = ScalingDecision::no_change(1, 50, 0.8, "Balanced signals - maintaining current level");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"action\":\"no_change\""));
    }
}
