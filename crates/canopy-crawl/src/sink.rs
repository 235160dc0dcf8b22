//! Sinks receive each task's terminal outcome exactly once.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use canopy_state::{CanopyError, CanopyResult, TaskId, TaskResult};

#[async_trait]
pub trait Sink: Send + Sync {
    async fn on_task_completed(&self, task_id: &str, result: &TaskResult);
    async fn on_task_failed(&self, task_id: &str, error: &CanopyError);
}

// ── TreeSink ──────────────────────────────────────────────────────

/// One node of the assembled output tree.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TreeNode {
    pub id: TaskId,
    pub label: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    pub is_leaf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Default)]
struct TreeState {
    completed: BTreeMap<TaskId, TaskResult>,
    failed: BTreeMap<TaskId, String>,
}

/// Collects results and assembles them into a tree by task id.
#[derive(Default)]
pub struct TreeSink {
    state: Mutex<TreeState>,
}

impl TreeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    /// Assemble the tree under `root_id`. `None` if the root never completed.
    pub async fn tree(&self, root_id: &str) -> Option<TreeNode> {
        let state = self.state.lock().await;
        let root = state.completed.get(root_id)?;
        Some(build(&state, root_id, root))
    }

    /// Write the tree under `root_id` as pretty JSON.
    pub async fn write_json(&self, root_id: &str, path: &Path) -> CanopyResult<()> {
        let tree = self.tree(root_id).await;
        let json = serde_json::to_vec_pretty(&tree)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "crawl tree written");
        Ok(())
    }
}

fn build(state: &TreeState, id: &str, result: &TaskResult) -> TreeNode {
    let children = result
        .children
        .iter()
        .enumerate()
        .map(|(i, child)| {
            let child_id = format!("{id}.{}", i + 1);
            if let Some(done) = state.completed.get(&child_id) {
                return build(state, &child_id, done);
            }
            TreeNode {
                error: state.failed.get(&child_id).cloned(),
                id: child_id,
                label: child.label.clone(),
                path: child.path.clone(),
                guid: child.guid.clone(),
                is_leaf: child.is_leaf,
                children: Vec::new(),
            }
        })
        .collect();

    TreeNode {
        id: id.to_string(),
        label: result.node.label.clone(),
        path: result.node.path.clone(),
        guid: result.node.guid.clone(),
        is_leaf: result.node.is_leaf,
        error: None,
        children,
    }
}

#[async_trait]
impl Sink for TreeSink {
    async fn on_task_completed(&self, task_id: &str, result: &TaskResult) {
        self.state
            .lock()
            .await
            .completed
            .insert(task_id.to_string(), result.clone());
    }

    async fn on_task_failed(&self, task_id: &str, error: &CanopyError) {
        self.state
            .lock()
            .await
            .failed
            .insert(task_id.to_string(), error.to_string());
    }
}

// ── MemorySink ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Completed { task_id: TaskId, children: usize },
    Failed { task_id: TaskId, error: String },
}

/// Records every event in arrival order.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<SinkEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().await.clone()
    }

    pub async fn completed_ids(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Completed { task_id, .. } => Some(task_id.clone()),
                SinkEvent::Failed { .. } => None,
            })
            .collect()
    }

    pub async fn failed_ids(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Failed { task_id, .. } => Some(task_id.clone()),
                SinkEvent::Completed { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn on_task_completed(&self, task_id: &str, result: &TaskResult) {
        self.events.lock().await.push(SinkEvent::Completed {
            task_id: task_id.to_string(),
            children: result.children.len(),
        });
    }

    async fn on_task_failed(&self, task_id: &str, error: &CanopyError) {
        self.events.lock().await.push(SinkEvent::Failed {
            task_id: task_id.to_string(),
            error: error.to_string(),
        });
    }
}
