//! Page fetchers: discover the children of a node.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use canopy_state::{CanopyError, CanopyResult, ChildDescriptor, NodeInfo, Task};

/// Discovers the children of a folder node.
///
/// Any error is treated as transient and retried with backoff.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn discover_children(&self, node: &NodeInfo) -> CanopyResult<Vec<ChildDescriptor>>;
}

/// Fetcher over a local directory tree. Directories are folders and
/// everything else is a leaf. Children are sorted by file name.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The task for the root directory.
    pub fn root_task(&self) -> Task {
        let label = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string());
        Task::root(label, self.root.display().to_string())
    }
}

fn list_dir(dir: &Path) -> CanopyResult<Vec<ChildDescriptor>> {
    let mut children = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| CanopyError::TransientFetch(format!("{}: {e}", dir.display())))?;
        children.push(ChildDescriptor {
            label: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().display().to_string(),
            guid: None,
            is_leaf: !entry.file_type().is_dir(),
        });
    }
    Ok(children)
}

#[async_trait]
impl PageFetcher for FsFetcher {
    async fn discover_children(&self, node: &NodeInfo) -> CanopyResult<Vec<ChildDescriptor>> {
        let dir = PathBuf::from(&node.path);
        if !dir.is_dir() {
            return Err(CanopyError::TransientFetch(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let listed = dir.clone();
        let children = tokio::task::spawn_blocking(move || list_dir(&listed))
            .await
            .map_err(|e| CanopyError::TransientFetch(format!("listing task failed: {e}")))??;

        debug!(path = %dir.display(), children = children.len(), "directory listed");
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_sorted_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("beta")).unwrap();
        std::fs::write(dir.path().join("alpha.md"), "a").unwrap();
        std::fs::create_dir_all(dir.path().join("gamma").join("deep")).unwrap();

        let fetcher = FsFetcher::new(dir.path());
        let root = fetcher.root_task();
        let children = fetcher.discover_children(&root.node).await.unwrap();

        let labels: Vec<_> = children.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["alpha.md", "beta", "gamma"]);
        assert!(children[0].is_leaf);
        assert!(!children[1].is_leaf);
        assert!(!children[2].is_leaf);
    }

    #[tokio::test]
    async fn missing_directory_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsFetcher::new(dir.path().join("nope"));
        let err = fetcher
            .discover_children(&fetcher.root_task().node)
            .await
            .unwrap_err();
        assert!(matches!(err, CanopyError::TransientFetch(_)));
    }

    #[test]
    fn root_task_uses_directory_name() {
        let fetcher = FsFetcher::new("/srv/docs");
        let task = fetcher.root_task();
        assert_eq!(task.id, "1");
        assert_eq!(task.node.label, "docs");
        assert_eq!(task.node.depth, 0);
    }
}
