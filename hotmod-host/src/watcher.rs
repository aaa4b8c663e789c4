//! Directory scan and watch loop
//!
//! The `notify` callback runs on the watcher's own thread and forwards raw
//! events into a channel; a tokio task turns them into per-path operations.

use crate::{HostError, ManagerConfig};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a filesystem event means for the module at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Create,
    Write,
    Remove,
}

/// Translate a raw event into per-path operations
///
/// A rename source counts as a removal and a rename target as a creation.
/// Access, metadata and unknown events are ignored.
pub fn classify(event: &Event) -> Vec<(PathBuf, WatchOp)> {
    let op = match &event.kind {
        EventKind::Create(_) => WatchOp::Create,
        EventKind::Remove(_) => WatchOp::Remove,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            WatchOp::Write
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchOp::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchOp::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            let mut ops = Vec::new();
            if let Some(from) = event.paths.first() {
                ops.push((from.clone(), WatchOp::Remove));
            }
            if let Some(to) = event.paths.get(1) {
                ops.push((to.clone(), WatchOp::Create));
            }
            return ops;
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // the backend could not tell which side of the rename this is
            return event
                .paths
                .iter()
                .map(|path| {
                    let op = if path.exists() {
                        WatchOp::Create
                    } else {
                        WatchOp::Remove
                    };
                    (path.clone(), op)
                })
                .collect();
        }
        _ => return Vec::new(),
    };

    event.paths.iter().map(|path| (path.clone(), op)).collect()
}

/// List module files directly under `root`, sorted by path
pub fn scan_directory(root: &Path, config: &ManagerConfig) -> Result<Vec<PathBuf>, HostError> {
    let entries = std::fs::read_dir(root).map_err(|source| HostError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && config.matches(path))
        .collect();
    paths.sort();
    Ok(paths)
}

/// A running watch on one directory
pub(crate) struct WatchLoop {
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchLoop {
    /// Watch `root` non-recursively and feed each operation to `dispatch`
    pub(crate) fn spawn<F>(root: &Path, dispatch: F) -> Result<Self, HostError>
    where
        F: Fn(&Path, WatchOp) + Send + 'static,
    {
        let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.blocking_send(res);
        })?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        tracing::info!(dir = %root.display(), "Watching directory for modules");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Watch loop shutting down");
                        break;
                    }

                    res = event_rx.recv() => match res {
                        Some(Ok(event)) => {
                            for (path, op) in classify(&event) {
                                dispatch(&path, op);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Watch error");
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            shutdown_tx,
            task,
        })
    }

    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_classify_basic_kinds() {
        let created = event(EventKind::Create(CreateKind::File), &["/m/a.so"]);
        assert_eq!(classify(&created), vec![(PathBuf::from("/m/a.so"), WatchOp::Create)]);

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/m/a.so"],
        );
        assert_eq!(classify(&written), vec![(PathBuf::from("/m/a.so"), WatchOp::Write)]);

        let removed = event(EventKind::Remove(RemoveKind::File), &["/m/a.so"]);
        assert_eq!(classify(&removed), vec![(PathBuf::from("/m/a.so"), WatchOp::Remove)]);

        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/m/a.so"],
        );
        assert!(classify(&touched).is_empty());
    }

    #[test]
    fn test_classify_renames() {
        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/m/a.so"],
        );
        assert_eq!(classify(&from), vec![(PathBuf::from("/m/a.so"), WatchOp::Remove)]);

        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/m/a.so.tmp", "/m/a.so"],
        );
        assert_eq!(
            classify(&both),
            vec![
                (PathBuf::from("/m/a.so.tmp"), WatchOp::Remove),
                (PathBuf::from("/m/a.so"), WatchOp::Create),
            ]
        );
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mod"), b"").unwrap();
        std::fs::write(dir.path().join("a.mod"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested.mod")).unwrap();

        let config = ManagerConfig::new(dir.path()).with_suffix(".mod");
        let paths = scan_directory(dir.path(), &config).unwrap();
        assert_eq!(
            paths,
            vec![dir.path().join("a.mod"), dir.path().join("b.mod")]
        );
    }

    #[test]
    fn test_scan_missing_directory() {
        let config = ManagerConfig::new("/nonexistent");
        let err = scan_directory(Path::new("/nonexistent/modules"), &config).unwrap_err();
        assert!(matches!(err, HostError::Io { .. }));
    }

    #[tokio::test]
    async fn test_watch_loop_reports_create_and_remove() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let watch = WatchLoop::spawn(&root, move |path, op| {
            let _ = tx.send((path.to_path_buf(), op));
        })
        .unwrap();

        let path = root.join("a.mod");
        std::fs::write(&path, b"module").unwrap();
        wait_for(&mut rx, &path, WatchOp::Create).await;

        std::fs::remove_file(&path).unwrap();
        wait_for(&mut rx, &path, WatchOp::Remove).await;

        watch.shutdown().await;
    }

    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<(PathBuf, WatchOp)>,
        path: &Path,
        op: WatchOp,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some((seen, seen_op)) = rx.recv().await {
                if seen == path && seen_op == op {
                    return;
                }
            }
            panic!("watch loop closed");
        })
        .await
        .expect("timed out waiting for watch event");
    }
}
