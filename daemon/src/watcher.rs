use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::tracker::LOG_EXTENSION;

fn is_new_log_file(event: &notify::Event) -> Option<&Path> {
    if !matches!(event.kind, notify::EventKind::Create(_)) {
        return None;
    }
    event
        .paths
        .iter()
        .find(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
        })
        .map(PathBuf::as_path)
}

/// Watches `dir` and forwards the path of every newly created ADM file to
/// `hint_tx`, so the tail loop can rescan without waiting for its next file
/// check. Polling stays authoritative: if the watcher cannot be set up this
/// returns and nothing else changes.
pub async fn watch_directory(dir: PathBuf, hint_tx: mpsc::Sender<PathBuf>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "Failed to create directory watcher; relying on polling");
            return;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        warn!(path = %dir.display(), error = %e, "Failed to watch logs directory; relying on polling");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        if let Some(path) = is_new_log_file(&event) {
            debug!(path = %path.display(), "New ADM file created");
            if hint_tx.send(path.to_path_buf()).await.is_err() {
                break;
            }
        }
    }
}
