/// Wires the tail loop and the queue consumer together and runs them until a
/// shutdown request, then drains the queue.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::Config;
use crate::event::DaemonEvent;
use crate::queue::{self, Deliver, DeliveryQueue, DeliveryReport};
use crate::tail::{self, TailTimings, Tailer};
use crate::watcher;

/// Runs the daemon until `shutdown` resolves.
///
/// On shutdown no further polls are scheduled, both loops are awaited (an
/// in-flight delivery finishes first) and every message still queued is sent
/// immediately in FIFO order. Returns the outcome of that final flush.
pub async fn run<D, S>(config: Config, deliverer: Arc<D>, shutdown: S) -> DeliveryReport
where
    D: Deliver + 'static,
    S: Future<Output = ()> + Send + 'static,
{
    let queue = Arc::new(DeliveryQueue::new());
    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (hint_tx, hint_rx) = mpsc::channel(16);

    // ── Background tasks ──────────────────────────────────────────────────────
    let watcher_handle = config
        .fs_notify
        .then(|| tokio::spawn(watcher::watch_directory(config.watch_directory.clone(), hint_tx)));

    let tail_handle = tokio::spawn(tail::run(
        Tailer::new(config.watch_directory.clone(), config.delay, Arc::clone(&queue)),
        TailTimings {
            poll_interval: config.poll_interval,
            file_check_interval: config.file_check_interval,
        },
        hint_rx,
        event_tx.clone(),
        stop_rx.clone(),
    ));

    let consumer_handle = tokio::spawn(queue::run_consumer(
        Arc::clone(&queue),
        Arc::clone(&deliverer),
        stop_rx,
    ));

    {
        let tx = event_tx;
        tokio::spawn(async move {
            shutdown.await;
            let _ = tx.send(DaemonEvent::Shutdown).await;
        });
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::TrackingStarted(path) => {
                info!(path = %path.display(), "Monitoring ADM file");
            }
            DaemonEvent::FileSwitched { from, to } => {
                info!(from = %from.display(), to = %to.display(), "Switched to newer ADM file");
            }
            DaemonEvent::Shutdown => {
                info!("Shutdown requested - sending all queued messages immediately");
                break;
            }
        }
    }

    // ── Drain ─────────────────────────────────────────────────────────────────
    drop(event_rx);
    let _ = stop_tx.send(true);
    let _ = tail_handle.await;
    let _ = consumer_handle.await;
    if let Some(handle) = watcher_handle {
        handle.abort();
    }

    let report = queue.flush_all(deliverer.as_ref()).await;
    info!(
        flushed = report.delivered,
        failed = report.failed,
        delivered_total = queue.delivered_count(),
        failed_total = queue.failed_count(),
        "Shutdown complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::RecordingDeliverer;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::oneshot;

    const KILL: &str = r#"22:19:08 | Player "Runner456" (DEAD) (id=123) killed by Player "Sniper123" (id=456) with DMR from 180.4 meters"#;
    const OLD_KILL: &str = r#"21:00:00 | Player "Old" (DEAD) (id=1) killed by Player "History" (id=2) with AKM from 10.0 meters"#;

    fn config(dir: &Path, delay: Duration) -> Config {
        Config {
            webhook_url: "https://discord.test/webhook".to_string(),
            watch_directory: dir.to_path_buf(),
            delay,
            poll_interval: Duration::from_millis(10),
            file_check_interval: Duration::from_millis(50),
            username: "DayZ Killfeed".to_string(),
            avatar_url: None,
            fs_notify: false,
        }
    }

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().append(true).create(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    /// Lets several poll and file-check intervals elapse.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn shutdown_flushes_messages_that_are_not_yet_due() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DayZServer_x64_2025_05_24_224940076.ADM");
        std::fs::write(&path, format!("{OLD_KILL}\n")).unwrap();

        let sink = Arc::new(RecordingDeliverer::default());
        let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run(
            config(dir.path(), Duration::from_secs(300)),
            Arc::clone(&sink),
            async {
                let _ = trigger_rx.await;
            },
        ));

        settle().await;
        append(&path, &format!("{KILL}\n"));
        settle().await;
        assert!(sink.sent().is_empty());

        trigger_tx.send(()).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 0 });
        assert_eq!(sink.sent(), vec!["**Sniper123** killed **Runner456** with DMR (180m)"]);
    }

    #[tokio::test]
    async fn due_messages_are_delivered_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DayZServer_x64_2025_05_24_224940076.ADM");
        std::fs::write(&path, "").unwrap();

        let sink = Arc::new(RecordingDeliverer::default());
        let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run(config(dir.path(), Duration::ZERO), Arc::clone(&sink), async {
            let _ = trigger_rx.await;
        }));

        settle().await;
        append(&path, &format!("{KILL}\n"));

        // The consumer ticks once per second.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        trigger_tx.send(()).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn switch_to_newer_file_ignores_old_file_writes() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("DayZServer_x64_2025-08-12_13-38-51.ADM");
        let new = dir.path().join("DayZServer_x64_2025-08-12_19-00-00.ADM");
        std::fs::write(&old, "").unwrap();

        let sink = Arc::new(RecordingDeliverer::default());
        let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run(
            config(dir.path(), Duration::from_secs(300)),
            Arc::clone(&sink),
            async {
                let _ = trigger_rx.await;
            },
        ));

        settle().await;
        std::fs::write(&new, format!("{OLD_KILL}\n")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        append(&old, &format!("{OLD_KILL}\n"));
        append(&new, &format!("{KILL}\n"));
        settle().await;

        trigger_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(sink.sent(), vec!["**Sniper123** killed **Runner456** with DMR (180m)"]);
    }

    #[tokio::test]
    async fn shutdown_before_any_file_exists_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingDeliverer::default());
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run(config(dir.path(), Duration::from_secs(300)), Arc::clone(&sink), async {}),
        )
        .await
        .unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert!(sink.sent().is_empty());
    }
}
