use std::path::PathBuf;

pub enum DaemonEvent {
    /// The first ADM file was found and is now being tailed from its end.
    TrackingStarted(PathBuf),
    /// A newer ADM file replaced the one being tailed.
    FileSwitched { from: PathBuf, to: PathBuf },
    /// Ctrl+C / SIGTERM received; flush the queue and exit.
    Shutdown,
}
