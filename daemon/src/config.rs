use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DELAY_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_FILE_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CONFIG_FILE: &str = "killfeed.toml";
pub const DEFAULT_USERNAME: &str = "DayZ Killfeed";
pub const DEFAULT_AVATAR_URL: &str =
    "https://cdn.cloudflare.steamstatic.com/steam/apps/221100/header.jpg";

/// Command-line flags. Every flag overrides the matching config file key.
#[derive(Debug, Default, Parser)]
#[command(version, about = "Posts DayZ PvP kills from the ADM log to a Discord webhook")]
pub struct Cli {
    /// Discord webhook URL.
    #[arg(long)]
    pub discord_webhook: Option<String>,
    /// Directory containing the server's ADM log files.
    #[arg(long)]
    pub logs_path: Option<PathBuf>,
    /// Optional TOML config file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Seconds to hold each kill before posting it.
    #[arg(long)]
    pub delay: Option<u64>,
    /// Seconds between reads of the active log file.
    #[arg(long)]
    pub poll_interval: Option<u64>,
    /// Seconds between scans for a newer log file.
    #[arg(long)]
    pub file_check_interval: Option<u64>,
}

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub discord_webhook: Option<String>,
    pub logs_path: Option<PathBuf>,
    pub delay_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub file_check_interval_secs: Option<u64>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub fs_notify: Option<bool>,
}

/// Fully resolved and validated configuration handed to the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: String,
    pub watch_directory: PathBuf,
    pub delay: Duration,
    pub poll_interval: Duration,
    pub file_check_interval: Duration,
    pub username: String,
    pub avatar_url: Option<String>,
    /// Use filesystem notifications to spot new log files before the next scan.
    pub fs_notify: bool,
}

/// Loads the config file at `path`, returning an empty `FileConfig` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merges flags over the config file over defaults and validates the result.
pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Config> {
    let webhook_url = cli
        .discord_webhook
        .clone()
        .or(file.discord_webhook)
        .map(|url| url.trim().to_string())
        .unwrap_or_default();
    if webhook_url.is_empty() {
        bail!("Discord webhook URL is required. Set `discord_webhook` in the config file or pass --discord-webhook");
    }

    let watch_directory = match cli.logs_path.clone().or(file.logs_path) {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => bail!("Logs directory is required. Set `logs_path` in the config file or pass --logs-path"),
    };
    if !watch_directory.is_dir() {
        bail!(
            "Logs directory does not exist or is not a directory: {}",
            watch_directory.display()
        );
    }

    let delay_secs = cli.delay.or(file.delay_secs).unwrap_or(DEFAULT_DELAY_SECS);
    let poll_secs = cli
        .poll_interval
        .or(file.poll_interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let check_secs = cli
        .file_check_interval
        .or(file.file_check_interval_secs)
        .unwrap_or(DEFAULT_FILE_CHECK_INTERVAL_SECS);
    if poll_secs == 0 {
        bail!("Poll interval must be at least 1 second");
    }
    if check_secs == 0 {
        bail!("File check interval must be at least 1 second");
    }

    let avatar_url = match file.avatar_url {
        Some(url) if url.trim().is_empty() => None,
        Some(url) => Some(url),
        None => Some(DEFAULT_AVATAR_URL.to_string()),
    };

    Ok(Config {
        webhook_url,
        watch_directory,
        delay: Duration::from_secs(delay_secs),
        poll_interval: Duration::from_secs(poll_secs),
        file_check_interval: Duration::from_secs(check_secs),
        username: file.username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        avatar_url,
        fs_notify: file.fs_notify.unwrap_or(true),
    })
}

/// Reads the config file named by `cli` and resolves it against the flags.
pub fn load(cli: &Cli) -> Result<Config> {
    let file = load_or_default(&cli.config)?;
    resolve(cli, file)
}
