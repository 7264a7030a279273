/// Latest-ADM-file discovery and an append-only read cursor.
///
/// The server starts a new ADM file on every restart. Candidates are ranked by
/// the date embedded in their filename, falling back to the modification time
/// for names without one (e.g. the static `DayZServer_x64.ADM`).
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const LOG_EXTENSION: &str = "ADM";

/// Upper bound on bytes consumed by one `read_new_lines` call.
const MAX_READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

// DayZServer_x64_2025_05_24_224940076.ADM
static UNDERSCORE_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})_(\d{2})_(\d{2})_(\d{2})(\d{2})(\d{2})(\d{3})?\d*\.[^.]+$")
        .expect("invalid hardcoded filename pattern")
});

// DayZServer_x64_2025-08-12_13-38-51.ADM
static DASH_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})_(\d{2})-(\d{2})-(\d{2})")
        .expect("invalid hardcoded filename pattern")
});

/// Returns the local date-time embedded in an ADM filename, if any.
pub fn filename_timestamp(name: &str) -> Option<NaiveDateTime> {
    if let Some(caps) = UNDERSCORE_STAMP.captures(name) {
        let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let millis = n(7).unwrap_or(0);
        if let Some(ts) = build_timestamp(n(1)?, n(2)?, n(3)?, n(4)?, n(5)?, n(6)?, millis) {
            return Some(ts);
        }
    }
    if let Some(caps) = DASH_STAMP.captures(name) {
        let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        return build_timestamp(n(1)?, n(2)?, n(3)?, n(4)?, n(5)?, n(6)?, 0);
    }
    None
}

fn build_timestamp(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?
        .and_hms_milli_opt(hour, minute, second, millis)
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
}

/// Derives the comparable timestamp for one candidate.
fn candidate_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let from_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(filename_timestamp);
    if from_name.is_some() {
        return from_name;
    }
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

/// Returns the newest ADM file in `dir`, or `Ok(None)` when there is none yet.
/// Ties on timestamp resolve to the lexicographically greatest path.
pub fn discover_latest(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut latest: Option<(NaiveDateTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !is_log_file(&path) || !path.is_file() {
            continue;
        }
        let Some(ts) = candidate_timestamp(&path) else {
            debug!(path = %path.display(), "no usable timestamp; skipping");
            continue;
        };
        let newer = match &latest {
            None => true,
            Some((best_ts, best_path)) => (ts, &path) > (*best_ts, best_path),
        };
        if newer {
            latest = Some((ts, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Read position in the file currently being tailed.
///
/// The file is reopened for every read so the writing server never contends
/// with a long-lived handle.
#[derive(Debug)]
pub struct LogCursor {
    path: PathBuf,
    position: u64,
    /// Bytes of a line whose newline has not been written yet.
    partial: Vec<u8>,
}

impl LogCursor {
    /// Opens `path` positioned at its current end so existing content is never replayed.
    pub fn open_at_end(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let position = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            position,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns every complete line appended since the last call.
    ///
    /// A trailing line without its newline is held back until it is completed.
    /// A missing, locked or shrunken file yields no lines; nothing is raised.
    pub fn read_new_lines(&mut self) -> Vec<String> {
        let bytes = match self.read_appended() {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "log file is gone; waiting for a replacement");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read log file; retrying next poll");
                return Vec::new();
            }
        };
        if bytes.is_empty() {
            return Vec::new();
        }

        self.partial.extend_from_slice(&bytes);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        complete
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn read_appended(&mut self) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();

        if len < self.position {
            debug!(
                path = %self.path.display(),
                previous_position = self.position,
                current_size = len,
                "log file shrank; moving cursor to new end"
            );
            self.position = len;
            self.partial.clear();
            return Ok(Vec::new());
        }
        if len == self.position {
            return Ok(Vec::new());
        }

        let to_read = (len - self.position).min(MAX_READ_CHUNK_BYTES);
        file.seek(SeekFrom::Start(self.position))?;
        let mut buf = Vec::with_capacity(to_read as usize);
        file.take(to_read).read_to_end(&mut buf)?;
        self.position += buf.len() as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().append(true).create(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let f = OpenOptions::new().write(true).open(path).unwrap();
        f.set_modified(time).unwrap();
    }

    // ── filename_timestamp ────────────────────────────────────────────────────

    #[test]
    fn parses_underscore_layout_with_millis() {
        let ts = filename_timestamp("DayZServer_x64_2025_05_24_224940076.ADM").unwrap();
        assert_eq!(ts.to_string(), "2025-05-24 22:49:40.076");
    }

    #[test]
    fn parses_dash_layout() {
        let ts = filename_timestamp("DayZServer_x64_2025-08-12_13-38-51.ADM").unwrap();
        assert_eq!(ts.to_string(), "2025-08-12 13:38:51");
    }

    #[test]
    fn static_name_has_no_timestamp() {
        assert!(filename_timestamp("DayZServer_x64.ADM").is_none());
    }

    #[test]
    fn invalid_calendar_date_has_no_timestamp() {
        assert!(filename_timestamp("DayZServer_x64_2025_13_40_250000000.ADM").is_none());
        assert!(filename_timestamp("DayZServer_x64_2025-02-30_10-00-00.ADM").is_none());
    }

    #[test]
    fn millis_order_files_within_the_same_second() {
        let a = filename_timestamp("DayZServer_x64_2025_05_24_224940076.ADM").unwrap();
        let b = filename_timestamp("DayZServer_x64_2025_05_24_224940900.ADM").unwrap();
        assert!(b > a);
    }

    // ── discover_latest ───────────────────────────────────────────────────────

    #[test]
    fn empty_directory_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_latest(dir.path()).unwrap(), None);
    }

    #[test]
    fn ignores_non_adm_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DayZServer_x64_2030_01_01_000000000.RPT"), "").unwrap();
        std::fs::write(dir.path().join("server.log"), "").unwrap();
        assert_eq!(discover_latest(dir.path()).unwrap(), None);
    }

    #[test]
    fn picks_greatest_filename_timestamp_regardless_of_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let names = [
            "DayZServer_x64_2025_05_24_224940076.ADM",
            "DayZServer_x64_2025-08-12_13-38-51.ADM",
            "DayZServer_x64_2025_08_12_133850999.ADM",
            "DayZServer_x64_2024-12-31_23-59-59.ADM",
        ];
        // Oldest-named file gets written last so listing/mtime order disagrees.
        for name in names.iter().rev() {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let latest = discover_latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest, dir.path().join("DayZServer_x64_2025-08-12_13-38-51.ADM"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DayZServer_x64_2025-08-12_13-38-51.adm"), "").unwrap();
        assert!(discover_latest(dir.path()).unwrap().is_some());
    }

    #[test]
    fn unnamed_file_competes_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let stamped = dir.path().join("DayZServer_x64_2020_01_01_000000000.ADM");
        let static_name = dir.path().join("DayZServer_x64.ADM");
        std::fs::write(&stamped, "").unwrap();
        std::fs::write(&static_name, "").unwrap();

        // Freshly written: mtime is now, which beats 2020.
        assert_eq!(discover_latest(dir.path()).unwrap().unwrap(), static_name);

        // Push the static file's mtime back before the stamped name.
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(946_684_800); // 2000-01-01
        set_mtime(&static_name, old);
        assert_eq!(discover_latest(dir.path()).unwrap().unwrap(), stamped);
    }

    #[test]
    fn equal_timestamps_pick_greatest_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a_2025-08-12_13-38-51.ADM");
        let b = dir.path().join("b_2025-08-12_13-38-51.ADM");
        std::fs::write(&b, "").unwrap();
        std::fs::write(&a, "").unwrap();
        assert_eq!(discover_latest(dir.path()).unwrap().unwrap(), b);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_latest(&dir.path().join("missing")).is_err());
    }

    // ── LogCursor ─────────────────────────────────────────────────────────────

    #[test]
    fn open_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "old line 1\nold line 2\n").unwrap();

        let mut cursor = LogCursor::open_at_end(&path).unwrap();
        assert_eq!(cursor.position(), 22);
        assert!(cursor.read_new_lines().is_empty());
    }

    #[test]
    fn returns_lines_appended_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "old\n").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        append(&path, "first\nsecond\r\n");
        assert_eq!(cursor.read_new_lines(), vec!["first", "second"]);
        assert!(cursor.read_new_lines().is_empty());

        append(&path, "third\n");
        assert_eq!(cursor.read_new_lines(), vec!["third"]);
    }

    #[test]
    fn holds_back_partial_line_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        append(&path, "complete\npart");
        assert_eq!(cursor.read_new_lines(), vec!["complete"]);

        append(&path, "ial");
        assert!(cursor.read_new_lines().is_empty());

        append(&path, " line\n");
        assert_eq!(cursor.read_new_lines(), vec!["partial line"]);
    }

    #[test]
    fn skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        append(&path, "\n\r\none\n\n");
        assert_eq!(cursor.read_new_lines(), vec!["one"]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"bad \xff byte\n").unwrap();
        let lines = cursor.read_new_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("bad "));
        assert!(lines[0].ends_with(" byte"));
    }

    #[test]
    fn vanished_file_yields_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "x\n").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(cursor.read_new_lines().is_empty());
    }

    #[test]
    fn shrunken_file_moves_cursor_to_new_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ADM");
        std::fs::write(&path, "a long line of old content\n").unwrap();
        let mut cursor = LogCursor::open_at_end(&path).unwrap();

        std::fs::write(&path, "short\n").unwrap();
        assert!(cursor.read_new_lines().is_empty());
        assert_eq!(cursor.position(), 6);

        append(&path, "after truncate\n");
        assert_eq!(cursor.read_new_lines(), vec!["after truncate"]);
    }

    #[test]
    fn open_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogCursor::open_at_end(&dir.path().join("nope.ADM")).is_err());
    }
}
