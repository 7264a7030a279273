/// PvP kill extraction from ADM log lines.
///
/// Only lines carrying one of the player-kill markers are considered. The
/// patterns below are tried most-specific first and the first structural match
/// wins; later patterns are never consulted once one has matched.
use regex::{Captures, Regex};
use std::sync::LazyLock;

const PLAYER_MARKER: &str = "killed by Player";
const ALT_PLAYER_MARKER: &str = "has been killed by player";
const SUICIDE_MARKER: &str = "committed suicide";

/// A single player-vs-player kill. Names are verbatim from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct KillEvent {
    /// Clock time from the line prefix, or the local time when the line had none.
    pub timestamp: String,
    pub killer: String,
    pub victim: String,
    pub weapon: String,
    /// Metres, unrounded.
    pub distance: Option<f64>,
}

/// Capture layout shared by every pattern: timestamp, victim, killer, weapon, distance.
/// Timestamp and distance groups are optional.
struct KillPattern {
    regex: Regex,
}

/// A weapon capture ending like this swallowed a distance suffix the pattern
/// did not recognise.
static DISTANCE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\sfrom [\d.]+\S*$").expect("invalid hardcoded distance pattern")
});

static KILL_PATTERNS: LazyLock<Vec<KillPattern>> = LazyLock::new(|| {
    [
        // HH:MM:SS | Player "V" ... killed by Player "K" ... with W from 12.3 meters / 12.3m
        r#"^(\d{2}:\d{2}:\d{2}) \| Player "([^"]+)" .*killed by Player "([^"]+)" .*with (.+?) from ([\d.]+) ?m(?:eters?)?"#,
        // Same without a distance suffix.
        r#"^(\d{2}:\d{2}:\d{2}) \| Player "([^"]+)" .*killed by Player "([^"]+)" .*with (.+?)\s*$()"#,
        // YYYY-MM-DD:HH:MM:SS | Player "V" ... has been killed by player "K" ... with W [from 12.3m]
        r#"^(\d{4}-\d{2}-\d{2}:\d{2}:\d{2}:\d{2}) \| Player "([^"]+)" .*has been killed by player "([^"]+)" .*with (.+?)(?: from ([\d.]+) ?m(?:eters?)?)?\s*$"#,
        // Anything else carrying both names and a weapon.
        r#"()Player "([^"]+)".*killed by [Pp]layer "([^"]+)".*?with (.+?)(?: from ([\d.]+) ?m(?:eters?)?)?\s*$"#,
    ]
    .into_iter()
    .map(|pattern| KillPattern {
        regex: Regex::new(pattern).expect("invalid hardcoded kill pattern"),
    })
    .collect()
});

impl KillPattern {
    /// Rejects a match whose weapon still carries a `from <number>` tail, so
    /// the line is left to a later pattern instead of being mangled.
    fn accepts(caps: &Captures<'_>) -> bool {
        !caps.get(4).is_some_and(|m| DISTANCE_SUFFIX.is_match(m.as_str()))
    }

    fn extract(&self, caps: &Captures<'_>) -> Option<KillEvent> {
        let group = |i: usize| caps.get(i).map(|m| m.as_str()).filter(|s| !s.is_empty());

        let victim = group(2)?;
        let killer = group(3)?;
        let weapon = group(4)?.trim();
        if weapon.is_empty() {
            return None;
        }
        let distance = match group(5) {
            Some(raw) => Some(raw.parse::<f64>().ok()?),
            None => None,
        };
        let timestamp = match group(1) {
            Some(ts) => ts.to_string(),
            None => chrono::Local::now().format("%H:%M:%S").to_string(),
        };

        Some(KillEvent {
            timestamp,
            killer: killer.to_string(),
            victim: victim.to_string(),
            weapon: weapon.to_string(),
            distance,
        })
    }
}

/// Parses one log line, returning `None` for anything that is not a PvP kill.
pub fn parse_line(line: &str) -> Option<KillEvent> {
    let line = line.trim_end_matches(['\r', '\n']);

    if !(line.contains(PLAYER_MARKER) || line.contains(ALT_PLAYER_MARKER)) {
        return None;
    }
    if line.contains(SUICIDE_MARKER) {
        return None;
    }

    let (pattern, caps) = KILL_PATTERNS
        .iter()
        .find_map(|p| {
            p.regex
                .captures(line)
                .filter(KillPattern::accepts)
                .map(|caps| (p, caps))
        })?;
    let event = pattern.extract(&caps)?;

    // Self-inflicted.
    if event.killer == event.victim {
        return None;
    }
    Some(event)
}
