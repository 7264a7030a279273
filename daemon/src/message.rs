/// Discord message text for a parsed kill.
use crate::parser::KillEvent;

/// Characters Discord treats as markdown.
const MARKDOWN_CHARS: [char; 6] = ['\\', '*', '_', '`', '~', '|'];

/// Backslash-escapes Discord markdown characters in `text`.
pub fn sanitize_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Renders `**killer** killed **victim** with weapon (123m)`.
/// The distance suffix is left out when the log line carried none.
pub fn format_kill(event: &KillEvent) -> String {
    let weapon = if event.weapon == "Unknown" {
        "unknown weapon"
    } else {
        event.weapon.as_str()
    };
    let distance = event
        .distance
        .map(|m| format!(" ({}m)", m.round() as i64))
        .unwrap_or_default();

    format!(
        "**{}** killed **{}** with {}{}",
        sanitize_markdown(&event.killer),
        sanitize_markdown(&event.victim),
        weapon,
        distance
    )
}
