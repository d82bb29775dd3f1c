use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::OnceLock;

/// Timestamp layout for transcript entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%6f";

static SPINNER_REGEX: OnceLock<Regex> = OnceLock::new();
static CURSOR_REGEX: OnceLock<Regex> = OnceLock::new();

/// Strip spinner glyph groups and cursor-reposition residue from a line.
///
/// Runs to a fixed point, so `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(line: &str) -> String {
    // 1. Bracketed progress groups ([-] [\] [|] [/-] and friends) plus ESC[<n>D
    let spinner = SPINNER_REGEX.get_or_init(|| {
        Regex::new(r"\[-\]|\[\\\]|\[\|\]|\[/-\]|\[[^\]]*\]|\x1b\[\d+D")
            .expect("Invalid Spinner Regex")
    });
    // 2. Cursor-left residue whose escape byte was already eaten
    let cursor = CURSOR_REGEX
        .get_or_init(|| Regex::new(r"\[3D[^\]]*").expect("Invalid Cursor Regex"));

    let mut current = line.to_string();
    loop {
        let pass = spinner.replace_all(&current, "");
        let pass = cursor.replace_all(&pass, "").into_owned();
        if pass == current {
            return current;
        }
        current = pass;
    }
}

/// One line as read off the wire.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub raw: String,
    pub sanitized: String,
    pub captured_at: DateTime<Local>,
}

impl LogLine {
    pub fn capture(bytes: &[u8]) -> Self {
        Self::captured_at(bytes, Local::now())
    }

    pub fn captured_at(bytes: &[u8], at: DateTime<Local>) -> Self {
        let raw = String::from_utf8_lossy(bytes).into_owned();
        let sanitized = sanitize(&raw);
        Self {
            raw,
            sanitized,
            captured_at: at,
        }
    }

    /// `<timestamp> <sanitized text>`, as it goes into the transcript.
    pub fn transcript_entry(&self) -> String {
        format!(
            "{} {}",
            self.captured_at.format(TIMESTAMP_FORMAT),
            self.sanitized
        )
    }
}
