//! Line indexing, search, selection, clipboard export and live input.

use std::io;
use std::sync::LazyLock;

use regex::Regex;

/// Split text into logical lines on `\n`, `\r\n` or `\r`.
///
/// A single trailing line terminator does not open an extra empty line, so
/// `"a\nb\n"` has two lines. Empty text has none.
pub fn output_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Line at `index`, clamped to the last line. Empty input yields `""`.
pub fn line_at<'a>(lines: &[&'a str], index: usize) -> &'a str {
    match lines.len() {
        0 => "",
        len => lines[index.min(len - 1)],
    }
}

/// Nearest line containing `query` (case-insensitive), scanning outward
/// from `from`. At equal distance the forward match wins.
///
/// An empty query returns `from` clamped to the last line.
pub fn next_match_index<S: AsRef<str>>(lines: &[S], query: &str, from: usize) -> Option<usize> {
    if lines.is_empty() {
        return None;
    }
    let from = from.min(lines.len() - 1);
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Some(from);
    }

    let matches = |idx: usize| lines[idx].as_ref().to_lowercase().contains(&query);
    if matches(from) {
        return Some(from);
    }
    for distance in 1..lines.len() {
        let forward = from + distance;
        if forward < lines.len() && matches(forward) {
            return Some(forward);
        }
        if distance <= from && matches(from - distance) {
            return Some(from - distance);
        }
    }
    None
}

/// Like [`next_match_index`] but skipping the current line, so repeated
/// "search next" moves on to the following match (wrapping).
pub fn next_match_after<S: AsRef<str>>(lines: &[S], query: &str, from: usize) -> Option<usize> {
    let query = query.trim().to_lowercase();
    if lines.is_empty() || query.is_empty() {
        return None;
    }
    let len = lines.len();
    let from = from.min(len - 1);
    (1..=len)
        .map(|step| (from + step) % len)
        .find(|idx| lines[*idx].as_ref().to_lowercase().contains(&query))
}

/// Sorted `(start, end)` pair.
pub fn normalize_range(a: usize, b: usize) -> (usize, usize) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Line-range selection inside the active tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub anchor: usize,
    pub cursor: usize,
}

impl Selection {
    /// Both ends anchored at `line`.
    pub fn at(line: usize) -> Self {
        Self { anchor: line, cursor: line }
    }

    /// Move the cursor end, clamped to `[0, last]`.
    pub fn move_cursor(&mut self, delta: isize, last: usize) {
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
    }

    pub fn range(&self) -> (usize, usize) {
        normalize_range(self.anchor, self.cursor)
    }

    pub fn contains(&self, line: usize) -> bool {
        let (start, end) = self.range();
        (start..=end).contains(&line)
    }
}

/// Text of the selected lines, or of `current_line` when nothing is
/// selected. Out-of-range indices clamp.
pub fn selected_text(text: &str, selection: Option<Selection>, current_line: usize) -> String {
    let lines = output_lines(text);
    if lines.is_empty() {
        return String::new();
    }
    let last = lines.len() - 1;
    let (start, end) = selection.map(|s| s.range()).unwrap_or((current_line, current_line));
    let (start, end) = (start.min(last), end.min(last));
    lines[start..=end].join("\n")
}

/// CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`) and two-byte escapes.
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("escape pattern is valid")
});

fn strip_terminal_noise(text: &str) -> String {
    let text = ESCAPES.replace_all(text, "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    text.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect()
}

/// Text safe to render in a terminal widget: escape sequences and
/// control characters removed, line endings normalised to `\n`.
pub fn sanitize_output_for_display(text: &str) -> String {
    strip_terminal_noise(text)
}

/// Like [`sanitize_output_for_display`], with trailing newlines trimmed.
pub fn sanitize_output_for_clipboard(text: &str) -> String {
    strip_terminal_noise(text).trim_end_matches('\n').to_string()
}

/// Writable end of a running process' stdin.
///
/// Dropping the sink closes the stream.
pub trait InputSink: Send {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Destination for copied text.
pub trait ClipboardSink {
    /// Returns a short label of the mechanism used (`pbcopy`, `osc52`).
    fn copy(&mut self, text: &str) -> Result<String, String>;
}
