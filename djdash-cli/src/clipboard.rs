//! System clipboard: external copy utilities tried in order, then an
//! OSC 52 escape written to the terminal.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use djdash_core::interact::ClipboardSink;

pub const OSC52_LABEL: &str = "terminal (OSC 52)";

/// Default copy utilities for this platform, in priority order.
pub fn default_commands() -> Vec<Vec<String>> {
    let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
    if cfg!(target_os = "macos") {
        vec![argv(&["pbcopy"])]
    } else if cfg!(windows) {
        vec![argv(&["clip.exe"])]
    } else {
        vec![
            argv(&["wl-copy"]),
            argv(&["xclip", "-selection", "clipboard"]),
            argv(&["xsel", "--clipboard", "--input"]),
            // WSL
            argv(&["clip.exe"]),
        ]
    }
}

/// OSC 52 "set clipboard" sequence for `text`.
pub fn osc52_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", STANDARD.encode(text.as_bytes()))
}

pub struct SystemClipboard<W: Write> {
    commands: Vec<Vec<String>>,
    terminal: W,
}

impl SystemClipboard<io::Stdout> {
    /// `overrides` replaces the default utility chain when non-empty.
    pub fn new(overrides: &[Vec<String>]) -> Self {
        let commands = if overrides.is_empty() {
            default_commands()
        } else {
            overrides.to_vec()
        };
        Self::with_terminal(commands, io::stdout())
    }
}

impl<W: Write> SystemClipboard<W> {
    pub fn with_terminal(commands: Vec<Vec<String>>, terminal: W) -> Self {
        let commands = commands.into_iter().filter(|argv| !argv.is_empty()).collect();
        Self { commands, terminal }
    }

    fn pipe_to(argv: &[String], text: &str) -> io::Result<()> {
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("{} exited with {status}", argv[0])))
        }
    }

    fn write_osc52(&mut self, text: &str) -> io::Result<()> {
        self.terminal.write_all(osc52_sequence(text).as_bytes())?;
        self.terminal.flush()
    }
}

impl<W: Write> ClipboardSink for SystemClipboard<W> {
    fn copy(&mut self, text: &str) -> Result<String, String> {
        for argv in &self.commands {
            match Self::pipe_to(argv, text) {
                Ok(()) => return Ok(argv[0].clone()),
                Err(e) => debug!(program = %argv[0], error = %e, "clipboard utility unavailable"),
            }
        }
        self.write_osc52(text).map_err(|e| e.to_string())?;
        Ok(OSC52_LABEL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osc52_sequence() {
        assert_eq!(osc52_sequence("hi"), "\x1b]52;c;aGk=\x07");
    }

    #[test]
    fn test_falls_back_to_osc52() {
        let missing = vec![vec!["djdash-no-such-clipboard-tool".to_string()]];
        let mut clip = SystemClipboard::with_terminal(missing, Vec::new());
        assert_eq!(clip.copy("hello").unwrap(), OSC52_LABEL);
        assert_eq!(String::from_utf8(clip.terminal).unwrap(), osc52_sequence("hello"));
    }

    #[cfg(unix)]
    #[test]
    fn test_first_working_utility_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("clip.txt");
        let commands = vec![
            vec!["false".to_string()],
            vec!["sh".into(), "-c".into(), format!("cat > '{}'", out.display())],
        ];
        let mut clip = SystemClipboard::with_terminal(commands, Vec::new());
        assert_eq!(clip.copy("copied text").unwrap(), "sh");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "copied text");
        assert!(clip.terminal.is_empty());
    }
}
