//! Text heuristics over commands and captured output.
//!
//! None of these understand the programs involved; they pattern-match
//! strings well enough to pick a route, offer a hint or recover from a
//! container name clash.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::output::Route;

/// Longest tab title derived from a command line.
pub const MAX_TAB_TITLE: usize = 72;

pub const NOT_RUNNING_HINT: &str =
    "Hint: start the required services first (containers: press 'u').\n";

static CONTAINER_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"container name "([^"]+)" is already in use"#).expect("conflict pattern is valid")
});

/// Distinct container names reported as already in use, sorted.
pub fn parse_container_name_conflicts(output: &str) -> Vec<String> {
    CONTAINER_CONFLICT
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn is_long_running_make_target(target: &str) -> bool {
    matches!(target.trim(), "up" | "up-all" | "runserver" | "watch" | "storybook")
}

/// Commands that keep running until stopped and belong on the logs route.
pub fn is_long_running_command(command: &str) -> bool {
    let words: Vec<&str> = command.split_whitespace().collect();
    if words.is_empty() {
        return false;
    }
    if words.first() == Some(&"make") {
        return words[1..].iter().any(|t| is_long_running_make_target(t));
    }
    if words.iter().any(|w| *w == "runserver" || *w == "watch" || *w == "--watch") {
        return true;
    }
    let compose_up = words
        .windows(2)
        .any(|pair| pair[0] == "compose" && pair[1] == "up")
        || words.windows(2).any(|pair| pair[0] == "docker-compose" && pair[1] == "up");
    compose_up && !words.iter().any(|w| *w == "-d" || *w == "--detach")
}

/// Route a free-form command should run on.
pub fn route_for_command(command: &str) -> Route {
    if is_long_running_command(command) {
        Route::Logs
    } else {
        Route::Command
    }
}

/// Commands that usually wait for operator input.
pub fn is_likely_interactive_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.windows(2).any(|pair| pair[0] == "compose" && pair[1] == "exec") {
        return true;
    }
    words.iter().any(|w| {
        matches!(
            *w,
            "createsuperuser" | "shell" | "dbshell" | "changepassword" | "shell_plus"
        )
    })
}

/// Whether the tail of captured output looks like a prompt waiting on stdin.
pub fn has_interactive_prompt(text: &str) -> bool {
    let last = text.rsplit(['\n', '\r']).find(|l| !l.trim().is_empty()).unwrap_or("");
    if text.ends_with('\n') {
        // A finished line is output, not a prompt, unless it asks for a password.
        return last.to_lowercase().trim_end().ends_with("password:");
    }
    let trimmed = last.trim_end_matches([' ', '\t']);
    let lower = trimmed.to_lowercase();
    last.ends_with(": ")
        || last.ends_with("? ")
        || last.ends_with(">>> ")
        || lower.ends_with("(y/n)")
        || lower.ends_with("[y/n]")
        || lower.ends_with("password:")
}

/// Tab title for a command line: trimmed, `Command` when blank, cut to
/// [`MAX_TAB_TITLE`] characters with a trailing `...`.
pub fn tab_title_from_command(command: &str) -> String {
    let command = command.trim();
    if command.is_empty() {
        return Route::Command.default_title().to_string();
    }
    if command.chars().count() <= MAX_TAB_TITLE {
        return command.to_string();
    }
    let cut: String = command.chars().take(MAX_TAB_TITLE - 3).collect();
    format!("{}...", cut.trim_end())
}

/// Hint for failed runs whose output shows a missing dependency.
pub fn exit_hint(output: &str) -> Option<&'static str> {
    output
        .to_lowercase()
        .contains("is not running")
        .then_some(NOT_RUNNING_HINT)
}
