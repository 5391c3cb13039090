//! Shell resolution and AI command-string interpretation.
//!
//! Two concerns live here:
//!
//! - **Probing** — picking the binary and home directory for the shared
//!   developer terminal ([`resolve_login_shell`], [`resolve_home_dir`]).
//! - **Command interpretation** — turning a configured AI command string
//!   plus a session working directory into the `bash -c` invocation that
//!   actually runs on the PTY ([`interpret_ai_command`]).

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub mod pty;

/// A fully resolved PTY launch: `bash -c <command_line>` in `working_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiInvocation {
    pub working_dir: String,
    /// The string handed to `bash -c`, including the leading `cd`.
    pub command_line: String,
}

/// Interpret a configured AI command string for a session rooted at
/// `session_dir`.
///
/// The command is always launched as `bash -c "cd <dir> && <command>"`. When
/// the command carries a `--workdir <dir>` pair, that directory replaces the
/// session directory and the pair is stripped from the command; stripping
/// that leaves nothing substitutes the literal `claude`.
pub fn interpret_ai_command(command: &str, session_dir: &str) -> AiInvocation {
    let mut tokens: Vec<&str> = command.split_whitespace().collect();
    let mut working_dir = session_dir.to_string();

    if let Some(idx) = tokens.iter().position(|t| *t == "--workdir") {
        if idx + 1 < tokens.len() {
            working_dir = tokens[idx + 1].to_string();
            tokens.drain(idx..=idx + 1);
        }
    }

    let mut remaining = tokens.join(" ");
    if remaining.is_empty() {
        remaining = "claude".to_string();
    }

    AiInvocation {
        command_line: format!("cd {} && {}", shell_quote(&working_dir), remaining),
        working_dir,
    }
}

/// Single-quote a string for safe embedding in a shell command line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Environment injected into every PTY child, overriding inherited values.
pub fn terminal_env() -> HashMap<String, String> {
    HashMap::from([
        ("TERM".to_string(), "xterm-color".to_string()),
        ("COLORTERM".to_string(), "truecolor".to_string()),
    ])
}

/// Pick the developer-terminal shell: `$SHELL`, then `/bin/zsh`,
/// `/bin/bash`, `/bin/sh` — the first that exists and is executable.
pub fn resolve_login_shell() -> String {
    let mut candidates: Vec<String> = Vec::new();
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            candidates.push(shell);
        }
    }
    candidates.extend(
        ["/bin/zsh", "/bin/bash", "/bin/sh"]
            .iter()
            .map(ToString::to_string),
    );
    candidates
        .into_iter()
        .find(|p| is_executable(p))
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Pick the developer-terminal working directory: `$HOME`, then the process
/// working directory, then `/` — the first that exists.
pub fn resolve_home_dir() -> String {
    if let Ok(home) = std::env::var("HOME") {
        if Path::new(&home).is_dir() {
            return home;
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.is_dir() {
            return cwd.to_string_lossy().into_owned();
        }
    }
    "/".to_string()
}

fn is_executable(path: &str) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_cds_into_session_dir() {
        let inv = interpret_ai_command("claude", "/tmp/project");
        assert_eq!(inv.working_dir, "/tmp/project");
        assert_eq!(inv.command_line, "cd '/tmp/project' && claude");
    }

    #[test]
    fn workdir_flag_replaces_session_dir() {
        let inv = interpret_ai_command("claude --workdir /srv/other --verbose", "/tmp/project");
        assert_eq!(inv.working_dir, "/srv/other");
        assert_eq!(inv.command_line, "cd '/srv/other' && claude --verbose");
    }

    #[test]
    fn bare_workdir_pair_falls_back_to_claude() {
        let inv = interpret_ai_command("--workdir /srv/other", "/tmp/project");
        assert_eq!(inv.working_dir, "/srv/other");
        assert_eq!(inv.command_line, "cd '/srv/other' && claude");
    }

    #[test]
    fn trailing_workdir_without_value_passes_through() {
        let inv = interpret_ai_command("claude --workdir", "/tmp/project");
        assert_eq!(inv.working_dir, "/tmp/project");
        assert_eq!(inv.command_line, "cd '/tmp/project' && claude --workdir");
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        let inv = interpret_ai_command("claude", "/tmp/o'brien");
        assert_eq!(inv.command_line, r"cd '/tmp/o'\''brien' && claude");
    }

    #[test]
    fn terminal_env_overrides() {
        let env = terminal_env();
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm-color"));
        assert_eq!(env.get("COLORTERM").map(String::as_str), Some("truecolor"));
    }

    #[test]
    fn login_shell_resolves_to_existing_binary() {
        let shell = resolve_login_shell();
        assert!(std::path::Path::new(&shell).exists(), "{shell} should exist");
    }

    #[test]
    fn home_dir_resolves_to_directory() {
        assert!(std::path::Path::new(&resolve_home_dir()).is_dir());
    }
}
