//! # Script validator: hygiene filter applied before a worker is launched.
//!
//! ```text
//! validate(source, kind)
//!   ├─► length check           (< MIN_SOURCE_CHARS non-blank chars → reject)
//!   ├─► denylist scan          (first hit → reject)
//!   ├─► structural markers     (required → reject, soft → warning)
//!   └─► toolchain syntax check (error → reject; toolchain missing/slow → warning)
//! ```
//!
//! This is not an isolation boundary. Any encoding trick defeats a pattern
//! scan; real containment belongs to the [`Sandbox`](crate::Sandbox) hook.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::truncate_reason;
use crate::runtime::table::{Pattern, RuntimeKind, RuntimeTable};

/// Programs shorter than this (ignoring whitespace) are refused.
pub const MIN_SOURCE_CHARS: usize = 10;

/// Accepted program, possibly with advisory warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Validation {
    pub warnings: Vec<String>,
}

/// Refused program. `reason` is already truncated and safe to show the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    fn new(reason: impl AsRef<str>) -> Self {
        Self {
            reason: truncate_reason(reason.as_ref()),
        }
    }
}

/// Rule-based acceptance check per runtime kind.
#[derive(Clone, Debug)]
pub struct Validator {
    table: RuntimeTable,
    check_timeout: Duration,
}

impl Validator {
    pub fn new(table: RuntimeTable, check_timeout: Duration) -> Self {
        Self {
            table,
            check_timeout,
        }
    }

    /// Validates `source` for `kind`. Deterministic for a given toolchain.
    pub async fn validate(&self, source: &str, kind: RuntimeKind) -> Result<Validation, Rejection> {
        let mut outcome = self.check_static(source, kind)?;
        match self.check_syntax(source, kind).await {
            SyntaxOutcome::Clean => {}
            SyntaxOutcome::Skipped(why) => {
                tracing::warn!(runtime = %kind, reason = %why, "syntax check skipped");
                outcome.warnings.push(why);
            }
            SyntaxOutcome::Invalid(diag) => {
                return Err(Rejection::new(format!("syntax error: {diag}")));
            }
        }
        Ok(outcome)
    }

    /// Length, denylist and marker checks (no toolchain involved).
    pub fn check_static(&self, source: &str, kind: RuntimeKind) -> Result<Validation, Rejection> {
        let spec = self.table.spec(kind);

        let meaningful = source.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < MIN_SOURCE_CHARS {
            return Err(Rejection::new(format!(
                "script too short: at least {MIN_SOURCE_CHARS} characters required"
            )));
        }

        if let Some(hit) = spec.denylist.iter().find(|p| matches_pattern(source, p)) {
            return Err(Rejection::new(format!(
                "blocked construct detected: {}",
                hit.text()
            )));
        }

        let mut warnings = Vec::new();
        for marker in spec.markers {
            if marker.needles.iter().any(|n| source.contains(n)) {
                continue;
            }
            if marker.required {
                return Err(Rejection::new(format!(
                    "program must contain {}",
                    marker.describes
                )));
            }
            warnings.push(format!("no {} found", marker.describes));
        }

        Ok(Validation { warnings })
    }

    async fn check_syntax(&self, source: &str, kind: RuntimeKind) -> SyntaxOutcome {
        let Some((program, args)) = self.table.check_program(kind) else {
            return SyntaxOutcome::Clean;
        };
        let shown = program.to_string_lossy().into_owned();

        let mut child = match Command::new(&program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SyntaxOutcome::Skipped(format!("toolchain `{shown}` not installed"));
            }
            Err(e) => return SyntaxOutcome::Skipped(format!("toolchain `{shown}` failed: {e}")),
        };

        if let Some(mut stdin) = child.stdin.take() {
            // A checker that bails out early closes its stdin; its exit status tells the story.
            let _ = stdin.write_all(source.as_bytes()).await;
        }

        match tokio::time::timeout(self.check_timeout, child.wait_with_output()).await {
            Err(_) => SyntaxOutcome::Skipped(format!(
                "syntax check with `{shown}` timed out after {:?}",
                self.check_timeout
            )),
            Ok(Err(e)) => SyntaxOutcome::Skipped(format!("syntax check with `{shown}` failed: {e}")),
            Ok(Ok(out)) if out.status.success() => SyntaxOutcome::Clean,
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let diag = stderr
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .last()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("`{shown}` exited with {}", out.status));
                SyntaxOutcome::Invalid(diag)
            }
        }
    }
}

enum SyntaxOutcome {
    Clean,
    Skipped(String),
    Invalid(String),
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Returns true if `pattern` occurs in `source`.
pub fn matches_pattern(source: &str, pattern: &Pattern) -> bool {
    match *pattern {
        Pattern::Substring(needle) => source.contains(needle),
        Pattern::Word(word) => occurrences(source, word).any(|(before, after)| {
            !before.chars().next_back().is_some_and(is_ident)
                && !after.chars().next().is_some_and(is_ident)
        }),
        Pattern::Call(name) => occurrences(source, name).any(|(before, after)| {
            !before.chars().next_back().is_some_and(is_ident)
                && after.trim_start().starts_with('(')
        }),
    }
}

/// Yields `(text before, text after)` for each occurrence of `needle`.
fn occurrences<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
    haystack
        .match_indices(needle)
        .map(move |(at, _)| (&haystack[..at], &haystack[at + needle.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(RuntimeTable::default(), Duration::from_secs(10))
    }

    #[test]
    fn call_pattern_respects_identifier_boundaries() {
        let open = Pattern::Call("open");
        assert!(matches_pattern("f = open('x')", &open));
        assert!(matches_pattern("f = open ('x')", &open));
        assert!(!matches_pattern("opened = True", &open));
        assert!(!matches_pattern("reopen('x')", &open));
        assert!(!matches_pattern("is_open = 1", &open));

        let exec = Pattern::Call("exec");
        assert!(!matches_pattern("await execute(query)", &exec));
        assert!(matches_pattern("exec(code)", &exec));
    }

    #[test]
    fn word_pattern_respects_identifier_boundaries() {
        let sub = Pattern::Word("subprocess");
        assert!(matches_pattern("import subprocess", &sub));
        assert!(matches_pattern("from subprocess import run", &sub));
        assert!(!matches_pattern("my_subprocess_helper = 1", &sub));
    }

    #[test]
    fn denylisted_python_is_rejected_with_the_pattern() {
        let src = "import os\n\ndef handler():\n    os.system('ls')\n";
        let err = validator().check_static(src, RuntimeKind::Python).unwrap_err();
        assert_eq!(err.reason, "blocked construct detected: os.system");
    }

    #[test]
    fn same_text_can_be_fine_for_another_runtime() {
        let src = "console.log('calling os.system is a python thing'); bot.on('message', () => {})";
        assert!(validator().check_static(src, RuntimeKind::Node).is_ok());
    }

    #[test]
    fn short_program_is_rejected() {
        let err = validator()
            .check_static("  x = 1  \n", RuntimeKind::Python)
            .unwrap_err();
        assert!(err.reason.starts_with("script too short"));
    }

    #[test]
    fn missing_soft_marker_only_warns() {
        let src = "print('hello from a plain script')";
        let ok = validator().check_static(src, RuntimeKind::PythonClient).unwrap();
        assert_eq!(ok.warnings.len(), 2);
    }

    #[test]
    fn missing_entry_point_rejects_compiled_program() {
        let src = "package main\n\nimport \"fmt\"\n\nfunc helper() { fmt.Println(1) }\n";
        let err = validator().check_static(src, RuntimeKind::Go).unwrap_err();
        assert_eq!(err.reason, "program must contain a `func main()` entry point");
    }

    #[test]
    fn shell_denylist_catches_destructive_commands() {
        let err = validator()
            .check_static("echo bye && rm -rf /", RuntimeKind::Shell)
            .unwrap_err();
        assert!(err.reason.contains("rm -rf"));
        assert!(validator()
            .check_static("while true; do echo executing; sleep 1; done", RuntimeKind::Shell)
            .is_ok());
    }

    #[tokio::test]
    async fn shell_syntax_errors_are_rejected() {
        let err = validator()
            .validate("if true; then echo missing-fi", RuntimeKind::Shell)
            .await
            .unwrap_err();
        assert!(err.reason.starts_with("syntax error:"), "{}", err.reason);
    }

    #[tokio::test]
    async fn valid_shell_passes_without_warnings() {
        let ok = validator()
            .validate("while true; do sleep 1; done", RuntimeKind::Shell)
            .await
            .unwrap();
        assert!(ok.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_toolchain_downgrades_to_warning() {
        let mut programs = std::collections::BTreeMap::new();
        programs.insert(
            RuntimeKind::Python,
            std::path::PathBuf::from("/nonexistent/python-for-tests"),
        );
        let v = Validator::new(RuntimeTable::new(programs), Duration::from_secs(5));
        let ok = v
            .validate("def main():\n    print('hi')\n", RuntimeKind::Python)
            .await
            .unwrap();
        assert_eq!(ok.warnings.len(), 1);
        assert!(ok.warnings[0].contains("not installed"));
    }
}
