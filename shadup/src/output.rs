//! Output formatting for CLI commands.
//!
//! Pretty mode prints aligned, human-readable rows and a summary. Machine
//! mode prints one JSON object per line: one per data row, then one summary
//! object.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use shadup_core::{DigestGroup, PathEntry};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Aligned columns and summaries for a terminal
    Pretty,
    /// JSON lines for scripts
    Machine,
}

impl OutputMode {
    /// Pretty when stdout is a terminal, machine otherwise.
    pub fn detect() -> Self {
        if atty::is(atty::Stream::Stdout) {
            OutputMode::Pretty
        } else {
            OutputMode::Machine
        }
    }
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    mode: OutputMode,
    stdout: io::Stdout,
}

impl OutputWriter {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            stdout: io::stdout(),
        }
    }

    /// Write path listing rows.
    pub fn paths(&self, entries: &[PathEntry], show_deleted: bool) -> Result<()> {
        match self.mode {
            OutputMode::Machine => self.json_lines(entries),
            OutputMode::Pretty => self.text(&render_paths(entries, show_deleted)),
        }
    }

    /// Write digest groups.
    pub fn groups(&self, groups: &[DigestGroup], show_deleted: bool) -> Result<()> {
        match self.mode {
            OutputMode::Machine => self.json_lines(groups),
            OutputMode::Pretty => self.text(&render_groups(groups, show_deleted)),
        }
    }

    /// Write the end-of-command summary.
    ///
    /// The `text_fn` closure is called only in pretty mode.
    pub fn summary<T: Serialize>(
        &self,
        command: &'static str,
        stats: &T,
        text_fn: impl FnOnce() -> String,
    ) -> Result<()> {
        match self.mode {
            OutputMode::Machine => self.json_lines(&[Summary { command, stats }]),
            OutputMode::Pretty => self.text(&text_fn()),
        }
    }

    /// Write an error message to stderr.
    pub fn write_error(&self, error: &anyhow::Error) {
        match self.mode {
            OutputMode::Machine => {
                let error_output = ErrorOutput {
                    success: false,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputMode::Pretty => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }

    fn json_lines<T: Serialize>(&self, rows: &[T]) -> Result<()> {
        let mut handle = self.stdout.lock();
        for row in rows {
            serde_json::to_writer(&mut handle, row)?;
            writeln!(handle)?;
        }
        Ok(())
    }

    fn text(&self, text: &str) -> Result<()> {
        if !text.is_empty() {
            write!(self.stdout.lock(), "{}", text)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Summary<'a, T> {
    command: &'static str,
    #[serde(flatten)]
    stats: &'a T,
}

#[derive(Debug, Serialize)]
struct ErrorOutput {
    success: bool,
    error: String,
}

/// Quote a path as a JSON string if it contains whitespace, control or
/// non-ASCII characters, so columns stay unambiguous.
pub fn pretty_path(path: &str) -> String {
    let needs_quote = path
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || !c.is_ascii());
    if needs_quote {
        serde_json::to_string(path).unwrap_or_else(|_| path.to_string())
    } else {
        path.to_string()
    }
}

fn deleted_mark(deleted: bool) -> char {
    if deleted { 'X' } else { '.' }
}

fn render_paths(entries: &[PathEntry], show_deleted: bool) -> String {
    let formatted: Vec<String> = entries.iter().map(|e| pretty_path(&e.path)).collect();
    let width = formatted.iter().map(|p| p.chars().count()).max().unwrap_or(0);

    let mut text = String::new();
    for (path, entry) in formatted.iter().zip(entries) {
        if show_deleted {
            let _ = writeln!(
                text,
                "{:<width$} {} {}",
                path,
                deleted_mark(entry.deleted),
                entry.digest
            );
        } else {
            let _ = writeln!(text, "{:<width$} {}", path, entry.digest);
        }
    }
    text
}

fn render_groups(groups: &[DigestGroup], show_deleted: bool) -> String {
    let mut text = String::new();
    for group in groups {
        let _ = writeln!(text, "{}", group.digest);
        for member in &group.paths {
            if show_deleted {
                let _ = writeln!(text, "  {} {}", pretty_path(&member.path), deleted_mark(member.deleted));
            } else {
                let _ = writeln!(text, "  {}", pretty_path(&member.path));
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadup_core::{Digest, GroupMember};

    fn entry(path: &str, content: &[u8], deleted: bool) -> PathEntry {
        PathEntry {
            path: path.to_string(),
            digest: Digest::hash_bytes(content),
            deleted,
        }
    }

    #[test]
    fn test_pretty_path_quoting() {
        assert_eq!(pretty_path("plain/path.txt"), "plain/path.txt");
        assert_eq!(pretty_path("with space"), "\"with space\"");
        assert_eq!(pretty_path("tab\there"), "\"tab\\there\"");
        assert_eq!(pretty_path("caf\u{e9}"), "\"caf\u{e9}\"");
    }

    #[test]
    fn test_render_paths_aligned() {
        let entries = vec![entry("a", b"1", false), entry("longer/b", b"2", true)];
        let text = render_paths(&entries, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("a        {}", Digest::hash_bytes(b"1")));
        assert_eq!(lines[1], format!("longer/b {}", Digest::hash_bytes(b"2")));

        let with_deleted = render_paths(&entries, true);
        assert!(with_deleted.lines().nth(1).unwrap().starts_with("longer/b X "));
        assert!(with_deleted.lines().next().unwrap().starts_with("a        . "));
    }

    #[test]
    fn test_render_groups() {
        let digest = Digest::hash_bytes(b"dup");
        let groups = vec![DigestGroup {
            digest,
            paths: vec![
                GroupMember {
                    path: "a/1".to_string(),
                    deleted: false,
                },
                GroupMember {
                    path: "b 2".to_string(),
                    deleted: true,
                },
            ],
        }];
        assert_eq!(
            render_groups(&groups, false),
            format!("{}\n  a/1\n  \"b 2\"\n", digest)
        );
        assert_eq!(
            render_groups(&groups, true),
            format!("{}\n  a/1 .\n  \"b 2\" X\n", digest)
        );
    }

    #[test]
    fn test_summary_flattens_stats() {
        let stats = shadup_core::ExtractStats {
            files: 2,
            bytes: 10,
            skipped: 0,
        };
        let json = serde_json::to_value(Summary {
            command: "extract",
            stats: &stats,
        })
        .unwrap();
        assert_eq!(json["command"], "extract");
        assert_eq!(json["bytes"], 10);
    }

    #[test]
    fn test_machine_rows_serialize_digest_as_hex() {
        let row = entry("a", b"1", false);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["digest"], Digest::hash_bytes(b"1").to_hex());
        assert_eq!(json["deleted"], false);
    }
}
