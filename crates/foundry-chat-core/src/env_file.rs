//! `.env` file maintenance: idempotent key upserts and example-file sync.
//!
//! Edits are line-based. Comments, blank lines, ordering and unrelated keys are
//! left exactly as they were; a file is only rewritten when something changed.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{ChatError, ChatResult};

/// Which keys an upsert touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub updated: Vec<String>,
    pub appended: Vec<String>,
    pub unchanged: Vec<String>,
}

impl UpsertReport {
    pub fn changed(&self) -> bool {
        !self.updated.is_empty() || !self.appended.is_empty()
    }
}

/// Extracts the env key from a line (trimmed part before the first `=`, without `export `).
/// Returns `None` for comments, blank lines and lines without `=`.
fn key_from_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    let key = key.strip_prefix("export ").map(str::trim).unwrap_or(key);
    if key.is_empty() {
        return None;
    }
    Some(key)
}

/// Where the value sits in a `KEY=value` line. `start..end` covers the quotes,
/// if any, and stops before an inline ` # comment`.
struct ValueSpan {
    start: usize,
    end: usize,
    value: String,
}

fn value_span(line: &str) -> Option<ValueSpan> {
    let eq = line.find('=')?;
    let rest = &line[eq + 1..];
    let start = eq + 1 + (rest.len() - rest.trim_start().len());
    let raw = &line[start..];

    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote) {
            if let Some(close) = inner.find(quote) {
                return Some(ValueSpan {
                    start,
                    end: start + close + 2,
                    value: inner[..close].to_string(),
                });
            }
        }
    }

    // unquoted: a comment starts at '#' preceded by whitespace
    let bytes = raw.as_bytes();
    let comment = (1..bytes.len())
        .find(|&i| bytes[i] == b'#' && bytes[i - 1].is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let value = raw[..comment].trim_end();
    Some(ValueSpan {
        start,
        end: start + value.len(),
        value: value.to_string(),
    })
}

fn value_from_line(line: &str) -> Option<String> {
    value_span(line).map(|span| span.value)
}

/// Double-quotes values that would otherwise parse back differently.
fn format_value(value: &str) -> String {
    let needs_quotes = value.starts_with('\'')
        || value.ends_with('\'')
        || value.chars().any(|c| c.is_whitespace() || c == '#');
    if needs_quotes {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Replaces only the value span, keeping `export `, spacing and trailing comments.
fn rewrite_value(line: &str, value: &str) -> String {
    match value_span(line) {
        Some(span) => format!(
            "{}{}{}",
            &line[..span.start],
            format_value(value),
            &line[span.end..]
        ),
        None => line.to_string(),
    }
}

fn validate(key: &str, value: &str) -> ChatResult<()> {
    if key.is_empty() || key.starts_with('#') || key.contains(|c: char| c == '=' || c.is_whitespace()) {
        return Err(ChatError::Config(format!("Invalid env key: {:?}", key)));
    }
    if value.contains(['\n', '\r', '"']) {
        return Err(ChatError::Config(format!(
            "Value for {} must be a single line without double quotes",
            key
        )));
    }
    Ok(())
}

/// Parses `KEY=value` lines, stripping one layer of matching quotes and inline comments.
pub fn read_env_file(path: impl AsRef<Path>) -> ChatResult<Vec<(String, String)>> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(content
        .lines()
        .filter_map(|line| Some((key_from_line(line)?.to_string(), value_from_line(line)?)))
        .collect())
}

/// Sets each `key` to `value`: rewrites the value of the first existing `KEY=` line
/// in place, or appends a new line. Creates the file when missing. The file's
/// line ending (LF or CRLF) is kept.
///
/// Running it again with the same pairs leaves the file untouched.
pub fn upsert_env_values(path: impl AsRef<Path>, pairs: &[(&str, &str)]) -> ChatResult<UpsertReport> {
    let path = path.as_ref();
    for (key, value) in pairs {
        validate(key, value)?;
    }

    let original = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let newline = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let mut report = UpsertReport::default();

    for (key, value) in pairs {
        let existing = lines.iter().position(|line| key_from_line(line) == Some(*key));
        match existing {
            Some(idx) if value_from_line(&lines[idx]).as_deref() == Some(*value) => {
                report.unchanged.push(key.to_string());
            }
            Some(idx) => {
                lines[idx] = rewrite_value(&lines[idx], value);
                report.updated.push(key.to_string());
            }
            None => {
                lines.push(format!("{}={}", key, format_value(value)));
                report.appended.push(key.to_string());
            }
        }
    }

    if report.changed() {
        let mut content = lines.join(newline);
        content.push_str(newline);
        fs::write(path, content)?;
        tracing::info!(
            target: "foundry_chat::env_file",
            "Updated {}: {} changed, {} added.",
            path.display(),
            report.updated.len(),
            report.appended.len()
        );
    }
    Ok(report)
}

/// Collects all keys currently defined in the live env file.
fn keys_in_file(path: &Path) -> ChatResult<HashSet<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(key_from_line)
        .map(str::to_string)
        .collect())
}

/// Appends keys present in `example_path` but missing from `live_path`, never
/// overwriting existing values. Copies the example when the live file does not exist.
///
/// Returns the number of keys added (or copied).
pub fn sync_env_files(example_path: impl AsRef<Path>, live_path: impl AsRef<Path>) -> ChatResult<u32> {
    let example_path = example_path.as_ref();
    let live_path = live_path.as_ref();

    if !example_path.exists() {
        return Err(ChatError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Example file not found: {}", example_path.display()),
        )));
    }

    if !live_path.exists() {
        fs::copy(example_path, live_path)?;
        let n = keys_in_file(live_path)?.len();
        tracing::info!(
            target: "foundry_chat::env_file",
            "{} did not exist; created from {} ({} keys).",
            live_path.display(),
            example_path.display(),
            n
        );
        return Ok(n as u32);
    }

    let live_keys = keys_in_file(live_path)?;
    let example_content = fs::read_to_string(example_path)?;
    let to_append: Vec<&str> = example_content
        .lines()
        .filter(|line| key_from_line(line).is_some_and(|k| !live_keys.contains(k)))
        .collect();

    if to_append.is_empty() {
        return Ok(0);
    }

    let live_content = fs::read_to_string(live_path)?;
    let mut f = fs::OpenOptions::new().append(true).open(live_path)?;
    if !live_content.is_empty() && !live_content.ends_with('\n') {
        writeln!(f)?;
    }
    for line in &to_append {
        writeln!(f, "{}", line)?;
    }
    f.sync_all()?;
    let added = to_append.len() as u32;
    tracing::info!(
        target: "foundry_chat::env_file",
        "Added {} new configuration key(s) from {}.",
        added,
        example_path.display()
    );
    Ok(added)
}
