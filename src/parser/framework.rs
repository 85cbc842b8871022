//! Parser for framework-style application logs.
//!
//! A statement starts with a head line of the form
//! `[YYYY-MM-DD HH:MM:SS] channel.LEVEL: message` and may be followed by
//! wrapped message text or a stack trace. Anything that is not a head line is
//! folded into the entry that precedes it.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::Lines;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::AnalyzerError;
use crate::parser::entry::{LogEntry, LogLevel};
use crate::parser::fingerprint;

static HEAD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] (\w+)\.(\w+): (.+)$").unwrap()
});
static STACK_FRAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\d+|^\s+at\s").unwrap());
static CONTEXT_FRAGMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}$").unwrap());
static CONTEXT_PAIR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)":([^,}]+)"#).unwrap());
static FILE_LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in ([/\w\-.]+):(\d+)").unwrap());
static EXCEPTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z][A-Za-z0-9_\\]*Exception)").unwrap());

/// Parse a whole chunk of log text.
///
/// Parsing is stateless per call; `fallback_time` stamps entries whose head
/// timestamp cannot be interpreted. The returned iterator is lazy and yields
/// entries in input order.
pub fn parse_content(content: &str, fallback_time: DateTime<Utc>) -> Entries<'_> {
    Entries {
        lines: content.lines(),
        current: None,
        stack: Vec::new(),
        fallback_time,
    }
}

/// Parse a log file from disk. Missing files surface as `NotFound`.
pub fn parse_file(path: &Path, fallback_time: DateTime<Utc>) -> Result<Vec<LogEntry>, AnalyzerError> {
    if !path.exists() {
        return Err(AnalyzerError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    let entries: Vec<LogEntry> = parse_content(&content, fallback_time).collect();
    debug!(file = %path.display(), entries = entries.len(), "parsed log file");
    Ok(entries)
}

/// Expand configured paths to readable log files: a file stands for itself, a
/// directory for the `*.log` files directly beneath it.
pub fn discover_log_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            if let Ok(dir) = fs::read_dir(path) {
                for dirent in dir.flatten() {
                    let candidate = dirent.path();
                    if candidate.is_file()
                        && candidate.extension().and_then(|ext| ext.to_str()) == Some("log")
                    {
                        files.push(candidate);
                    }
                }
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

/// Incremental reader for a growing log file.
///
/// Tracks a byte offset and parses only appended bytes on each poll. A file
/// that shrinks (truncation or rotation) resets the offset and is reparsed
/// from the start; rotation schemes that swap inodes at constant size are a
/// known limitation.
#[derive(Debug)]
pub struct TailParser {
    path: PathBuf,
    offset: u64,
}

impl TailParser {
    /// Start tailing at the current end of the file, so only statements
    /// appended after this call are reported.
    pub fn from_end(path: PathBuf) -> Result<Self, AnalyzerError> {
        if !path.exists() {
            return Err(AnalyzerError::NotFound(path));
        }
        let offset = fs::metadata(&path)?.len();
        Ok(TailParser { path, offset })
    }

    /// Start tailing from the beginning of the file.
    pub fn from_start(path: PathBuf) -> Self {
        TailParser { path, offset: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse whatever was appended since the last poll.
    pub fn poll(&mut self, fallback_time: DateTime<Utc>) -> Result<Vec<LogEntry>, AnalyzerError> {
        if !self.path.exists() {
            return Err(AnalyzerError::NotFound(self.path.clone()));
        }

        let size = fs::metadata(&self.path)?.len();
        if size < self.offset {
            warn!(
                file = %self.path.display(),
                old = self.offset,
                new = size,
                "log file shrank, reparsing from start"
            );
            self.offset = 0;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut appended = String::new();
        file.read_to_string(&mut appended)?;
        self.offset = size;

        Ok(parse_content(&appended, fallback_time).collect())
    }
}

/// Lazy iterator over the entries of one chunk of text.
pub struct Entries<'a> {
    lines: Lines<'a>,
    current: Option<PartialEntry>,
    stack: Vec<&'a str>,
    fallback_time: DateTime<Utc>,
}

struct PartialEntry {
    logged_at: DateTime<Utc>,
    level: LogLevel,
    channel: String,
    message: String,
    context: HashMap<String, String>,
    file_path: Option<String>,
    line_number: Option<u32>,
    exception_class: Option<String>,
}

impl Iterator for Entries<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        for line in self.lines.by_ref() {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(head) = parse_head_line(line, self.fallback_time) {
                let finished = self.current.take();
                self.current = Some(head);
                if let Some(entry) = finished {
                    return Some(build_entry(entry, std::mem::take(&mut self.stack)));
                }
                self.stack.clear();
            } else if self.current.is_some() && is_stack_trace_line(line) {
                self.stack.push(line);
            } else if let Some(current) = self.current.as_mut() {
                // Wrapped message text continues the open entry.
                current.message.push('\n');
                current.message.push_str(line);
            }
            // Lines before the first head line have no entry to attach to.
        }

        self.current
            .take()
            .map(|entry| build_entry(entry, std::mem::take(&mut self.stack)))
    }
}

fn is_stack_trace_line(line: &str) -> bool {
    STACK_FRAME_PATTERN.is_match(line) || line.starts_with("Stack trace:")
}

fn parse_head_line(line: &str, fallback_time: DateTime<Utc>) -> Option<PartialEntry> {
    let caps = HEAD_PATTERN.captures(line)?;

    let logged_at = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| {
            // The regex admits impossible dates like 2024-02-30.
            debug!(timestamp = &caps[1], "unparseable head timestamp");
            fallback_time
        });
    let channel = caps[2].to_lowercase();
    let level = LogLevel::parse(&caps[3]);
    let raw_message = &caps[4];

    let mut context = extract_context(raw_message).unwrap_or_else(|err| {
        debug!(error = %err, "context fragment ignored");
        HashMap::new()
    });

    let (file_path, line_number) = extract_file_location(raw_message);
    if let (Some(file), Some(line_no)) = (&file_path, line_number) {
        context.insert("file".to_string(), file.clone());
        context.insert("line".to_string(), line_no.to_string());
    }

    let exception_class = extract_exception_class(raw_message);
    if let Some(exception) = &exception_class {
        context.insert("exception".to_string(), exception.clone());
    }

    Some(PartialEntry {
        logged_at,
        level,
        channel,
        message: clean_message(raw_message),
        context,
        file_path,
        line_number,
        exception_class,
    })
}

/// Pull `"key":value` tokens out of a trailing `{...}` fragment.
///
/// This is a flat tokenizer, not a JSON parser: nested braces or a fragment
/// without recognizable pairs surface as `MalformedInput`, which the caller
/// degrades to an empty context.
fn extract_context(message: &str) -> Result<HashMap<String, String>, AnalyzerError> {
    let Some(caps) = CONTEXT_FRAGMENT_PATTERN.captures(message) else {
        return Ok(HashMap::new());
    };

    let fragment = &caps[1];
    let mut context = HashMap::new();
    for pair in CONTEXT_PAIR_PATTERN.captures_iter(fragment) {
        let key = pair[1].to_string();
        let value = pair[2].trim().trim_matches('"').to_string();
        context.insert(key, value);
    }

    if context.is_empty() {
        return Err(AnalyzerError::MalformedInput(format!(
            "no key/value pairs in context fragment {{{fragment}}}"
        )));
    }

    Ok(context)
}

fn extract_file_location(message: &str) -> (Option<String>, Option<u32>) {
    match FILE_LINE_PATTERN.captures(message) {
        Some(caps) => {
            let file = caps[1].to_string();
            let line = caps[2].parse::<u32>().ok();
            (Some(file), line)
        }
        None => (None, None),
    }
}

fn extract_exception_class(message: &str) -> Option<String> {
    EXCEPTION_PATTERN
        .captures(message)
        .map(|caps| caps[1].to_string())
}

/// Strip the trailing context fragment and the `in path:line` suffix.
fn clean_message(message: &str) -> String {
    let without_context = CONTEXT_FRAGMENT_PATTERN.replace(message, "");
    let without_location = FILE_LINE_PATTERN.replace_all(&without_context, "");
    without_location.trim().to_string()
}

fn build_entry(partial: PartialEntry, stack: Vec<&str>) -> LogEntry {
    let hash = fingerprint(
        &partial.message,
        partial.exception_class.as_deref(),
        partial.file_path.as_deref(),
    );

    LogEntry {
        level: partial.level,
        message: partial.message,
        context: partial.context,
        channel: partial.channel,
        file_path: partial.file_path,
        line_number: partial.line_number,
        exception_class: partial.exception_class,
        stack_trace: if stack.is_empty() {
            None
        } else {
            Some(stack.join("\n"))
        },
        hash,
        logged_at: partial.logged_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_single_entry() {
        let raw = "[2025-03-14 09:30:12] production.ERROR: Database has gone away";
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.channel, "production");
        assert_eq!(entry.message, "Database has gone away");
        assert_eq!(
            entry.logged_at,
            Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 12).unwrap()
        );
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn test_stack_trace_is_collected_separately() {
        let raw = concat!(
            "[2025-03-14 09:30:12] production.ERROR: Unhandled TimeoutException in app/worker.rs:42\n",
            "Stack trace:\n",
            "#0 app/worker.rs(42): poll()\n",
            "#1 app/main.rs(7): run()\n",
            "[2025-03-14 09:31:00] production.INFO: Recovered",
        );
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.exception_class.as_deref(), Some("TimeoutException"));
        assert_eq!(first.file_path.as_deref(), Some("app/worker.rs"));
        assert_eq!(first.line_number, Some(42));
        let trace = first.stack_trace.as_deref().unwrap();
        assert!(trace.starts_with("Stack trace:"));
        assert!(trace.contains("#1 app/main.rs"));
        assert!(entries[1].stack_trace.is_none());
    }

    #[test]
    fn test_wrapped_message_lines_are_appended() {
        let raw = concat!(
            "[2025-03-14 09:30:12] app.WARNING: first half\n",
            "second half\n",
        );
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "first half\nsecond half");
    }

    #[test]
    fn test_context_extraction() {
        let raw = r#"[2025-03-14 09:30:12] app.ERROR: Payment failed {"user_id":991,"provider":"stripe"}"#;
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        let entry = &entries[0];
        assert_eq!(entry.message, "Payment failed");
        assert_eq!(entry.context.get("user_id").map(String::as_str), Some("991"));
        assert_eq!(
            entry.context.get("provider").map(String::as_str),
            Some("stripe")
        );
    }

    #[test]
    fn test_malformed_context_degrades_to_empty() {
        let raw = "[2025-03-14 09:30:12] app.ERROR: odd trailer {not pairs at all}";
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        assert_eq!(entries.len(), 1);
        assert!(entries[0].context.is_empty());
    }

    #[test]
    fn test_orphan_lines_before_first_head_are_ignored() {
        let raw = concat!(
            "random noise\n",
            "#0 not attached to anything\n",
            "[2025-03-14 09:30:12] app.INFO: hello",
        );
        let entries: Vec<_> = parse_content(raw, noon()).collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "hello");
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert_eq!(parse_content("", noon()).count(), 0);
    }

    #[test]
    fn test_parse_file_not_found() {
        let missing = Path::new("/definitely/not/here.log");
        let err = parse_file(missing, noon()).unwrap_err();
        assert!(matches!(err, AnalyzerError::NotFound(_)));
    }

    #[test]
    fn test_parse_file_reads_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[2025-03-14 09:30:12] app.ERROR: broke").unwrap();
        writeln!(file, "[2025-03-14 09:31:12] app.INFO: fine").unwrap();

        let entries = parse_file(file.path(), noon()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_tail_parser_sees_only_appended_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[2025-03-14 09:30:12] app.ERROR: old news").unwrap();
        file.flush().unwrap();

        let mut tail = TailParser::from_end(file.path().to_path_buf()).unwrap();
        assert!(tail.poll(noon()).unwrap().is_empty());

        writeln!(file, "[2025-03-14 09:32:00] app.ERROR: fresh").unwrap();
        file.flush().unwrap();

        let fresh = tail.poll(noon()).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].message, "fresh");
        assert!(tail.poll(noon()).unwrap().is_empty());
    }

    #[test]
    fn test_tail_parser_restarts_after_truncation() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[2025-03-14 09:30:12] app.ERROR: first pass\n").unwrap();

        let mut tail = TailParser::from_start(file.path().to_path_buf());
        assert_eq!(tail.poll(noon()).unwrap().len(), 1);

        // Truncate to something shorter than the previous offset.
        std::fs::write(file.path(), "[2025-03-14 09:40:00] app.ERROR: rewritten\n").unwrap();
        let reparsed = tail.poll(noon()).unwrap();
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed[0].message, "rewritten");
    }

    #[test]
    fn test_discover_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("app.log");
        std::fs::write(&inside, "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let standalone = dir.path().join("direct.log");
        std::fs::write(&standalone, "").unwrap();

        let found = discover_log_files(&[standalone.clone(), dir.path().to_path_buf()]);
        assert!(found.contains(&inside));
        assert_eq!(found.iter().filter(|p| **p == standalone).count(), 1);
        assert!(!found
            .iter()
            .any(|p| p.extension().and_then(|e| e.to_str()) == Some("txt")));
    }
}
