use crate::entry::{Entry, EntrySource};
use crate::error::{AppError, Result};
use log;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

/// Bytes inspected by [`looks_binary`].
pub const BINARY_SAMPLE_LEN: usize = 8192;
pub const DEFAULT_MAX_LINES: usize = 1000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub const BINARY_NOTICE: &str = "[binary file, content omitted]";
pub const ARCHIVE_SKIPPED_NOTICE: &str = "[archive skipped: archive reading is disabled]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverLimit {
    #[default]
    Truncate,
    Skip,
}

impl FromStr for OverLimit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(OverLimit::Truncate),
            "skip" => Ok(OverLimit::Skip),
            other => Err(AppError::InvalidArgument(format!(
                "Unknown over-limit behavior '{}'. Use truncate or skip.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPolicy {
    pub max_lines: usize,
    pub over_limit: OverLimit,
    /// Files larger than this are always treated as over the limit.
    pub max_file_size: Option<u64>,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        RenderPolicy {
            max_lines: DEFAULT_MAX_LINES,
            over_limit: OverLimit::Truncate,
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Full,
    Truncated,
    Skipped,
    Binary,
    ReadError,
    ArchiveError,
    ArchiveSkipped,
}

impl fmt::Display for RenderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RenderOutcome::Full => "full",
            RenderOutcome::Truncated => "truncated",
            RenderOutcome::Skipped => "skipped",
            RenderOutcome::Binary => "binary",
            RenderOutcome::ReadError => "error",
            RenderOutcome::ArchiveError => "archive error",
            RenderOutcome::ArchiveSkipped => "archive skipped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBlock {
    pub path: String,
    pub outcome: RenderOutcome,
    /// Fenced content and/or a notice line; never ends with a newline.
    pub body: String,
    pub lines_shown: usize,
    pub total_lines: Option<usize>,
    pub size: Option<u64>,
}

impl RenderedBlock {
    fn notice(entry: &Entry, outcome: RenderOutcome, body: String) -> Self {
        RenderedBlock {
            path: entry.display_path(),
            outcome,
            body,
            lines_shown: 0,
            total_lines: None,
            size: entry.size,
        }
    }
}

/// Binary heuristic applied to the first [`BINARY_SAMPLE_LEN`] bytes.
///
/// Binary when the sample holds a NUL byte, is not UTF-8 (a multibyte
/// sequence cut off at the end of the sample is fine), or more than 10% of
/// its characters are control characters other than tab, LF, CR, FF and ESC.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.contains(&0) {
        return true;
    }
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&sample[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return true,
        },
        Err(_) => return true,
    };
    let mut total = 0usize;
    let mut control = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\x0c' | '\x1b') {
            control += 1;
        }
    }
    control * 10 > total
}

enum Scan {
    Binary,
    Text {
        kept: String,
        kept_lines: usize,
        total_lines: usize,
        total_bytes: u64,
    },
}

/// Keeps the first `keep` lines, holding at most `budget` bytes of them, and
/// counts the remaining lines and bytes without buffering them.
fn scan_lines(reader: &mut dyn Read, keep: usize, budget: u64) -> io::Result<Scan> {
    let mut head = Vec::with_capacity(BINARY_SAMPLE_LEN);
    (&mut *reader)
        .take(BINARY_SAMPLE_LEN as u64)
        .read_to_end(&mut head)?;
    if looks_binary(&head) {
        return Ok(Scan::Binary);
    }

    let mut lines = BufReader::new(io::Cursor::new(head).chain(reader));
    let mut kept = String::new();
    let mut kept_lines = 0;
    let mut total_lines = 0;
    let mut total_bytes = 0u64;
    let mut open_line = false;
    let mut line = Vec::new();
    while kept_lines < keep {
        let room = budget.saturating_sub(kept.len() as u64);
        if room == 0 {
            break;
        }
        line.clear();
        let read = (&mut lines).take(room).read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(Scan::Text {
                kept,
                kept_lines,
                total_lines,
                total_bytes,
            });
        }
        total_bytes += read as u64;
        if read as u64 == room {
            // This line crosses the size limit; it is counted but not kept.
            if line.last() == Some(&b'\n') {
                total_lines += 1;
            } else {
                open_line = true;
            }
            break;
        }
        match std::str::from_utf8(&line) {
            Ok(text) => kept.push_str(text),
            Err(_) => return Ok(Scan::Binary),
        }
        kept_lines += 1;
        total_lines += 1;
    }

    loop {
        let chunk = lines.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        total_lines += chunk.iter().filter(|&&b| b == b'\n').count();
        open_line = chunk.last() != Some(&b'\n');
        let len = chunk.len();
        total_bytes += len as u64;
        lines.consume(len);
    }
    if open_line {
        total_lines += 1;
    }
    Ok(Scan::Text {
        kept,
        kept_lines,
        total_lines,
        total_bytes,
    })
}

fn longest_backtick_run(content: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in content.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Wraps content in a code fence longer than any backtick run inside it.
pub fn fenced(content: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(content).max(2) + 1);
    let mut body = String::with_capacity(content.len() + 2 * fence.len() + 2);
    body.push_str(&fence);
    body.push('\n');
    body.push_str(content);
    if !content.is_empty() && !content.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(&fence);
    body
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentRenderer {
    policy: RenderPolicy,
}

impl ContentRenderer {
    pub fn new(policy: RenderPolicy) -> Self {
        ContentRenderer { policy }
    }

    pub fn policy(&self) -> &RenderPolicy {
        &self.policy
    }

    /// Renders one file entry. Never fails: problems become notices.
    pub fn render(&self, entry: &Entry) -> RenderedBlock {
        match &entry.source {
            EntrySource::ArchiveFailed(reason) => RenderedBlock::notice(
                entry,
                RenderOutcome::ArchiveError,
                format!("[archive error: {}]", reason),
            ),
            EntrySource::ArchiveSkipped => RenderedBlock::notice(
                entry,
                RenderOutcome::ArchiveSkipped,
                ARCHIVE_SKIPPED_NOTICE.to_string(),
            ),
            EntrySource::Directory => RenderedBlock::notice(
                entry,
                RenderOutcome::ReadError,
                "[error: entry is a directory]".to_string(),
            ),
            EntrySource::Filesystem(_) | EntrySource::ArchiveMember(_) => {
                self.render_content(entry)
            }
        }
    }

    fn render_content(&self, entry: &Entry) -> RenderedBlock {
        let policy = &self.policy;
        let skip_oversized = policy.over_limit == OverLimit::Skip || policy.max_lines == 0;

        // A known size over the limit can be skipped without reading.
        if let (Some(size), Some(limit)) = (entry.size, policy.max_file_size) {
            if size > limit && skip_oversized {
                log::debug!("Skipping oversized file: {}", entry.display_path());
                return RenderedBlock::notice(entry, RenderOutcome::Skipped, size_skipped(size, limit));
            }
        }

        // One byte past the limit is enough to tell that it was exceeded.
        let budget = policy
            .max_file_size
            .map_or(u64::MAX, |limit| limit.saturating_add(1));
        let scan = match entry.with_reader(|reader| scan_lines(reader, policy.max_lines, budget)) {
            Ok(scan) => scan,
            Err(e) => {
                log::warn!("Could not read {}: {}", entry.display_path(), e);
                return RenderedBlock::notice(
                    entry,
                    RenderOutcome::ReadError,
                    format!("[error: {}]", e),
                );
            }
        };

        let (kept, kept_lines, total, read_bytes) = match scan {
            Scan::Binary => {
                log::debug!("Binary content in {}", entry.display_path());
                return RenderedBlock::notice(entry, RenderOutcome::Binary, BINARY_NOTICE.to_string());
            }
            Scan::Text {
                kept,
                kept_lines,
                total_lines,
                total_bytes,
            } => (kept, kept_lines, total_lines, total_bytes),
        };

        // Archive streams have no size until they are read.
        let size = entry.size.unwrap_or(read_bytes);
        let mut block = RenderedBlock {
            path: entry.display_path(),
            outcome: RenderOutcome::Full,
            body: String::new(),
            lines_shown: kept_lines,
            total_lines: Some(total),
            size: Some(size),
        };
        let omitted = total - kept_lines;

        if let Some(limit) = policy.max_file_size.filter(|&limit| size > limit) {
            if skip_oversized {
                log::debug!("Skipping oversized file: {}", entry.display_path());
                block.outcome = RenderOutcome::Skipped;
                block.lines_shown = 0;
                block.body = size_skipped(size, limit);
            } else {
                block.outcome = RenderOutcome::Truncated;
                block.body = format!(
                    "{}\n[truncated: file exceeds the size limit of {} bytes; {} of {} lines omitted]",
                    fenced(&kept),
                    limit,
                    omitted,
                    total
                );
            }
        } else if total <= policy.max_lines {
            block.body = fenced(&kept);
        } else if policy.over_limit == OverLimit::Truncate {
            block.outcome = RenderOutcome::Truncated;
            block.body = format!(
                "{}\n[truncated: {} of {} lines omitted]",
                fenced(&kept),
                omitted,
                total
            );
        } else {
            block.outcome = RenderOutcome::Skipped;
            block.lines_shown = 0;
            block.body = format!(
                "[skipped: {} lines exceeds the limit of {} lines]",
                total, policy.max_lines
            );
        }
        log::trace!("Rendered {} ({})", block.path, block.outcome);
        block
    }
}

fn size_skipped(size: u64, limit: u64) -> String {
    format!(
        "[skipped: {} bytes exceeds the size limit of {} bytes]",
        size, limit
    )
}
