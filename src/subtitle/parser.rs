//! SRT parsing and writing
//!
//! Parsing is lenient per block and strict per document: malformed blocks are
//! skipped with a warning, a document without any valid block is an error.
//! The returned slots are always sorted by start time, every later stage
//! relies on that order.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::timecode;
use crate::error::{DubSyncError, Result};

/// One subtitle unit on the original timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Cue number as written in the document (1-based position when absent)
    pub number: usize,
    /// Start of the slot in milliseconds
    pub start_ms: u64,
    /// End of the slot in milliseconds, never before `start_ms`
    pub end_ms: u64,
    /// Subtitle text, lines joined with `\n`
    pub text: String,
}

impl Slot {
    pub fn new(number: usize, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            number,
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Nominal duration of the slot
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// A block that was dropped while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    /// 1-based position of the block in the document
    pub position: usize,
    /// Why the block was rejected
    pub reason: String,
}

/// Result of parsing a document
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// Valid slots sorted by `start_ms`
    pub slots: Vec<Slot>,
    /// Blocks that did not match the expected shape
    pub skipped: Vec<SkippedBlock>,
}

/// Parse an SRT document into slots sorted by start time
pub fn parse_srt(document: &str) -> Result<Vec<Slot>> {
    parse_srt_document(document).map(|parsed| parsed.slots)
}

/// Parse an SRT document, keeping track of skipped blocks
pub fn parse_srt_document(document: &str) -> Result<ParsedDocument> {
    let document = document.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut parsed = ParsedDocument::default();
    let mut block: Vec<&str> = Vec::new();
    let mut position = 0;

    // A trailing empty line closes the final block even without a separator
    for line in document.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            close_block(&mut block, &mut position, &mut parsed);
            continue;
        }

        // A second timing line starts the next cue when the blank separator is missing
        if is_timing(line) && block.iter().any(|l| is_timing(l)) {
            let number = block
                .last()
                .filter(|l| l.trim().parse::<usize>().is_ok())
                .copied();
            if number.is_some() {
                block.pop();
            }
            close_block(&mut block, &mut position, &mut parsed);
            block.extend(number);
        }
        block.push(line);
    }

    if parsed.slots.is_empty() {
        return Err(DubSyncError::MalformedDocument(format!(
            "no valid subtitle block found ({} blocks rejected)",
            parsed.skipped.len()
        )));
    }

    // Stable: cues sharing a start time keep their document order
    parsed.slots.sort_by_key(|slot| slot.start_ms);

    log::debug!(
        "Parsed {} subtitle slots, skipped {} blocks",
        parsed.slots.len(),
        parsed.skipped.len()
    );
    Ok(parsed)
}

fn is_timing(line: &str) -> bool {
    line.contains("-->")
}

fn close_block(block: &mut Vec<&str>, position: &mut usize, parsed: &mut ParsedDocument) {
    if block.is_empty() {
        return;
    }
    *position += 1;
    match parse_block(block, *position) {
        Ok(slot) => parsed.slots.push(slot),
        Err(reason) => {
            log::warn!("Skipping subtitle block #{}: {}", position, reason);
            parsed.skipped.push(SkippedBlock {
                position: *position,
                reason,
            });
        }
    }
    block.clear();
}

/// Read and parse an SRT file
pub fn parse_srt_file<P: AsRef<Path>>(path: P) -> Result<ParsedDocument> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        DubSyncError::FileNotFound(format!("Failed to open subtitle file {}: {}", path.display(), e))
    })?;
    log::info!("Parsing subtitle file: {}", path.display());
    parse_srt_document(&content)
}

/// Parse one block: optional cue number, `start --> end`, text lines
fn parse_block(lines: &[&str], position: usize) -> std::result::Result<Slot, String> {
    let mut lines = lines.iter().map(|line| line.trim());

    let first = lines.next().ok_or_else(|| "empty block".to_string())?;
    let (number, timing) = if first.contains("-->") {
        (position, first)
    } else {
        let number = first
            .parse::<usize>()
            .map_err(|_| format!("expected cue number, found {:?}", first))?;
        let timing = lines
            .next()
            .ok_or_else(|| "missing timing line".to_string())?;
        (number, timing)
    };

    let (start, end) = timing
        .split_once("-->")
        .ok_or_else(|| format!("expected 'start --> end', found {:?}", timing))?;
    let start_ms = timecode::parse(start).map_err(|e| e.to_string())?;
    let end_ms = timecode::parse(end).map_err(|e| e.to_string())?;
    if end_ms < start_ms {
        return Err(format!(
            "end {} precedes start {}",
            timecode::format(end_ms),
            timecode::format(start_ms)
        ));
    }

    let text = lines.collect::<Vec<&str>>().join("\n");
    Ok(Slot::new(number, start_ms, end_ms, text))
}

/// Render slots as an SRT document, numbering cues from 1
pub fn write_srt(slots: &[Slot]) -> String {
    let mut out = String::new();
    for (i, slot) in slots.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            timecode::format(slot.start_ms),
            timecode::format(slot.end_ms),
            slot.text
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n2\n00:00:03,000 --> 00:00:04,000\nSecond line\nwith a wrap\n";

    #[test]
    fn test_parse_basic_document() {
        let slots = parse_srt(SAMPLE).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], Slot::new(1, 1_000, 2_500, "Hello there"));
        assert_eq!(slots[1].text, "Second line\nwith a wrap");
        assert_eq!(slots[1].duration_ms(), 1_000);
    }

    #[test]
    fn test_final_block_without_trailing_blank_line() {
        let doc = "1\n00:00:00,000 --> 00:00:01,000\nonly block";
        let slots = parse_srt(doc).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].text, "only block");
    }

    #[test]
    fn test_out_of_order_blocks_are_sorted() {
        let doc = "3\n00:00:05,000 --> 00:00:06,000\nc\n\n\
                   1\n00:00:01,000 --> 00:00:02,000\na\n\n\
                   2\n00:00:03,000 --> 00:00:04,000\nb\n";
        let slots = parse_srt(doc).unwrap();
        let starts: Vec<u64> = slots.iter().map(|s| s.start_ms).collect();
        assert_eq!(starts, vec![1_000, 3_000, 5_000]);
        assert!(slots.windows(2).all(|w| w[0].start_ms <= w[1].start_ms));
        assert_eq!(slots[0].text, "a");
    }

    #[test]
    fn test_malformed_block_is_skipped() {
        let doc = "1\n00:00:01,000 --> 00:00:02,000\nfine\n\n\
                   2\n00:00:03 --> 00:00:04\nbroken timing\n\n\
                   3\n00:00:05,000 --> 00:00:06,000\nalso fine\n";
        let parsed = parse_srt_document(doc).unwrap();
        assert_eq!(parsed.slots.len(), 2);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].position, 2);
    }

    #[test]
    fn test_zero_valid_blocks_is_error() {
        assert!(matches!(parse_srt(""), Err(DubSyncError::MalformedDocument(_))));
        assert!(matches!(
            parse_srt("hello\nworld\n\nnot a subtitle\n"),
            Err(DubSyncError::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_empty_text_and_missing_number() {
        let doc = "\u{feff}00:00:00,000 --> 00:00:00,500\r\n\r\n7\r\n00:00:01.000 --> 00:00:02.000\r\n\r\n";
        let slots = parse_srt(doc).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].number, 1);
        assert_eq!(slots[1].number, 7);
        assert!(slots[1].text.is_empty());
    }

    #[test]
    fn test_reversed_range_is_skipped() {
        let doc = "1\n00:00:02,000 --> 00:00:01,000\nbackwards\n\n2\n00:00:03,000 --> 00:00:04,000\nok\n";
        let parsed = parse_srt_document(doc).unwrap();
        assert_eq!(parsed.slots.len(), 1);
        assert!(parsed.skipped[0].reason.contains("precedes"));
    }

    #[test]
    fn test_blocks_without_blank_separator() {
        let doc = "1\n00:00:01,000 --> 00:00:02,000\nfirst\n\
                   2\n00:00:03,000 --> 00:00:04,000\nsecond\n\
                   00:00:05,000 --> 00:00:06,000\nthird\n";
        let parsed = parse_srt_document(doc).unwrap();
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.slots.len(), 3);
        assert_eq!(parsed.slots[0], Slot::new(1, 1_000, 2_000, "first"));
        assert_eq!(parsed.slots[1], Slot::new(2, 3_000, 4_000, "second"));
        assert_eq!(parsed.slots[2].text, "third");
        assert_eq!(parsed.slots[2].start_ms, 5_000);
    }

    #[test]
    fn test_write_then_parse() {
        let slots = parse_srt(SAMPLE).unwrap();
        let rendered = write_srt(&slots);
        assert!(rendered.starts_with("1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n"));
        assert_eq!(parse_srt(&rendered).unwrap(), slots);
    }
}
