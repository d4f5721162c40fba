//! Subtitle timestamps and documents

pub mod merge;
pub mod parser;
pub mod timecode;

pub use merge::merge_sentences;
pub use parser::{parse_srt, parse_srt_document, parse_srt_file, write_srt, ParsedDocument, Slot};
