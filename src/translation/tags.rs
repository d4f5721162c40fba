//! `[n] text` request/response protocol
//!
//! Every segment is prefixed with its 1-based id in square brackets and the
//! segments are separated by blank lines. Answers are read back by tag, so
//! reordered, merged or missing segments are detected instead of silently
//! shifting the alignment.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"\[(\d+)\]").unwrap();
    static ref FENCE: Regex = Regex::new(r"(?m)^\s*```.*$").unwrap();
}

/// Render `(index, text)` pairs; tags are `index + 1`
pub fn build_tagged<'a, I>(segments: I) -> String
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    segments
        .into_iter()
        .map(|(index, text)| format!("[{}] {}", index + 1, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Map 0-based index to text for every tagged segment in `response`.
///
/// Text runs from the end of a tag to the start of the next one. Empty
/// segments are left out; when an id appears twice the first one wins.
pub fn parse_tagged(response: &str) -> HashMap<usize, String> {
    let cleaned = FENCE.replace_all(response, "");
    let tags: Vec<(usize, usize, Option<usize>)> = TAG
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps[1].parse::<usize>().ok().filter(|id| *id > 0);
            Some((whole.start(), whole.end(), id))
        })
        .collect();

    let mut parsed = HashMap::new();
    for (n, (_, text_start, id)) in tags.iter().enumerate() {
        let Some(id) = id else { continue };
        let text_end = tags.get(n + 1).map(|t| t.0).unwrap_or(cleaned.len());
        let text = cleaned[*text_start..text_end].trim();
        if text.is_empty() {
            continue;
        }
        parsed.entry(id - 1).or_insert_with(|| text.to_string());
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tagged() {
        let text = build_tagged([(0, "Hello."), (1, "How are you?")]);
        assert_eq!(text, "[1] Hello.\n\n[2] How are you?");
    }

    #[test]
    fn test_parse_in_any_order() {
        let parsed = parse_tagged("[2] 你好吗？\n\n[1] 你好。");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&0], "你好。");
        assert_eq!(parsed[&1], "你好吗？");
    }

    #[test]
    fn test_parse_multiline_and_fences() {
        let parsed = parse_tagged("```\n[5] first line\nsecond line\n\n[6] next\n```");
        assert_eq!(parsed[&4], "first line\nsecond line");
        assert_eq!(parsed[&5], "next");
    }

    #[test]
    fn test_parse_skips_empty_and_zero() {
        let parsed = parse_tagged("[0] nothing\n[1]\n[2] kept\n[2] duplicate");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[&1], "kept");
    }

    #[test]
    fn test_parse_untagged() {
        assert!(parse_tagged("no tags at all").is_empty());
    }
}
