//! Sentence-boundary cue merging
//!
//! Speech recognizers cut cues on pauses, often mid-sentence. Consecutive
//! cues are joined until the text ends with sentence punctuation so each slot
//! carries a whole sentence to translate and speak.

use super::parser::Slot;

const SENTENCE_END: &[char] = &['.', '!', '?', '。', '！', '？'];

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(SENTENCE_END)
}

/// Join cues until each one ends a sentence.
///
/// A merged slot keeps the start of its first cue and the end of its last
/// one; texts are joined with a space. An empty cue is dropped when the next
/// cue takes its place. Cues are renumbered from 1.
pub fn merge_sentences(slots: &[Slot]) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::new();
    let mut current: Option<Slot> = None;

    for slot in slots {
        let text = slot.text.trim();
        current = Some(match current.take() {
            Some(mut open) if !open.text.is_empty() && !ends_sentence(&open.text) => {
                open.end_ms = open.end_ms.max(slot.end_ms);
                if !text.is_empty() {
                    open.text.push(' ');
                    open.text.push_str(text);
                }
                open
            }
            previous => {
                if let Some(done) = previous.filter(|s| !s.text.is_empty()) {
                    merged.push(done);
                }
                Slot::new(0, slot.start_ms, slot.end_ms, text)
            }
        });
    }
    merged.extend(current.filter(|s| !s.text.is_empty()));

    for (i, slot) in merged.iter_mut().enumerate() {
        slot.number = i + 1;
    }
    log::debug!("Merged {} cues into {} sentences", slots.len(), merged.len());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: u64, end: u64, text: &str) -> Slot {
        Slot::new(0, start, end, text)
    }

    #[test]
    fn test_fragments_join_until_punctuation() {
        let merged = merge_sentences(&[
            cue(0, 1000, "So what we"),
            cue(1000, 2000, "found was"),
            cue(2200, 3000, "surprising."),
            cue(3500, 4000, "Really?"),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], Slot::new(1, 0, 3000, "So what we found was surprising."));
        assert_eq!(merged[1], Slot::new(2, 3500, 4000, "Really?"));
    }

    #[test]
    fn test_complete_sentences_are_untouched() {
        let cues = [cue(0, 500, "Hello!"), cue(600, 900, "Bye.")];
        let merged = merge_sentences(&cues);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start_ms, 0);
        assert_eq!(merged[0].end_ms, 500);
        assert_eq!(merged[1].number, 2);
    }

    #[test]
    fn test_cjk_punctuation_ends_a_sentence() {
        let merged = merge_sentences(&[
            cue(0, 800, "我们今天"),
            cue(800, 1500, "讨论这个问题。"),
            cue(1600, 2000, "好吗？"),
            cue(2100, 2600, "好！"),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].text, "我们今天 讨论这个问题。");
        assert_eq!(merged[0].end_ms, 1500);
        assert_eq!(merged[1].text, "好吗？");
    }

    #[test]
    fn test_trailing_fragment_is_kept() {
        let merged = merge_sentences(&[cue(0, 1000, "Done."), cue(1000, 2000, "and then")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].text, "and then");
    }

    #[test]
    fn test_empty_cue_is_replaced_by_the_next() {
        let merged = merge_sentences(&[cue(0, 500, "  "), cue(500, 900, "Hi.")]);
        assert_eq!(merged, vec![Slot::new(1, 500, 900, "Hi.")]);
        assert!(merge_sentences(&[]).is_empty());
    }

    #[test]
    fn test_end_never_moves_back() {
        let merged = merge_sentences(&[cue(0, 3000, "Long cue and"), cue(1000, 2000, "a nested one.")]);
        assert_eq!(merged[0].end_ms, 3000);
    }
}
