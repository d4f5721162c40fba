//! Subtitle translation
//!
//! Texts are optionally summarised first so the model knows the topic, then
//! translated in tagged batches through a [`FallbackChain`]. Whatever the
//! service does, the result has exactly one text per input segment.

pub mod client;
pub mod retry;
pub mod tags;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use client::{ChatBackend, ChatClient, ChatMessage};
pub use retry::{BatchWorker, ChainResult, FallbackChain, UnitOrigin};

use crate::config::TranslationConfig;
use crate::error::{DubSyncError, Result};
use crate::progress::ProgressTracker;
use crate::subtitle::Slot;

/// Translated slots and how they were obtained
#[derive(Debug, Clone, Serialize)]
pub struct TranslatedSlots {
    /// Same timings as the input, translated text
    pub slots: Vec<Slot>,
    /// Indices whose original text was kept
    pub passthrough: Vec<usize>,
    /// Indices that needed a per-segment retry
    pub retried: Vec<usize>,
    /// Content summary used as context, if any
    pub analysis: Option<String>,
}

/// Pick at most `sample_size` texts spread evenly over `texts`
pub fn sample_evenly(texts: &[String], sample_size: usize) -> Vec<&str> {
    let size = sample_size.min(texts.len());
    if size == 0 {
        return Vec::new();
    }
    let step = (texts.len() / size).max(1);
    texts
        .iter()
        .step_by(step)
        .take(size)
        .map(String::as_str)
        .collect()
}

/// One tagged translation request per batch
struct TaggedTranslation<'a> {
    backend: &'a dyn ChatBackend,
    system: String,
    instructions: String,
}

#[async_trait]
impl<'a> BatchWorker for TaggedTranslation<'a> {
    type Unit = String;
    type Output = String;

    async fn run_batch(&self, units: &[(usize, &String)]) -> Result<HashMap<usize, String>> {
        let tagged = tags::build_tagged(units.iter().map(|(i, text)| (*i, text.as_str())));
        let messages = [
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(format!("{}\n\n## Subtitles\n\n{}", self.instructions, tagged)),
        ];
        let response = self.backend.complete(&messages).await?;

        let mut parsed = tags::parse_tagged(&response);
        if parsed.is_empty() && units.len() == 1 && !response.trim().is_empty() {
            // A single segment is sometimes answered without its tag
            parsed.insert(units[0].0, response.trim().to_string());
        }
        parsed.retain(|id, _| units.iter().any(|(i, _)| i == id));

        if parsed.len() < units.len() {
            log::debug!(
                "{}",
                DubSyncError::TranslationAlignment(format!(
                    "{} of {} segments answered",
                    parsed.len(),
                    units.len()
                ))
            );
        }
        Ok(parsed)
    }

    fn passthrough(&self, unit: &String) -> String {
        unit.clone()
    }
}

/// Translates subtitle text through a chat model
pub struct SubtitleTranslator {
    backend: Arc<dyn ChatBackend>,
    config: TranslationConfig,
}

impl SubtitleTranslator {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &TranslationConfig) -> Self {
        Self {
            backend,
            config: config.clone(),
        }
    }

    /// Translator backed by the configured chat completion API
    pub fn from_config(config: &TranslationConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ChatClient::new(config)?), config))
    }

    /// Summarise topic, terminology and tone; `None` when the service fails
    pub async fn analyze_content(&self, texts: &[String]) -> Option<String> {
        let sample = sample_evenly(texts, self.config.analysis_sample_size);
        if sample.is_empty() {
            return None;
        }
        log::info!("Analysing {} of {} subtitles", sample.len(), texts.len());

        let prompt = format!(
            "Analyse the following video subtitles and extract:\n\n\
             1. The topic and genre of the video\n\
             2. A short summary of the content\n\
             3. Technical terms or special vocabulary\n\
             4. The language style and tone\n\n\
             Keep the answer brief; it will guide the translation.\n\n\
             Subtitles:\n{}",
            sample.join("\n\n")
        );
        let messages = [
            ChatMessage::system(
                "You are a video content analyst who is good at understanding and summarising videos.",
            ),
            ChatMessage::user(prompt),
        ];

        match self.backend.complete(&messages).await {
            Ok(analysis) if !analysis.trim().is_empty() => {
                log::debug!("Content analysis:\n{}", analysis);
                Some(analysis)
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("Content analysis failed, translating without context: {}", e);
                None
            }
        }
    }

    fn worker<'a>(&'a self, analysis: Option<&str>) -> TaggedTranslation<'a> {
        let source = &self.config.source_language;
        let target = &self.config.target_language;

        let system = format!(
            "You are a professional subtitle translator. You translate {source} video subtitles \
             into fluent, accurate {target} that reads naturally when spoken aloud, keeping the \
             meaning and emotion of the original and translating technical terms precisely."
        );

        let mut instructions = format!("Translate the following {source} subtitles into {target}.\n\n");
        if let Some(analysis) = analysis {
            let _ = write!(instructions, "## Video content\n\n{}\n\n", analysis.trim());
        }
        instructions.push_str(
            "## Format\n\
             - Every subtitle starts with a unique id in square brackets, e.g. [12]\n\
             - Keep every id unchanged in front of its translation\n\
             - Translate only the text after the id and add nothing else\n\n\
             ## Requirements\n\
             - Keep each subtitle independent but the whole translation consistent\n\
             - Keep the length close to the original (0.8 to 1.2 times) so it fits the dub\n\
             - Return only the translations, without explanations",
        );

        TaggedTranslation {
            backend: self.backend.as_ref(),
            system,
            instructions,
        }
    }

    /// Translate texts; the output has one entry per input, in order
    pub async fn translate_texts(
        &self,
        texts: &[String],
        analysis: Option<&str>,
        tracker: Option<&ProgressTracker>,
    ) -> ChainResult<String> {
        log::info!(
            "Translating {} segments from {} to {}",
            texts.len(),
            self.config.source_language,
            self.config.target_language
        );
        let worker = self.worker(analysis);
        FallbackChain::from_config(&self.config)
            .run(&worker, texts, tracker)
            .await
    }

    /// Translate slot texts, keeping numbers and timings
    pub async fn translate_slots(
        &self,
        slots: &[Slot],
        tracker: Option<&ProgressTracker>,
    ) -> TranslatedSlots {
        let texts: Vec<String> = slots.iter().map(|s| s.text.clone()).collect();
        let analysis = if self.config.analyze_content {
            self.analyze_content(&texts).await
        } else {
            None
        };

        let result = self.translate_texts(&texts, analysis.as_deref(), tracker).await;
        let passthrough = result.passthrough_indices();
        let retried = result.retried_indices();
        if !passthrough.is_empty() {
            log::warn!(
                "{} segments kept their original text: {:?}",
                passthrough.len(),
                passthrough
            );
        }

        let slots = slots
            .iter()
            .zip(result.outcomes)
            .map(|(slot, outcome)| Slot {
                text: outcome.into_value(),
                ..slot.clone()
            })
            .collect();

        TranslatedSlots {
            slots,
            passthrough,
            retried,
            analysis,
        }
    }
}

/// Write the analysis and a few before/after samples next to a translation
pub fn write_translation_log(
    path: &Path,
    original: &[Slot],
    translated: &TranslatedSlots,
) -> Result<()> {
    let mut log_text = String::new();
    let _ = writeln!(log_text, "## Content analysis\n");
    let _ = writeln!(
        log_text,
        "{}\n",
        translated.analysis.as_deref().unwrap_or("(none)")
    );

    let _ = writeln!(log_text, "## Samples\n");
    let originals: Vec<String> = original.iter().map(|s| s.text.clone()).collect();
    let step = (originals.len() / 5.min(originals.len()).max(1)).max(1);
    for (n, i) in (0..originals.len()).step_by(step).take(5).enumerate() {
        let _ = writeln!(
            log_text,
            "Sample {}:\nOriginal: {}\nTranslated: {}\n",
            n + 1,
            originals[i],
            translated.slots[i].text
        );
    }

    if !translated.passthrough.is_empty() {
        let _ = writeln!(log_text, "## Untranslated\n\n{:?}", translated.passthrough);
    }

    std::fs::write(path, log_text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Echoes tagged requests in upper case, dropping some ids
    struct FakeChat {
        dropped: Vec<usize>,
        fail_single: bool,
        fail_analysis: bool,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeChat {
        fn new(dropped: &[usize]) -> Self {
            Self {
                dropped: dropped.to_vec(),
                fail_single: false,
                fail_analysis: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let user = &messages[1].content;

            if user.starts_with("Analyse") {
                if self.fail_analysis {
                    return Err(DubSyncError::Other("analysis unavailable".into()));
                }
                return Ok("A cooking show with a cheerful tone.".to_string());
            }

            let body = user.split("## Subtitles\n\n").nth(1).unwrap_or_default();
            let segments = tags::parse_tagged(body);
            if segments.len() == 1 && self.fail_single {
                return Err(DubSyncError::Other("timeout".into()));
            }
            let mut ids: Vec<_> = segments.keys().copied().collect();
            ids.sort_unstable();
            Ok(ids
                .into_iter()
                .filter(|id| segments.len() == 1 || !self.dropped.contains(id))
                .map(|id| format!("[{}] {}", id + 1, segments[&id].to_uppercase()))
                .collect::<Vec<_>>()
                .join("\n\n"))
        }
    }

    fn slots(n: usize) -> Vec<Slot> {
        (0..n)
            .map(|i| Slot::new(i + 1, i as u64 * 1000, i as u64 * 1000 + 900, format!("line {}", i)))
            .collect()
    }

    fn config() -> TranslationConfig {
        TranslationConfig {
            batch_delay_ms: 0,
            max_attempts: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partial_answer_keeps_cardinality() {
        let chat = Arc::new(FakeChat {
            fail_single: true,
            ..FakeChat::new(&[2, 8])
        });
        let translator = SubtitleTranslator::new(chat.clone(), &config());
        let input = slots(10);

        let result = translator.translate_slots(&input, None).await;
        assert_eq!(result.slots.len(), 10);
        assert_eq!(result.passthrough, vec![2, 8]);
        assert_eq!(result.slots[2].text, "line 2");
        assert_eq!(result.slots[3].text, "LINE 3");
        assert_eq!(result.slots[9].start_ms, input[9].start_ms);
        assert_eq!(result.analysis.as_deref(), Some("A cooking show with a cheerful tone."));
    }

    #[tokio::test]
    async fn test_single_retry_fills_gap() {
        let chat = Arc::new(FakeChat::new(&[1]));
        let translator = SubtitleTranslator::new(chat.clone(), &config());

        let result = translator.translate_slots(&slots(3), None).await;
        assert!(result.passthrough.is_empty());
        assert_eq!(result.retried, vec![1]);
        assert_eq!(result.slots[1].text, "LINE 1");
    }

    #[tokio::test]
    async fn test_analysis_failure_gives_no_context() {
        let chat = Arc::new(FakeChat {
            fail_analysis: true,
            ..FakeChat::new(&[])
        });
        let translator = SubtitleTranslator::new(chat.clone(), &config());

        let result = translator.translate_slots(&slots(2), None).await;
        assert!(result.analysis.is_none());
        assert_eq!(result.slots[0].text, "LINE 0");

        let requests = chat.requests.lock().unwrap();
        let last = &requests.last().unwrap()[1].content;
        assert!(!last.contains("## Video content"));
        assert!(last.contains("[1] line 0\n\n[2] line 1"));
    }

    #[tokio::test]
    async fn test_analysis_can_be_disabled() {
        let chat = Arc::new(FakeChat::new(&[]));
        let translator = SubtitleTranslator::new(
            chat.clone(),
            &TranslationConfig {
                analyze_content: false,
                ..config()
            },
        );
        translator.translate_slots(&slots(2), None).await;
        assert_eq!(chat.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sample_evenly() {
        let texts: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let sample = sample_evenly(&texts, 50);
        assert_eq!(sample.len(), 50);
        assert_eq!(sample[0], "0");
        assert_eq!(sample[1], "2");

        let few: Vec<String> = vec!["a".into(), "b".into()];
        assert_eq!(sample_evenly(&few, 50), vec!["a", "b"]);
        assert!(sample_evenly(&[], 50).is_empty());
    }

    #[test]
    fn test_translation_log() {
        let dir = tempfile::tempdir().unwrap();
        let original = slots(2);
        let translated = TranslatedSlots {
            slots: vec![
                Slot::new(1, 0, 900, "LINE 0"),
                Slot::new(2, 1000, 1900, "line 1"),
            ],
            passthrough: vec![1],
            retried: vec![],
            analysis: Some("Cooking".to_string()),
        };
        let path = dir.path().join("translation.log");
        write_translation_log(&path, &original, &translated).unwrap();

        let log_text = std::fs::read_to_string(&path).unwrap();
        assert!(log_text.contains("Cooking"));
        assert!(log_text.contains("Original: line 0\nTranslated: LINE 0"));
        assert!(log_text.contains("[1]"));
    }
}
