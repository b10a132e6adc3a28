//! Lightweight phrase-table classification of child utterances.

use crate::dialogue::types::VoiceIntent;

const REALNESS_PHRASES: &[&str] = &[
    "是真的吗",
    "是真的么",
    "真的假的",
    "is that real",
    "is it real",
    "real or fake",
];

const IDENTITY_PHRASES: &[&str] = &[
    "这是什么",
    "那是什么",
    "是什么东西",
    "什么东西",
    "what is that",
    "what's that",
    "what is this",
    "what's this",
];

const ADULT_CALL_PHRASES: &[&str] = &[
    "妈妈",
    "爸爸",
    "老师",
    "快来",
    "来看",
    "come here",
    "come look",
];

const ADULT_CALL_WORDS: &[&str] = &["mom", "mommy", "mum", "dad", "daddy", "teacher"];

const QUESTION_OPENERS: &[&str] = &[
    "why", "how", "what", "where", "who", "when", "can", "could", "is", "are", "do", "does",
];

#[derive(Debug, Default)]
pub(crate) struct IntentClassifier;

impl IntentClassifier {
    pub(crate) fn classify(text: &str) -> Option<VoiceIntent> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();

        if Self::mentions_any(&lowered, REALNESS_PHRASES) {
            return Some(VoiceIntent::AskedIsThatReal);
        }
        if Self::mentions_any(&lowered, IDENTITY_PHRASES) {
            return Some(VoiceIntent::AskedWhatIsThat);
        }
        if Self::calls_for_adult(&lowered) {
            return Some(VoiceIntent::CalledAdult);
        }
        if Self::sounds_like_question(&lowered) {
            return Some(VoiceIntent::GeneralQuestion);
        }
        None
    }

    fn mentions_any(text: &str, phrases: &[&str]) -> bool {
        phrases.iter().any(|phrase| text.contains(phrase))
    }

    fn calls_for_adult(text: &str) -> bool {
        if Self::mentions_any(text, ADULT_CALL_PHRASES) {
            return true;
        }
        // Short English callouts match whole words only, so "moment" stays quiet.
        text.split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .any(|token| ADULT_CALL_WORDS.contains(&token))
    }

    fn sounds_like_question(text: &str) -> bool {
        if text.contains('?') || text.contains('？') {
            return true;
        }
        if text.ends_with('吗') || text.ends_with('呢') {
            return true;
        }
        if text.contains("为什么") || text.contains("怎么") {
            return true;
        }
        text.split_whitespace()
            .next()
            .map(|first| QUESTION_OPENERS.contains(&first))
            .unwrap_or(false)
    }
}
