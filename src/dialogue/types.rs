use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Listening => "listening",
            CoordinatorState::Thinking => "thinking",
            CoordinatorState::Speaking => "speaking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerSource {
    Child,
    Assistant,
}

impl SpeakerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerSource::Child => "child",
            SpeakerSource::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn_id: u64,
    pub kind: TurnKind,
    pub model: String,
    pub voice: String,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub enum TurnKind {
    Scripted { utterance: String },
    LiveAudio,
}

#[derive(Debug, Clone)]
pub enum TurnSignal {
    Opened,
    Text {
        source: SpeakerSource,
        delta: String,
    },
    Audio {
        pcm: Bytes,
        sample_rate_hz: u32,
    },
    Done,
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub turn_id: u64,
    pub source: SpeakerSource,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ConversationUpdate {
    State(CoordinatorState),
    Transcript(TranscriptEntry),
    Notice(SessionNotice),
    MicLevel { dbfs: f32, speech_active: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceIntent {
    CalledAdult,
    AskedWhatIsThat,
    AskedIsThatReal,
    GeneralQuestion,
}

impl VoiceIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceIntent::CalledAdult => "called_adult",
            VoiceIntent::AskedWhatIsThat => "asked_what_is_that",
            VoiceIntent::AskedIsThatReal => "asked_is_that_real",
            VoiceIntent::GeneralQuestion => "general_question",
        }
    }
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("microphone permission denied: {reason}")]
    PermissionDenied { reason: String },
    #[error("dialogue stream failed: {reason}")]
    Stream { reason: String },
    #[error("duplex audio route unavailable: {reason}")]
    RouteUnavailable { reason: String },
}
