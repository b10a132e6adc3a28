//! 语音轮次协调服务脚手架。

mod constants;
mod coordinator;
mod intent;
mod runtime;
mod vad;

pub mod config;
pub mod traits;
pub mod types;

pub use config::{ConversationConfig, DialogueModelConfig, VadConfig};
pub use coordinator::VoiceTurnCoordinator;
pub use runtime::ConversationHandle;
pub use traits::{AudioOutput, DialogueClient, DuplexRoute, MicrophoneCapture, TurnStream};
pub use types::{
    ConversationUpdate, CoordinatorState, DialogueError, NoticeLevel, SessionNotice,
    SpeakerSource, TranscriptEntry, TurnKind, TurnRequest, TurnSignal, VoiceIntent,
};

#[cfg(test)]
mod tests;
