use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dialogue::config::ConversationConfig;
use crate::dialogue::runtime::{self, ConversationCommand, ConversationHandle};
use crate::dialogue::traits::{
    AudioOutput, DialogueClient, DuplexRoute, MicrophoneCapture, TurnStream,
};
use crate::dialogue::types::{
    ConversationUpdate, DialogueError, SpeakerSource, TurnKind, TurnRequest, TurnSignal,
    VoiceIntent,
};

pub struct VoiceTurnCoordinator {
    config: ConversationConfig,
    client: Arc<dyn DialogueClient>,
    microphone: Arc<dyn MicrophoneCapture>,
    audio_output: Arc<dyn AudioOutput>,
    route: Arc<dyn DuplexRoute>,
}

impl VoiceTurnCoordinator {
    pub fn new(config: ConversationConfig) -> Self {
        Self::with_client(config, Arc::new(FallbackDialogueClient::default()))
    }

    pub fn with_client(config: ConversationConfig, client: Arc<dyn DialogueClient>) -> Self {
        Self::with_components(
            config,
            client,
            Arc::new(FallbackMicrophone::default()),
            Arc::new(FallbackAudioOutput::default()),
            Arc::new(FallbackDuplexRoute::default()),
        )
    }

    pub fn with_components(
        config: ConversationConfig,
        client: Arc<dyn DialogueClient>,
        microphone: Arc<dyn MicrophoneCapture>,
        audio_output: Arc<dyn AudioOutput>,
        route: Arc<dyn DuplexRoute>,
    ) -> Self {
        Self {
            config,
            client,
            microphone,
            audio_output,
            route,
        }
    }

    /// 启动一次会话:激活音频通道、请求权限、播报开场白,随后进入持续聆听。
    pub async fn start_session(
        &self,
        intro_utterance: impl Into<String>,
    ) -> (
        ConversationHandle,
        mpsc::Receiver<ConversationUpdate>,
        mpsc::Receiver<VoiceIntent>,
    ) {
        let (handle, updates_rx, intents_rx) = runtime::spawn_conversation(
            self.config.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.microphone),
            Arc::clone(&self.audio_output),
            Arc::clone(&self.route),
        );

        let intro = intro_utterance.into();
        if handle
            .command_tx
            .send(ConversationCommand::Begin { intro })
            .await
            .is_err()
        {
            warn!(
                target: "turn_coordinator",
                "conversation worker unavailable at startup"
            );
        }

        (handle, updates_rx, intents_rx)
    }
}

/// 无远端模型时的离线兜底:台词轮次以文字回显,实时轮次回一句固定提示。
#[derive(Default)]
struct FallbackDialogueClient;

#[async_trait]
impl DialogueClient for FallbackDialogueClient {
    async fn start_turn(&self, request: TurnRequest) -> Result<TurnStream, DialogueError> {
        let (signal_tx, signals) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let turn_cancel = cancel.clone();

        tokio::spawn(async move {
            let text = match request.kind {
                TurnKind::Scripted { utterance } => utterance,
                TurnKind::LiveAudio => "我在听，你说呀。".to_string(),
            };
            let steps = [
                TurnSignal::Opened,
                TurnSignal::Text {
                    source: SpeakerSource::Assistant,
                    delta: text,
                },
                TurnSignal::Done,
            ];

            for signal in steps {
                tokio::select! {
                    _ = turn_cancel.cancelled() => return,
                    result = signal_tx.send(signal) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(TurnStream {
            signals,
            audio_tx: None,
            cancel,
        })
    }
}

#[derive(Default)]
struct FallbackMicrophone;

#[async_trait]
impl MicrophoneCapture for FallbackMicrophone {
    async fn request_permission(&self) -> Result<(), DialogueError> {
        Ok(())
    }

    async fn start_capture(&self, _sink: mpsc::Sender<Arc<[f32]>>) -> Result<(), DialogueError> {
        Ok(())
    }

    async fn stop_capture(&self) {}
}

#[derive(Default)]
struct FallbackAudioOutput;

#[async_trait]
impl AudioOutput for FallbackAudioOutput {
    async fn play(&self, _pcm: Bytes, _sample_rate_hz: u32) -> Result<(), DialogueError> {
        Ok(())
    }

    async fn stop(&self) {}
}

#[derive(Default)]
struct FallbackDuplexRoute;

#[async_trait]
impl DuplexRoute for FallbackDuplexRoute {
    async fn activate(&self) -> Result<(), DialogueError> {
        Ok(())
    }

    async fn deactivate(&self) {}
}
