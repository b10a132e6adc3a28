use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dialogue::types::{DialogueError, TurnRequest, TurnSignal};

/// 一次轮次的流通道:信号接收端、可选的上行音频入口与取消令牌。
///
/// `audio_tx` 仅在实时轮次存在;关闭发送端即提交"说完了"。
/// 取消令牌触发后,远端实现必须停止产出信号。
pub struct TurnStream {
    pub signals: mpsc::Receiver<TurnSignal>,
    pub audio_tx: Option<mpsc::Sender<Arc<[f32]>>>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait DialogueClient: Send + Sync {
    /// 发起一个轮次。实现应立即返回流通道,连接建立经由 `TurnSignal::Opened` 上报。
    async fn start_turn(&self, request: TurnRequest) -> Result<TurnStream, DialogueError>;
}

#[async_trait]
pub trait MicrophoneCapture: Send + Sync {
    async fn request_permission(&self) -> Result<(), DialogueError>;
    async fn start_capture(&self, sink: mpsc::Sender<Arc<[f32]>>) -> Result<(), DialogueError>;
    async fn stop_capture(&self);
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// 播放一段合成语音,在播放完成或被 `stop` 打断时返回。
    async fn play(&self, pcm: Bytes, sample_rate_hz: u32) -> Result<(), DialogueError>;
    async fn stop(&self);
}

#[async_trait]
pub trait DuplexRoute: Send + Sync {
    async fn activate(&self) -> Result<(), DialogueError>;
    async fn deactivate(&self);
}
