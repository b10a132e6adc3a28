use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dialogue::types::CoordinatorState;

use super::state::TurnGuards;
use super::ConversationCommand;

/// 会话的拥有者句柄。丢弃句柄即中止后台任务并结束会话。
pub struct ConversationHandle {
    pub(crate) command_tx: mpsc::Sender<ConversationCommand>,
    guards: Arc<TurnGuards>,
    monitor: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ConversationHandle {
    pub(super) fn new(
        command_tx: mpsc::Sender<ConversationCommand>,
        guards: Arc<TurnGuards>,
        monitor: JoinHandle<()>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            command_tx,
            guards,
            monitor: Some(monitor),
            worker: Some(worker),
        }
    }

    /// 请求播报一条台词。已有台词在途时丢弃本条并返回 `false`。
    pub async fn speak_scripted(&self, utterance: impl Into<String>) -> bool {
        if self.guards.is_scripted_in_flight() {
            warn!(
                target: "turn_coordinator",
                "scripted utterance already in flight, dropping request"
            );
            return false;
        }

        let utterance = utterance.into();
        match self
            .command_tx
            .send(ConversationCommand::SpeakScripted { utterance })
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target: "turn_coordinator",
                    %err,
                    "failed to enqueue scripted utterance"
                );
                false
            }
        }
    }

    /// 立即打断当前轮次或播放,回到聆听。任意状态下可调用。
    pub async fn interrupt(&self) {
        let _ = self.command_tx.send(ConversationCommand::Interrupt).await;
    }

    /// 结束会话:取消在途轮次、停止播放与采集、释放音频通道。可重复调用。
    pub async fn stop(&self) {
        let _ = self.command_tx.send(ConversationCommand::Stop).await;
    }

    pub fn state(&self) -> CoordinatorState {
        self.guards.state()
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.guards.is_turn_in_flight()
    }

    pub fn is_conversation_active(&self) -> bool {
        self.guards.is_conversation_active()
    }

    #[cfg(test)]
    pub(crate) fn guards(&self) -> Arc<TurnGuards> {
        Arc::clone(&self.guards)
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
