//! 阶段定时器:可取消的一次性延迟任务。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use super::phase::PhaseTimer;
use super::SessionEvent;

/// 单槽位排程器。同一时刻最多挂起一个定时器,新的排程会取消旧的,
/// 阶段切换时整体撤销,杜绝过期定时器打进后续阶段。
pub(crate) struct PhaseScheduler {
    events_tx: mpsc::Sender<SessionEvent>,
    pending: Option<ScheduledTask>,
}

struct ScheduledTask {
    timer: PhaseTimer,
    task: JoinHandle<()>,
}

impl PhaseScheduler {
    pub(crate) fn new(events_tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            events_tx,
            pending: None,
        }
    }

    /// 排程一个延迟触发,替换尚未触发的旧排程。
    pub(crate) fn schedule(&mut self, timer: PhaseTimer, delay: Duration) {
        self.cancel();

        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            if events_tx
                .send(SessionEvent::TimerFired { timer })
                .await
                .is_err()
            {
                debug!(
                    target: "session_orchestrator",
                    timer = timer.as_str(),
                    "phase timer fired after session shutdown"
                );
            }
        });

        debug!(
            target: "session_orchestrator",
            timer = timer.as_str(),
            delay_ms = delay.as_millis() as u64,
            "phase timer scheduled"
        );
        self.pending = Some(ScheduledTask { timer, task });
    }

    /// 撤销挂起的排程;没有排程时为空操作。
    pub(crate) fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            debug!(
                target: "session_orchestrator",
                timer = pending.timer.as_str(),
                "pending phase timer cancelled"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_timer(&self) -> Option<PhaseTimer> {
        self.pending.as_ref().map(|pending| pending.timer)
    }
}

impl Drop for PhaseScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
