//! 会话装配层:把空间触达检测、阶段状态机与语音轮次协调器装配成完整的教学会话。

pub mod phase;
mod schedule;
pub mod script;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dialogue::{
    ConversationConfig, ConversationHandle, ConversationUpdate, NoticeLevel, SessionNotice,
    VoiceIntent, VoiceTurnCoordinator,
};
use crate::session::phase::{
    DialogueCommand, PhaseEffect, PhaseMachine, PhaseTimer, PhaseTimings, SceneCommand,
    SessionPhase,
};
use crate::session::schedule::PhaseScheduler;
use crate::spatial::{
    AREvent, FrameSample, ReachConfig, ReachDetector, TrackedObject, TrackingQuality,
};
use crate::telemetry::events::record_proximity;

/// 教学会话总配置,聚合各子系统参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub conversation: ConversationConfig,
    pub reach: ReachConfig,
    pub timings: PhaseTimings,
    /// 道具摆放等待空间定位收敛的上限,超时按默认位姿摆放。
    pub relocalization_wait: Duration,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            reach: ReachConfig::default(),
            timings: PhaseTimings::default(),
            relocalization_wait: Duration::from_secs(10),
            event_capacity: 32,
        }
    }
}

/// 广播给界面层的阶段变更。
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub phase: SessionPhase,
    /// 引发本次变更的事件来源标识。
    pub trigger: &'static str,
    pub issued_at: SystemTime,
}

/// 会话工作循环消费的内部事件。
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Frame(FrameSample),
    PlaceObject { object: TrackedObject },
    ClearObject,
    TimerFired { timer: PhaseTimer },
    Restart,
    Stop,
}

pub struct SessionManager {
    config: SessionConfig,
    coordinator: VoiceTurnCoordinator,
    update_tx: broadcast::Sender<ConversationUpdate>,
    phase_tx: broadcast::Sender<PhaseUpdate>,
    scene_tx: broadcast::Sender<SceneCommand>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let coordinator = VoiceTurnCoordinator::new(config.conversation.clone());
        Self::from_parts(config, coordinator)
    }

    pub fn with_coordinator(config: SessionConfig, coordinator: VoiceTurnCoordinator) -> Self {
        Self::from_parts(config, coordinator)
    }

    fn from_parts(config: SessionConfig, coordinator: VoiceTurnCoordinator) -> Self {
        let (update_tx, _) = broadcast::channel(config.conversation.update_capacity.max(1));
        let (phase_tx, _) = broadcast::channel(32);
        let (scene_tx, _) = broadcast::channel(32);

        Self {
            config,
            coordinator,
            update_tx,
            phase_tx,
            scene_tx,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            target: "session_manager",
            model = %self.config.conversation.model.model,
            "running bootstrap tasks"
        );
        Ok(())
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.update_tx.subscribe()
    }

    pub fn subscribe_phase(&self) -> broadcast::Receiver<PhaseUpdate> {
        self.phase_tx.subscribe()
    }

    pub fn subscribe_scene(&self) -> broadcast::Receiver<SceneCommand> {
        self.scene_tx.subscribe()
    }

    /// 启动一次教学会话:建立语音会话并播报开场白,随后进入探索阶段。
    ///
    /// 返回的 mpsc 接收端只给调用方,界面层另行订阅广播端。
    pub async fn start_encounter_session(
        &self,
    ) -> (EncounterSessionHandle, mpsc::Receiver<ConversationUpdate>) {
        let (conversation, mut updates_rx, intents_rx) = self
            .coordinator
            .start_session(script::utterance_for(DialogueCommand::CoverStoryIntro))
            .await;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let (client_tx, client_rx) = mpsc::channel(self.config.conversation.update_capacity.max(1));

        let updates_bus = self.update_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = updates_rx.recv().await {
                let guarantee_delivery = matches!(
                    update,
                    ConversationUpdate::Notice(SessionNotice {
                        level: NoticeLevel::Warn | NoticeLevel::Error,
                        ..
                    })
                );

                if let Err(err) = updates_bus.send(update.clone()) {
                    warn!(
                        target: "session_manager",
                        %err,
                        "failed to broadcast conversation update"
                    );
                }

                match client_tx.try_send(update) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(update)) => {
                        if guarantee_delivery {
                            if client_tx.send(update).await.is_err() {
                                break;
                            }
                        } else {
                            warn!(
                                target: "session_manager",
                                "dropping conversation update due to slow consumer"
                            );
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });

        let phase_flag = Arc::new(PhaseFlag::default());
        let worker = SessionWorker {
            machine: PhaseMachine::new(self.config.timings.clone()),
            scheduler: PhaseScheduler::new(events_tx.clone()),
            detector: ReachDetector::new(self.config.reach.clone()),
            object: None,
            pending_placement: None,
            placement_seq: 0,
            tracking: TrackingQuality::Normal,
            relocalization_wait: self.config.relocalization_wait,
            conversation,
            events_rx,
            intents_rx,
            intents_open: true,
            update_tx: self.update_tx.clone(),
            phase_tx: self.phase_tx.clone(),
            scene_tx: self.scene_tx.clone(),
            phase_flag: Arc::clone(&phase_flag),
            last_published: SessionPhase::Onboarding,
        };
        let worker = worker.spawn();

        info!(target: "session_manager", "encounter session started");

        let handle = EncounterSessionHandle {
            events_tx,
            phase_flag,
            worker: Some(worker),
            pump: Some(pump),
        };
        (handle, client_rx)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 工作循环写、句柄读的当前阶段快照。
#[derive(Default)]
struct PhaseFlag(AtomicU8);

impl PhaseFlag {
    fn store(&self, phase: SessionPhase) {
        self.0.store(phase as u8, Ordering::Relaxed);
    }

    fn load(&self) -> SessionPhase {
        match self.0.load(Ordering::Relaxed) {
            1 => SessionPhase::Exploration,
            2 => SessionPhase::EncounterPending,
            3 => SessionPhase::PraisePath,
            4 => SessionPhase::CoachingPath,
            5 => SessionPhase::Reflection,
            6 => SessionPhase::Wrapup,
            _ => SessionPhase::Onboarding,
        }
    }
}

/// 一次教学会话的控制句柄。丢弃句柄即中止后台任务并结束会话。
pub struct EncounterSessionHandle {
    events_tx: mpsc::Sender<SessionEvent>,
    phase_flag: Arc<PhaseFlag>,
    worker: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl EncounterSessionHandle {
    /// 当前教学阶段的最近快照。
    pub fn phase(&self) -> SessionPhase {
        self.phase_flag.load()
    }

    /// 提交一帧传感器快照。工作循环繁忙时丢弃本帧,下一帧自然补上。
    pub fn submit_frame(&self, frame: FrameSample) {
        match self.events_tx.try_send(SessionEvent::Frame(frame)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    target: "session_orchestrator",
                    "session worker busy, dropping a tracking frame"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    target: "session_orchestrator",
                    "tracking frame arrived after shutdown"
                );
            }
        }
    }

    /// 把危险道具放入场景并开始探测。定位尚未收敛时延迟到收敛或超时。
    pub async fn place_object(&self, object: TrackedObject) {
        self.send(SessionEvent::PlaceObject { object }).await;
    }

    /// 从场景移除道具并停止探测。
    pub async fn clear_object(&self) {
        self.send(SessionEvent::ClearObject).await;
    }

    /// 重新开场:恢复被藏起的道具,重置阶段流程并重播开场白。
    pub async fn restart(&self) {
        self.send(SessionEvent::Restart).await;
    }

    /// 结束会话并释放语音通道。重复调用无副作用。
    pub async fn stop(&self) {
        self.send(SessionEvent::Stop).await;
    }

    async fn send(&self, event: SessionEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!(
                target: "session_orchestrator",
                "session command arrived after shutdown"
            );
        }
    }
}

impl Drop for EncounterSessionHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// 尚未摆放的道具与其定位收敛的等待期限。
struct PendingPlacement {
    object: TrackedObject,
    deadline: Instant,
}

struct SessionWorker {
    machine: PhaseMachine,
    scheduler: PhaseScheduler,
    detector: ReachDetector,
    object: Option<TrackedObject>,
    pending_placement: Option<PendingPlacement>,
    placement_seq: u64,
    tracking: TrackingQuality,
    relocalization_wait: Duration,
    conversation: ConversationHandle,
    events_rx: mpsc::Receiver<SessionEvent>,
    intents_rx: mpsc::Receiver<VoiceIntent>,
    intents_open: bool,
    update_tx: broadcast::Sender<ConversationUpdate>,
    phase_tx: broadcast::Sender<PhaseUpdate>,
    scene_tx: broadcast::Sender<SceneCommand>,
    phase_flag: Arc<PhaseFlag>,
    last_published: SessionPhase,
}

impl SessionWorker {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let effects = self.machine.start();
        self.apply_effects(effects, "start_session").await;

        loop {
            tokio::select! {
                biased;

                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                intent = self.intents_rx.recv(), if self.intents_open => match intent {
                    Some(intent) => self.handle_intent(intent).await,
                    None => self.intents_open = false,
                },
            }
        }
    }

    /// 返回 `true` 表示会话结束,工作循环退出。
    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(frame) => self.handle_frame(frame).await,
            SessionEvent::PlaceObject { object } => self.handle_place(object),
            SessionEvent::ClearObject => self.handle_clear(),
            SessionEvent::TimerFired { timer } => {
                let effects = self.machine.on_timer(timer);
                self.apply_effects(effects, timer.as_str()).await;
            }
            SessionEvent::Restart => self.handle_restart().await,
            SessionEvent::Stop => {
                self.shutdown().await;
                return true;
            }
        }
        false
    }

    async fn handle_frame(&mut self, frame: FrameSample) {
        self.tracking = frame.tracking;
        self.resolve_pending_placement(frame.captured_at);

        let Some(object) = self.object.as_mut() else {
            return;
        };
        let events = self.detector.evaluate(&frame, object);
        for event in events {
            self.handle_ar_event(event).await;
        }
    }

    fn handle_place(&mut self, object: TrackedObject) {
        if self.tracking != TrackingQuality::Relocalizing {
            self.commit_placement(object);
            return;
        }

        info!(
            target: "session_orchestrator",
            tracking = self.tracking.as_str(),
            "deferring prop placement until relocalization converges"
        );
        self.pending_placement = Some(PendingPlacement {
            object,
            deadline: Instant::now() + self.relocalization_wait,
        });
    }

    /// 帧时钟驱动的摆放重试:定位恢复立即摆放,超过期限按默认位姿摆放。
    fn resolve_pending_placement(&mut self, frame_clock: Instant) {
        let ready = match self.pending_placement.as_ref() {
            None => return,
            Some(_) if self.tracking != TrackingQuality::Relocalizing => true,
            Some(pending) if frame_clock >= pending.deadline => {
                warn!(
                    target: "session_orchestrator",
                    waited_ms = self.relocalization_wait.as_millis() as u64,
                    "relocalization did not converge, placing the prop at its default pose"
                );
                self.emit_notice(
                    NoticeLevel::Warn,
                    "空间定位有点慢，先把道具放在默认位置，我们继续玩。",
                );
                true
            }
            Some(_) => false,
        };

        if ready {
            if let Some(pending) = self.pending_placement.take() {
                self.commit_placement(pending.object);
            }
        }
    }

    fn commit_placement(&mut self, object: TrackedObject) {
        self.placement_seq += 1;
        self.broadcast_scene(SceneCommand::PlaceObject(object.transform()));
        self.detector.reset();
        info!(
            target: "session_orchestrator",
            placement_seq = self.placement_seq,
            "hazard prop placed"
        );
        self.object = Some(object);
    }

    fn handle_clear(&mut self) {
        self.pending_placement = None;
        if self.object.take().is_some() {
            self.broadcast_scene(SceneCommand::HideObject);
            self.detector.reset();
            info!(target: "session_orchestrator", "hazard prop cleared");
        }
    }

    async fn handle_restart(&mut self) {
        info!(target: "session_orchestrator", "restarting the encounter session");
        self.pending_placement = None;
        self.scheduler.cancel();
        self.detector.reset();

        let hidden = self
            .object
            .as_ref()
            .map(|object| !object.is_visible())
            .unwrap_or(false);
        if hidden {
            self.apply_scene_command(SceneCommand::ShowObject);
        }

        self.conversation.interrupt().await;
        self.speak(DialogueCommand::CoverStoryIntro).await;
        let effects = self.machine.start();
        self.apply_effects(effects, "restart_session").await;
    }

    async fn handle_ar_event(&mut self, event: AREvent) {
        let metres = match event {
            AREvent::ProximityNear { distance_m } => distance_m,
            AREvent::BacksAway { delta_m } => delta_m,
            AREvent::Reach { depth_delta_m, .. } => depth_delta_m,
        };
        record_proximity(event.kind(), metres, self.placement_seq);

        let effects = self.machine.on_ar_event(&event);
        self.apply_effects(effects, event.kind()).await;
    }

    async fn handle_intent(&mut self, intent: VoiceIntent) {
        debug!(
            target: "session_orchestrator",
            intent = intent.as_str(),
            "voice intent received"
        );
        let effects = self.machine.on_intent(intent);
        self.apply_effects(effects, intent.as_str()).await;
    }

    async fn apply_effects(&mut self, effects: Vec<PhaseEffect>, trigger: &'static str) {
        for effect in effects {
            match effect {
                PhaseEffect::Speak(command) => self.speak(command).await,
                PhaseEffect::Scene(command) => self.apply_scene_command(command),
                PhaseEffect::Schedule { timer, delay } => self.scheduler.schedule(timer, delay),
                PhaseEffect::CancelTimers => self.scheduler.cancel(),
            }
        }
        self.publish_phase(trigger);
    }

    async fn speak(&self, command: DialogueCommand) {
        let utterance = script::utterance_for(command);
        if !self.conversation.speak_scripted(utterance).await {
            warn!(
                target: "session_orchestrator",
                command = command.as_str(),
                "scripted line dropped by the coordinator"
            );
        }
    }

    fn apply_scene_command(&mut self, command: SceneCommand) {
        match command {
            SceneCommand::HideObject => {
                if let Some(object) = self.object.as_mut() {
                    object.set_visible(false);
                }
            }
            SceneCommand::ShowObject => {
                if let Some(object) = self.object.as_mut() {
                    object.set_visible(true);
                }
            }
            SceneCommand::PlaceObject(_) => {}
        }
        self.broadcast_scene(command);
    }

    fn broadcast_scene(&self, command: SceneCommand) {
        if let Err(err) = self.scene_tx.send(command) {
            warn!(
                target: "session_orchestrator",
                %err,
                "failed to broadcast scene command"
            );
        }
    }

    fn publish_phase(&mut self, trigger: &'static str) {
        let phase = self.machine.phase();
        if phase == self.last_published {
            return;
        }
        self.last_published = phase;
        self.phase_flag.store(phase);

        let update = PhaseUpdate {
            phase,
            trigger,
            issued_at: SystemTime::now(),
        };
        if let Err(err) = self.phase_tx.send(update) {
            warn!(
                target: "session_orchestrator",
                %err,
                "failed to broadcast phase update"
            );
        }
    }

    fn emit_notice(&self, level: NoticeLevel, message: &str) {
        let update = ConversationUpdate::Notice(SessionNotice {
            level,
            message: message.to_string(),
        });
        if let Err(err) = self.update_tx.send(update) {
            warn!(
                target: "session_orchestrator",
                %err,
                "failed to broadcast session notice"
            );
        }
    }

    async fn shutdown(&mut self) {
        info!(target: "session_orchestrator", "encounter session stopping");
        self.pending_placement = None;
        self.scheduler.cancel();
        let effects = self.machine.stop();
        self.apply_effects(effects, "stop_session").await;

        self.conversation.stop().await;
        // 等协调器完成收尾(释放麦克风与音频通道)再退出,此后的句柄
        // 析构会中止还没跑完的后台任务。
        for _ in 0..50 {
            if !self.conversation.is_conversation_active() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}
