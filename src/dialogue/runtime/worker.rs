use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dialogue::config::ConversationConfig;
use crate::dialogue::constants::MIN_SETTLE_AFTER_PLAYBACK;
use crate::dialogue::intent::IntentClassifier;
use crate::dialogue::traits::{
    AudioOutput, DialogueClient, DuplexRoute, MicrophoneCapture, TurnStream,
};
use crate::dialogue::types::{
    ConversationUpdate, CoordinatorState, NoticeLevel, SessionNotice, SpeakerSource,
    TranscriptEntry, TurnKind, TurnRequest, TurnSignal, VoiceIntent,
};
use crate::dialogue::vad::{VadEvent, VoiceActivityDetector};
use crate::telemetry::events::{record_barge_in, record_turn_latency, record_vad_transition};

use super::state::{AudioAccumulator, TurnGuards};
use super::ConversationCommand;

/// 在途轮次的全部本地簿记。epoch 用于丢弃被取消轮次的迟到信号。
struct ActiveTurn {
    epoch: u64,
    turn_id: u64,
    scripted: bool,
    opened: bool,
    audio_tx: Option<mpsc::Sender<Arc<[f32]>>>,
    cancel: CancellationToken,
    bridge: JoinHandle<()>,
    audio: AudioAccumulator,
    child_text: String,
    intent_sent: bool,
    started_at: Instant,
    first_signal_at: Option<Instant>,
}

pub(crate) struct ConversationWorker {
    config: ConversationConfig,
    client: Arc<dyn DialogueClient>,
    microphone: Arc<dyn MicrophoneCapture>,
    audio_output: Arc<dyn AudioOutput>,
    route: Arc<dyn DuplexRoute>,
    command_rx: mpsc::Receiver<ConversationCommand>,
    command_tx: mpsc::Sender<ConversationCommand>,
    signal_rx: mpsc::Receiver<(u64, TurnSignal)>,
    signal_tx: mpsc::Sender<(u64, TurnSignal)>,
    mic_rx: mpsc::Receiver<Arc<[f32]>>,
    mic_tx: mpsc::Sender<Arc<[f32]>>,
    updates_tx: mpsc::Sender<ConversationUpdate>,
    intents_tx: mpsc::Sender<VoiceIntent>,
    guards: Arc<TurnGuards>,
    vad: VoiceActivityDetector,
    active_turn: Option<ActiveTurn>,
    playback: Option<JoinHandle<()>>,
    playback_started_at: Option<Instant>,
    mic_active: bool,
    next_turn_id: u64,
    epoch: u64,
    started_at: Instant,
}

impl ConversationWorker {
    pub(crate) fn new(
        config: ConversationConfig,
        client: Arc<dyn DialogueClient>,
        microphone: Arc<dyn MicrophoneCapture>,
        audio_output: Arc<dyn AudioOutput>,
        route: Arc<dyn DuplexRoute>,
        command_rx: mpsc::Receiver<ConversationCommand>,
        command_tx: mpsc::Sender<ConversationCommand>,
        signal_rx: mpsc::Receiver<(u64, TurnSignal)>,
        signal_tx: mpsc::Sender<(u64, TurnSignal)>,
        mic_rx: mpsc::Receiver<Arc<[f32]>>,
        mic_tx: mpsc::Sender<Arc<[f32]>>,
        updates_tx: mpsc::Sender<ConversationUpdate>,
        intents_tx: mpsc::Sender<VoiceIntent>,
        guards: Arc<TurnGuards>,
        started_at: Instant,
    ) -> Self {
        let vad = VoiceActivityDetector::new(config.vad.clone());
        Self {
            config,
            client,
            microphone,
            audio_output,
            route,
            command_rx,
            command_tx,
            signal_rx,
            signal_tx,
            mic_rx,
            mic_tx,
            updates_tx,
            intents_tx,
            guards,
            vad,
            active_turn: None,
            playback: None,
            playback_started_at: None,
            mic_active: false,
            next_turn_id: 0,
            epoch: 0,
            started_at,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                maybe_signal = self.signal_rx.recv() => {
                    if let Some((epoch, signal)) = maybe_signal {
                        self.handle_signal(epoch, signal).await;
                    }
                }

                maybe_frame = self.mic_rx.recv() => {
                    if let Some(frame) = maybe_frame {
                        self.handle_capture(frame).await;
                    }
                }
            }
        }
    }

    /// 返回 `true` 表示会话终止,事件循环应退出。
    async fn handle_command(&mut self, command: ConversationCommand) -> bool {
        match command {
            ConversationCommand::Begin { intro } => {
                self.begin_session(intro).await;
                false
            }
            ConversationCommand::SpeakScripted { utterance } => {
                self.begin_scripted_turn(utterance).await;
                false
            }
            ConversationCommand::Interrupt => {
                self.barge_in("interrupt_command").await;
                false
            }
            ConversationCommand::ResumeListening { epoch } => {
                self.finish_playback(epoch).await;
                false
            }
            ConversationCommand::AbortStalledTurn { epoch } => {
                self.abort_stalled_turn(epoch).await;
                false
            }
            ConversationCommand::Stop => {
                self.shutdown().await;
                true
            }
        }
    }

    async fn begin_session(&mut self, intro: String) {
        info!(target: "turn_coordinator", "starting conversation session");

        if let Err(err) = self.route.activate().await {
            error!(
                target: "turn_coordinator",
                %err,
                "failed to activate duplex audio route"
            );
            self.emit_notice(NoticeLevel::Error, "音频通道不可用，请检查设备后重试".to_string())
                .await;
            self.set_state(CoordinatorState::Idle).await;
            return;
        }

        if let Err(err) = self.microphone.request_permission().await {
            warn!(target: "turn_coordinator", %err, "microphone permission denied");
            self.send_update(ConversationUpdate::Transcript(TranscriptEntry {
                turn_id: 0,
                source: SpeakerSource::Assistant,
                text: "我听不到你说话，请大人帮忙打开麦克风权限。".to_string(),
            }))
            .await;
            self.emit_notice(
                NoticeLevel::Error,
                "麦克风权限被拒绝，开启权限后才能开始对话".to_string(),
            )
            .await;
            self.route.deactivate().await;
            self.set_state(CoordinatorState::Idle).await;
            return;
        }

        self.guards.set_conversation_active(true);
        self.begin_scripted_turn(intro).await;
    }

    async fn begin_scripted_turn(&mut self, utterance: String) {
        if self.guards.is_scripted_in_flight() {
            warn!(
                target: "turn_coordinator",
                "scripted utterance already in flight, dropping duplicate"
            );
            return;
        }

        // 台词优先:抢占在途的实时轮次与播放。
        self.cancel_active_turn("preempted").await;
        self.stop_playback().await;
        if self.mic_active {
            self.stop_microphone().await;
        }

        let turn_id = self.allocate_turn_id();
        self.guards.set_turn_in_flight(true);
        self.guards.set_scripted_in_flight(true);
        self.guards.begin_turn_window(self.started_at);
        self.set_state(CoordinatorState::Thinking).await;

        let request = TurnRequest {
            turn_id,
            kind: TurnKind::Scripted { utterance },
            model: self.config.model.model.clone(),
            voice: self.config.model.voice.clone(),
            locale: self.config.model.locale.clone(),
        };

        match self.client.start_turn(request).await {
            Ok(stream) => self.install_turn(turn_id, true, stream),
            Err(err) => {
                error!(
                    target: "turn_coordinator",
                    %err,
                    turn_id,
                    "failed to start scripted turn"
                );
                self.fail_turn_setup().await;
            }
        }
    }

    async fn begin_live_turn(&mut self) {
        let turn_id = self.allocate_turn_id();
        self.guards.set_turn_in_flight(true);
        self.guards.begin_turn_window(self.started_at);
        debug!(
            target: "turn_coordinator",
            turn_id,
            "speech onset detected, opening live turn"
        );

        let request = TurnRequest {
            turn_id,
            kind: TurnKind::LiveAudio,
            model: self.config.model.model.clone(),
            voice: self.config.model.voice.clone(),
            locale: self.config.model.locale.clone(),
        };

        match self.client.start_turn(request).await {
            Ok(stream) => self.install_turn(turn_id, false, stream),
            Err(err) => {
                error!(target: "turn_coordinator", %err, turn_id, "failed to open live turn");
                self.guards.set_turn_in_flight(false);
                self.guards.clear_turn_window();
                self.emit_notice(NoticeLevel::Warn, "这次没听清，再说一遍好吗".to_string())
                    .await;
            }
        }
    }

    fn install_turn(&mut self, turn_id: u64, scripted: bool, stream: TurnStream) {
        let cancel = stream.cancel.clone();
        let bridge = spawn_signal_bridge(
            self.epoch,
            stream.signals,
            cancel.clone(),
            self.signal_tx.clone(),
        );
        self.active_turn = Some(ActiveTurn {
            epoch: self.epoch,
            turn_id,
            scripted,
            opened: false,
            audio_tx: stream.audio_tx,
            cancel,
            bridge,
            audio: AudioAccumulator::new(),
            child_text: String::new(),
            intent_sent: false,
            started_at: Instant::now(),
            first_signal_at: None,
        });
    }

    async fn handle_capture(&mut self, frame: Arc<[f32]>) {
        if let Some(turn) = &self.active_turn {
            if turn.opened && !turn.scripted && self.mic_active {
                if let Some(audio_tx) = &turn.audio_tx {
                    if let Err(err) = audio_tx.try_send(Arc::clone(&frame)) {
                        debug!(
                            target: "turn_coordinator",
                            %err,
                            "dropping capture frame for upstream"
                        );
                    }
                }
            }
        }

        for event in self.vad.ingest(frame.as_ref()) {
            match event {
                VadEvent::Level { dbfs, speech_active } => {
                    self.send_update(ConversationUpdate::MicLevel { dbfs, speech_active })
                        .await;
                }
                VadEvent::SpeechStart => self.on_speech_start().await,
                VadEvent::SpeechEnd => self.on_speech_end().await,
            }
        }
    }

    async fn on_speech_start(&mut self) {
        record_vad_transition(true, self.guards.state().as_str());

        match self.guards.state() {
            CoordinatorState::Speaking => self.barge_in("speech_start").await,
            CoordinatorState::Listening => {
                if self.active_turn.is_none() && self.guards.is_conversation_active() {
                    self.begin_live_turn().await;
                }
            }
            _ => {}
        }
    }

    async fn on_speech_end(&mut self) {
        record_vad_transition(false, self.guards.state().as_str());

        if self.guards.state() != CoordinatorState::Listening {
            return;
        }

        let committed = match self.active_turn.as_mut() {
            Some(turn) if !turn.scripted => {
                // 关闭上行音频通道即提交"说完了"。
                turn.audio_tx = None;
                Some(turn.turn_id)
            }
            _ => None,
        };
        let Some(turn_id) = committed else {
            return;
        };

        debug!(
            target: "turn_coordinator",
            turn_id,
            "utterance complete, committing live turn"
        );
        self.stop_microphone().await;
        self.set_state(CoordinatorState::Thinking).await;
    }

    async fn handle_signal(&mut self, epoch: u64, signal: TurnSignal) {
        let current = self.active_turn.as_ref().map(|turn| turn.epoch);
        if current != Some(epoch) {
            debug!(
                target: "turn_coordinator",
                epoch,
                "ignoring signal from cancelled turn"
            );
            return;
        }

        if let Some(turn) = self.active_turn.as_mut() {
            if turn.first_signal_at.is_none() {
                turn.first_signal_at = Some(Instant::now());
                self.guards.mark_first_signal(self.started_at);
            }
        }

        match signal {
            TurnSignal::Opened => {
                if let Some(turn) = self.active_turn.as_mut() {
                    turn.opened = true;
                    debug!(
                        target: "turn_coordinator",
                        turn_id = turn.turn_id,
                        "dialogue stream opened"
                    );
                }
            }
            TurnSignal::Text { source, delta } => self.handle_text_delta(source, delta).await,
            TurnSignal::Audio {
                pcm,
                sample_rate_hz,
            } => {
                if let Some(turn) = self.active_turn.as_mut() {
                    turn.audio.push(pcm, sample_rate_hz);
                }
            }
            TurnSignal::Done => self.finish_turn().await,
            TurnSignal::Error { reason } => self.fail_turn(reason).await,
        }
    }

    async fn handle_text_delta(&mut self, source: SpeakerSource, delta: String) {
        let (entry, detected) = {
            let Some(turn) = self.active_turn.as_mut() else {
                return;
            };
            let entry = TranscriptEntry {
                turn_id: turn.turn_id,
                source,
                text: delta.clone(),
            };
            let mut detected = None;
            if source == SpeakerSource::Child {
                turn.child_text.push_str(&delta);
                if !turn.intent_sent {
                    if let Some(intent) = IntentClassifier::classify(&turn.child_text) {
                        turn.intent_sent = true;
                        detected = Some(intent);
                    }
                }
            }
            (entry, detected)
        };

        self.send_update(ConversationUpdate::Transcript(entry)).await;

        if let Some(intent) = detected {
            info!(
                target: "turn_coordinator",
                intent = intent.as_str(),
                "voice intent detected"
            );
            if let Err(err) = self.intents_tx.send(intent).await {
                warn!(target: "turn_coordinator", %err, "failed to deliver voice intent");
            }
        }
    }

    async fn finish_turn(&mut self) {
        let Some(mut turn) = self.active_turn.take() else {
            return;
        };
        turn.bridge.abort();

        self.guards.set_turn_in_flight(false);
        self.guards.set_scripted_in_flight(false);
        self.guards.clear_turn_window();

        let first_signal = turn
            .first_signal_at
            .map(|at| at.saturating_duration_since(turn.started_at))
            .unwrap_or_default();
        record_turn_latency(
            turn.turn_id,
            turn.scripted,
            first_signal,
            turn.started_at.elapsed(),
            "done",
        );

        match turn.audio.take() {
            Some((pcm, sample_rate_hz)) => {
                if self.mic_active {
                    self.stop_microphone().await;
                }
                self.set_state(CoordinatorState::Speaking).await;
                self.start_playback(pcm, sample_rate_hz);
            }
            None => {
                debug!(
                    target: "turn_coordinator",
                    turn_id = turn.turn_id,
                    "turn finished without synthesized audio"
                );
                self.resume_listening().await;
            }
        }
    }

    fn start_playback(&mut self, pcm: Bytes, sample_rate_hz: u32) {
        let audio_output = Arc::clone(&self.audio_output);
        let command_tx = self.command_tx.clone();
        let updates_tx = self.updates_tx.clone();
        let epoch = self.epoch;
        let settle = self
            .config
            .settle_after_playback
            .max(MIN_SETTLE_AFTER_PLAYBACK);

        self.playback_started_at = Some(Instant::now());
        self.playback = Some(tokio::spawn(async move {
            if let Err(err) = audio_output.play(pcm, sample_rate_hz).await {
                warn!(
                    target: "turn_coordinator",
                    %err,
                    "synthesized speech playback failed"
                );
                let notice = ConversationUpdate::Notice(SessionNotice {
                    level: NoticeLevel::Warn,
                    message: "语音播放失败，我们继续聊".to_string(),
                });
                if let Err(err) = updates_tx.send(notice).await {
                    warn!(
                        target: "turn_coordinator",
                        %err,
                        "failed to deliver playback notice"
                    );
                }
            }
            sleep(settle).await;
            let _ = command_tx
                .send(ConversationCommand::ResumeListening { epoch })
                .await;
        }));
    }

    async fn finish_playback(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!(
                target: "turn_coordinator",
                epoch,
                "ignoring stale playback completion"
            );
            return;
        }
        if self.guards.state() != CoordinatorState::Speaking {
            return;
        }
        self.playback = None;
        self.playback_started_at = None;
        self.resume_listening().await;
    }

    async fn barge_in(&mut self, trigger: &'static str) {
        let state = self.guards.state();
        if self.active_turn.is_none()
            && self.playback.is_none()
            && state != CoordinatorState::Speaking
        {
            debug!(target: "turn_coordinator", trigger, "nothing to interrupt");
            return;
        }

        let turn_id = self
            .active_turn
            .as_ref()
            .map(|turn| turn.turn_id)
            .unwrap_or(self.next_turn_id);
        let playback_elapsed = self
            .playback_started_at
            .map(|at| at.elapsed())
            .unwrap_or_default();

        info!(
            target: "turn_coordinator",
            trigger,
            state = state.as_str(),
            "barge-in, cancelling active output"
        );

        self.cancel_active_turn("cancelled").await;
        self.stop_playback().await;
        record_barge_in(turn_id, state.as_str(), playback_elapsed);
        self.resume_listening().await;
    }

    async fn abort_stalled_turn(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        let stalled = match &self.active_turn {
            Some(turn) => !turn.opened && turn.first_signal_at.is_none(),
            None => false,
        };
        if !stalled {
            return;
        }

        warn!(
            target: "turn_coordinator",
            "dialogue stream failed to open in time, abandoning turn"
        );
        self.cancel_active_turn("timeout").await;
        self.emit_notice(NoticeLevel::Warn, "网络有点慢，我们重新来一次".to_string())
            .await;
        self.resume_listening().await;
    }

    async fn fail_turn(&mut self, reason: String) {
        let Some(turn) = self.active_turn.take() else {
            return;
        };
        error!(
            target: "turn_coordinator",
            turn_id = turn.turn_id,
            reason = %reason,
            "dialogue stream reported an error"
        );
        turn.cancel.cancel();
        turn.bridge.abort();

        let first_signal = turn
            .first_signal_at
            .map(|at| at.saturating_duration_since(turn.started_at))
            .unwrap_or_default();
        record_turn_latency(
            turn.turn_id,
            turn.scripted,
            first_signal,
            turn.started_at.elapsed(),
            "error",
        );

        self.guards.set_turn_in_flight(false);
        self.guards.set_scripted_in_flight(false);
        self.guards.clear_turn_window();

        self.send_update(ConversationUpdate::Transcript(TranscriptEntry {
            turn_id: turn.turn_id,
            source: SpeakerSource::Assistant,
            text: "刚才没连上，我们再试一次吧。".to_string(),
        }))
        .await;
        self.emit_notice(NoticeLevel::Error, format!("对话流异常：{reason}"))
            .await;
        self.resume_listening().await;
    }

    async fn fail_turn_setup(&mut self) {
        self.guards.set_turn_in_flight(false);
        self.guards.set_scripted_in_flight(false);
        self.guards.clear_turn_window();
        self.emit_notice(NoticeLevel::Error, "对话服务暂时不可用，稍后再试".to_string())
            .await;
        self.resume_listening().await;
    }

    async fn resume_listening(&mut self) {
        if !self.guards.is_conversation_active() {
            self.set_state(CoordinatorState::Idle).await;
            return;
        }

        if !self.mic_active {
            match self.microphone.start_capture(self.mic_tx.clone()).await {
                Ok(()) => {
                    self.mic_active = true;
                    self.vad.reset();
                }
                Err(err) => {
                    error!(
                        target: "turn_coordinator",
                        %err,
                        "failed to restart microphone capture"
                    );
                    self.emit_notice(NoticeLevel::Error, "麦克风不可用，对话已暂停".to_string())
                        .await;
                    self.guards.set_conversation_active(false);
                    self.set_state(CoordinatorState::Idle).await;
                    return;
                }
            }
        }

        self.set_state(CoordinatorState::Listening).await;
    }

    async fn shutdown(&mut self) {
        info!(target: "turn_coordinator", "stopping conversation session");
        self.cancel_active_turn("stopped").await;
        self.stop_playback().await;
        if self.mic_active {
            self.stop_microphone().await;
        }
        self.audio_output.stop().await;
        self.route.deactivate().await;
        self.guards.set_conversation_active(false);
        self.set_state(CoordinatorState::Idle).await;
    }

    async fn cancel_active_turn(&mut self, outcome: &'static str) {
        let Some(turn) = self.active_turn.take() else {
            return;
        };
        // 先推进 epoch,桥接任务残留在队列里的信号会因 epoch 失配被丢弃。
        self.epoch = self.epoch.wrapping_add(1);
        self.guards.set_epoch(self.epoch);
        turn.cancel.cancel();
        turn.bridge.abort();

        let first_signal = turn
            .first_signal_at
            .map(|at| at.saturating_duration_since(turn.started_at))
            .unwrap_or_default();
        record_turn_latency(
            turn.turn_id,
            turn.scripted,
            first_signal,
            turn.started_at.elapsed(),
            outcome,
        );

        self.guards.set_turn_in_flight(false);
        self.guards.set_scripted_in_flight(false);
        self.guards.clear_turn_window();
    }

    async fn stop_playback(&mut self) {
        let Some(playback) = self.playback.take() else {
            return;
        };
        playback.abort();
        self.playback_started_at = None;
        self.audio_output.stop().await;
    }

    async fn stop_microphone(&mut self) {
        self.microphone.stop_capture().await;
        self.mic_active = false;
        self.vad.reset();
    }

    fn allocate_turn_id(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.guards.set_epoch(self.epoch);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        self.next_turn_id
    }

    async fn set_state(&mut self, state: CoordinatorState) {
        if self.guards.state() == state {
            return;
        }
        debug!(
            target: "turn_coordinator",
            state = state.as_str(),
            "coordinator state changed"
        );
        self.guards.set_state(state);
        self.send_update(ConversationUpdate::State(state)).await;
    }

    async fn send_update(&self, update: ConversationUpdate) {
        if let Err(err) = self.updates_tx.send(update).await {
            warn!(
                target: "turn_coordinator",
                %err,
                "conversation update channel closed"
            );
        }
    }

    async fn emit_notice(&self, level: NoticeLevel, message: String) {
        self.send_update(ConversationUpdate::Notice(SessionNotice { level, message }))
            .await;
    }
}

fn spawn_signal_bridge(
    epoch: u64,
    mut signals: mpsc::Receiver<TurnSignal>,
    cancel: CancellationToken,
    signal_tx: mpsc::Sender<(u64, TurnSignal)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_signal = signals.recv() => {
                    let Some(signal) = maybe_signal else {
                        break;
                    };
                    if signal_tx.send((epoch, signal)).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
