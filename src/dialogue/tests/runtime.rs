use crate::dialogue::*;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

type TurnScript = Vec<(Duration, TurnSignal)>;

fn test_config() -> ConversationConfig {
    ConversationConfig {
        turn_open_deadline: Duration::from_millis(300),
        ..ConversationConfig::default()
    }
}

fn assistant_text(text: &str) -> TurnSignal {
    TurnSignal::Text {
        source: SpeakerSource::Assistant,
        delta: text.to_string(),
    }
}

fn child_text(text: &str) -> TurnSignal {
    TurnSignal::Text {
        source: SpeakerSource::Child,
        delta: text.to_string(),
    }
}

fn audio_chunk(len: usize, sample_rate_hz: u32) -> TurnSignal {
    TurnSignal::Audio {
        pcm: Bytes::from(vec![0u8; len]),
        sample_rate_hz,
    }
}

/// 100 ms of speech-loud samples at the default capture rate.
fn loud() -> Vec<f32> {
    vec![0.1; 1_600]
}

fn quiet() -> Vec<f32> {
    vec![0.0; 1_600]
}

struct ScriptedClient {
    scripts: Mutex<VecDeque<TurnScript>>,
    requests: Mutex<Vec<TurnRequest>>,
    cancels: Mutex<Vec<CancellationToken>>,
    audio_taps: Mutex<Vec<mpsc::Receiver<Arc<[f32]>>>>,
}

impl ScriptedClient {
    fn new(scripts: Vec<TurnScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            audio_taps: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock poisoned").len()
    }

    fn request(&self, index: usize) -> TurnRequest {
        self.requests.lock().expect("requests lock poisoned")[index].clone()
    }

    fn cancel_token(&self, index: usize) -> CancellationToken {
        self.cancels.lock().expect("cancels lock poisoned")[index].clone()
    }

    fn take_audio_tap(&self) -> Option<mpsc::Receiver<Arc<[f32]>>> {
        self.audio_taps
            .lock()
            .expect("audio taps lock poisoned")
            .pop()
    }
}

#[async_trait]
impl DialogueClient for ScriptedClient {
    async fn start_turn(&self, request: TurnRequest) -> Result<TurnStream, DialogueError> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock poisoned")
            .pop_front()
            .unwrap_or_default();
        let (signal_tx, signals) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let audio_tx = match &request.kind {
            TurnKind::LiveAudio => {
                let (tx, rx) = mpsc::channel(32);
                self.audio_taps
                    .lock()
                    .expect("audio taps lock poisoned")
                    .push(rx);
                Some(tx)
            }
            TurnKind::Scripted { .. } => None,
        };

        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request);
        self.cancels
            .lock()
            .expect("cancels lock poisoned")
            .push(cancel.clone());

        let emitter_cancel = cancel.clone();
        tokio::spawn(async move {
            for (delay, signal) in script {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = emitter_cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                tokio::select! {
                    _ = emitter_cancel.cancelled() => return,
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
            audio_tx,
            cancel,
        })
    }
}

struct RecordingMicrophone {
    sink: Mutex<Option<mpsc::Sender<Arc<[f32]>>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingMicrophone {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Pushes a capture buffer through the last sink handed out. The pipe is
    /// kept after `stop_capture` so tests can model hardware trailing frames.
    async fn push(&self, frame: Vec<f32>) {
        let sink = self
            .sink
            .lock()
            .expect("sink lock poisoned")
            .clone()
            .expect("capture was never started");
        sink.send(frame.into())
            .await
            .expect("capture frame not delivered");
    }
}

#[async_trait]
impl MicrophoneCapture for RecordingMicrophone {
    async fn request_permission(&self) -> Result<(), DialogueError> {
        Ok(())
    }

    async fn start_capture(&self, sink: mpsc::Sender<Arc<[f32]>>) -> Result<(), DialogueError> {
        *self.sink.lock().expect("sink lock poisoned") = Some(sink);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_capture(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct DenyingMicrophone;

#[async_trait]
impl MicrophoneCapture for DenyingMicrophone {
    async fn request_permission(&self) -> Result<(), DialogueError> {
        Err(DialogueError::PermissionDenied {
            reason: "user declined".to_string(),
        })
    }

    async fn start_capture(&self, _sink: mpsc::Sender<Arc<[f32]>>) -> Result<(), DialogueError> {
        Err(DialogueError::PermissionDenied {
            reason: "user declined".to_string(),
        })
    }

    async fn stop_capture(&self) {}
}

struct RecordingAudioOutput {
    plays: Mutex<Vec<(usize, u32)>>,
    stops: AtomicUsize,
    play_duration: Duration,
    interrupt: Notify,
}

impl RecordingAudioOutput {
    fn new(play_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            plays: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            play_duration,
            interrupt: Notify::new(),
        })
    }

    fn play_count(&self) -> usize {
        self.plays.lock().expect("plays lock poisoned").len()
    }

    fn last_play(&self) -> (usize, u32) {
        *self
            .plays
            .lock()
            .expect("plays lock poisoned")
            .last()
            .expect("nothing was played")
    }

    fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for RecordingAudioOutput {
    async fn play(&self, pcm: Bytes, sample_rate_hz: u32) -> Result<(), DialogueError> {
        self.plays
            .lock()
            .expect("plays lock poisoned")
            .push((pcm.len(), sample_rate_hz));
        tokio::select! {
            _ = sleep(self.play_duration) => {}
            _ = self.interrupt.notified() => {}
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }
}

struct RecordingRoute {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

impl RecordingRoute {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        })
    }

    fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexRoute for RecordingRoute {
    async fn activate(&self) -> Result<(), DialogueError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    client: Arc<ScriptedClient>,
    microphone: Arc<RecordingMicrophone>,
    audio: Arc<RecordingAudioOutput>,
    route: Arc<RecordingRoute>,
    handle: ConversationHandle,
    updates: mpsc::Receiver<ConversationUpdate>,
    intents: mpsc::Receiver<VoiceIntent>,
}

async fn start_harness(scripts: Vec<TurnScript>, play_duration: Duration) -> Harness {
    let client = ScriptedClient::new(scripts);
    let microphone = RecordingMicrophone::new();
    let audio = RecordingAudioOutput::new(play_duration);
    let route = RecordingRoute::new();

    let coordinator = VoiceTurnCoordinator::with_components(
        test_config(),
        client.clone(),
        microphone.clone(),
        audio.clone(),
        route.clone(),
    );
    let (handle, updates, intents) = coordinator.start_session("开场白").await;

    Harness {
        client,
        microphone,
        audio,
        route,
        handle,
        updates,
        intents,
    }
}

async fn next_update(updates: &mut mpsc::Receiver<ConversationUpdate>) -> ConversationUpdate {
    timeout(Duration::from_secs(3), updates.recv())
        .await
        .expect("conversation update timed out")
        .expect("update channel closed unexpectedly")
}

async fn wait_for_state(updates: &mut mpsc::Receiver<ConversationUpdate>, want: CoordinatorState) {
    let waited = timeout(Duration::from_secs(3), async {
        loop {
            match updates.recv().await {
                Some(ConversationUpdate::State(state)) if state == want => break,
                Some(_) => continue,
                None => panic!("update channel closed while waiting for {want:?}"),
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for state {want:?}");
}

async fn wait_for_transcript(
    updates: &mut mpsc::Receiver<ConversationUpdate>,
    needle: &str,
) -> TranscriptEntry {
    let waited = timeout(Duration::from_secs(3), async {
        loop {
            match updates.recv().await {
                Some(ConversationUpdate::Transcript(entry)) if entry.text.contains(needle) => {
                    break entry
                }
                Some(_) => continue,
                None => panic!("update channel closed while waiting for transcript {needle:?}"),
            }
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for transcript {needle:?}"))
}

async fn wait_for_notice(
    updates: &mut mpsc::Receiver<ConversationUpdate>,
    level: NoticeLevel,
) -> SessionNotice {
    let waited = timeout(Duration::from_secs(3), async {
        loop {
            match updates.recv().await {
                Some(ConversationUpdate::Notice(notice)) if notice.level == level => break notice,
                Some(_) => continue,
                None => panic!("update channel closed while waiting for a notice"),
            }
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for a {level:?} notice"))
}

async fn wait_for_mic_level(updates: &mut mpsc::Receiver<ConversationUpdate>) -> (f32, bool) {
    let waited = timeout(Duration::from_secs(3), async {
        loop {
            match updates.recv().await {
                Some(ConversationUpdate::MicLevel { dbfs, speech_active }) => {
                    break (dbfs, speech_active)
                }
                Some(_) => continue,
                None => panic!("update channel closed while waiting for a mic level"),
            }
        }
    })
    .await;
    waited.expect("timed out waiting for a mic level update")
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn intro_flows_through_thinking_speaking_listening() {
    let mut harness = start_harness(
        vec![vec![
            (Duration::ZERO, TurnSignal::Opened),
            (Duration::ZERO, assistant_text("小朋友你好")),
            (Duration::ZERO, audio_chunk(4_800, 24_000)),
            (Duration::ZERO, TurnSignal::Done),
        ]],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Thinking).await;

    let entry = wait_for_transcript(&mut harness.updates, "小朋友你好").await;
    assert_eq!(entry.source, SpeakerSource::Assistant);
    assert_eq!(entry.turn_id, 1);

    wait_for_state(&mut harness.updates, CoordinatorState::Speaking).await;
    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    let request = harness.client.request(0);
    match request.kind {
        TurnKind::Scripted { utterance } => assert_eq!(utterance, "开场白"),
        other => panic!("expected a scripted intro turn, got {other:?}"),
    }

    assert_eq!(harness.route.activations(), 1);
    assert_eq!(harness.audio.play_count(), 1);
    assert_eq!(harness.audio.last_play(), (4_800, 24_000));
    // The microphone opens for the first time only after the intro playback.
    assert_eq!(harness.microphone.starts(), 1);
    assert!(harness.handle.is_conversation_active());
}

#[tokio::test]
async fn permission_denied_keeps_the_session_idle() {
    let client = ScriptedClient::new(Vec::new());
    let microphone = Arc::new(DenyingMicrophone);
    let audio = RecordingAudioOutput::new(Duration::from_millis(50));
    let route = RecordingRoute::new();

    let coordinator = VoiceTurnCoordinator::with_components(
        test_config(),
        client.clone(),
        microphone,
        audio,
        route.clone(),
    );
    let (handle, mut updates, _intents) = coordinator.start_session("开场白").await;

    let entry = wait_for_transcript(&mut updates, "麦克风").await;
    assert_eq!(entry.source, SpeakerSource::Assistant);

    let notice = wait_for_notice(&mut updates, NoticeLevel::Error).await;
    assert!(
        notice.message.contains("权限"),
        "notice should explain the permission problem: {}",
        notice.message
    );

    wait_until(|| route.deactivations() == 1, "route release").await;
    assert_eq!(handle.state(), CoordinatorState::Idle);
    assert!(!handle.is_conversation_active());
    assert_eq!(client.request_count(), 0, "no turn should have been opened");
}

#[tokio::test]
async fn live_turn_opens_forwards_audio_and_commits_on_silence() {
    let mut harness = start_harness(
        vec![
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, TurnSignal::Done),
            ],
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, child_text("这是什么")),
                (Duration::from_millis(400), assistant_text("那是一个仙人掌模型")),
                (Duration::ZERO, audio_chunk(3_200, 24_000)),
                (Duration::ZERO, TurnSignal::Done),
            ],
        ],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    // 200 ms of sustained speech opens the live turn.
    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    let client = harness.client.clone();
    wait_until(|| client.request_count() == 2, "live turn request").await;
    match harness.client.request(1).kind {
        TurnKind::LiveAudio => {}
        other => panic!("expected a live audio turn, got {other:?}"),
    }

    // Loudness metering reaches observers while the mic is hot.
    let (dbfs, first_active) = wait_for_mic_level(&mut harness.updates).await;
    assert!(
        dbfs > -45.0,
        "loud capture should meter above the speech threshold: {dbfs}"
    );
    assert!(!first_active, "the start window is still open on the first frame");
    let (_, second_active) = wait_for_mic_level(&mut harness.updates).await;
    assert!(second_active, "the second frame completes the start window");

    // Give the Opened signal time to land, then check upstream forwarding.
    sleep(Duration::from_millis(100)).await;
    harness.microphone.push(loud()).await;
    let mut tap = harness
        .client
        .take_audio_tap()
        .expect("live turn should expose an upstream audio channel");
    let forwarded = timeout(Duration::from_secs(2), tap.recv())
        .await
        .expect("forwarded frame timed out")
        .expect("upstream channel closed before any frame");
    assert_eq!(forwarded[0], 0.1, "the captured samples go upstream as-is");

    let intent = timeout(Duration::from_secs(2), harness.intents.recv())
        .await
        .expect("intent timed out")
        .expect("intent channel closed unexpectedly");
    assert_eq!(intent, VoiceIntent::AskedWhatIsThat);

    let entry = wait_for_transcript(&mut harness.updates, "这是什么").await;
    assert_eq!(entry.source, SpeakerSource::Child);
    assert_eq!(entry.turn_id, 2);

    // A second of silence commits the utterance and closes the upstream pipe.
    for _ in 0..10 {
        harness.microphone.push(quiet()).await;
    }
    wait_for_state(&mut harness.updates, CoordinatorState::Thinking).await;
    let drained = timeout(Duration::from_secs(2), async {
        while tap.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "upstream channel should close on commit");

    wait_for_state(&mut harness.updates, CoordinatorState::Speaking).await;
    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;
    assert_eq!(harness.audio.play_count(), 1);
}

#[tokio::test]
async fn speech_during_playback_cancels_it_within_the_turn() {
    let mut harness = start_harness(
        vec![
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, TurnSignal::Done),
            ],
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, assistant_text("从前有座山")),
                (Duration::ZERO, audio_chunk(9_600, 24_000)),
                (Duration::ZERO, TurnSignal::Done),
            ],
            vec![(Duration::ZERO, TurnSignal::Opened)],
        ],
        Duration::from_secs(5),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    assert!(harness.handle.speak_scripted("讲个故事").await);
    wait_for_state(&mut harness.updates, CoordinatorState::Speaking).await;

    // The child talks over the five-second playback; it must yield immediately.
    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    assert!(harness.audio.stop_count() >= 1, "playback must be stopped");
    assert!(!harness.handle.is_turn_in_flight());
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        harness.handle.state(),
        CoordinatorState::Listening,
        "no stale playback completion may flip the state back"
    );

    // The interrupted child gets a fresh live turn right away.
    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    let client = harness.client.clone();
    wait_until(|| client.request_count() == 3, "post barge-in live turn").await;
    match harness.client.request(2).kind {
        TurnKind::LiveAudio => {}
        other => panic!("expected a live turn after barge-in, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_error_surfaces_in_transcript_and_resumes_listening() {
    let mut harness = start_harness(
        vec![
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, TurnSignal::Done),
            ],
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (
                    Duration::ZERO,
                    TurnSignal::Error {
                        reason: "socket reset".to_string(),
                    },
                ),
            ],
            vec![(Duration::ZERO, TurnSignal::Opened)],
        ],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    let client = harness.client.clone();
    wait_until(|| client.request_count() == 2, "live turn request").await;

    let entry = wait_for_transcript(&mut harness.updates, "再试一次").await;
    assert_eq!(entry.source, SpeakerSource::Assistant);

    let notice = wait_for_notice(&mut harness.updates, NoticeLevel::Error).await;
    assert!(
        notice.message.contains("socket reset"),
        "notice should carry the stream failure: {}",
        notice.message
    );

    let handle = &harness.handle;
    wait_until(|| !handle.is_turn_in_flight(), "turn teardown").await;
    assert!(handle.is_conversation_active());
    assert_eq!(handle.state(), CoordinatorState::Listening);

    // The coordinator keeps listening: a fresh utterance opens a new turn.
    for _ in 0..10 {
        harness.microphone.push(quiet()).await;
    }
    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    wait_until(|| client.request_count() == 3, "recovery live turn").await;
}

#[tokio::test]
async fn concurrent_scripted_requests_are_rejected() {
    let harness = start_harness(
        vec![vec![(Duration::ZERO, TurnSignal::Opened)]],
        Duration::from_millis(50),
    )
    .await;

    let client = harness.client.clone();
    wait_until(|| client.request_count() == 1, "intro turn").await;

    assert!(
        !harness.handle.speak_scripted("第二条").await,
        "a second scripted line must be dropped while one is in flight"
    );
    assert_eq!(
        harness.client.request_count(),
        1,
        "the dropped line must not reach the dialogue client"
    );
}

#[tokio::test]
async fn scripted_line_preempts_the_live_turn() {
    let mut harness = start_harness(
        vec![
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, TurnSignal::Done),
            ],
            vec![(Duration::ZERO, TurnSignal::Opened)],
            vec![
                (Duration::ZERO, TurnSignal::Opened),
                (Duration::ZERO, assistant_text("小心，那个很烫")),
                (Duration::ZERO, audio_chunk(2_400, 24_000)),
                (Duration::ZERO, TurnSignal::Done),
            ],
        ],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    harness.microphone.push(loud()).await;
    harness.microphone.push(loud()).await;
    let client = harness.client.clone();
    wait_until(|| client.request_count() == 2, "live turn request").await;

    assert!(harness.handle.speak_scripted("小心！").await);
    wait_for_state(&mut harness.updates, CoordinatorState::Speaking).await;

    assert!(
        harness.client.cancel_token(1).is_cancelled(),
        "the preempted live turn must be cancelled upstream"
    );
    match harness.client.request(2).kind {
        TurnKind::Scripted { utterance } => assert_eq!(utterance, "小心！"),
        other => panic!("expected the scripted warning turn, got {other:?}"),
    }
    assert!(
        harness.microphone.stops() >= 1,
        "capture must stop before the scripted line plays"
    );

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;
}

#[tokio::test]
async fn silent_stream_is_abandoned_by_the_watchdog() {
    let mut harness = start_harness(vec![Vec::new()], Duration::from_millis(50)).await;

    wait_for_state(&mut harness.updates, CoordinatorState::Thinking).await;

    let notice = wait_for_notice(&mut harness.updates, NoticeLevel::Warn).await;
    assert!(
        notice.message.contains("网络"),
        "watchdog notice should mention the connection: {}",
        notice.message
    );

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;
    assert!(!harness.handle.is_turn_in_flight());
    assert!(
        harness.client.cancel_token(0).is_cancelled(),
        "the stalled turn must be cancelled upstream"
    );
}

#[tokio::test]
async fn stop_tears_down_and_is_idempotent() {
    let mut harness = start_harness(
        vec![vec![
            (Duration::ZERO, TurnSignal::Opened),
            (Duration::ZERO, TurnSignal::Done),
        ]],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    harness.handle.stop().await;
    wait_for_state(&mut harness.updates, CoordinatorState::Idle).await;

    assert!(!harness.handle.is_conversation_active());
    assert_eq!(harness.route.deactivations(), 1);
    assert!(harness.microphone.stops() >= 1);

    // A second stop is a quiet no-op.
    harness.handle.stop().await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.handle.state(), CoordinatorState::Idle);
    assert_eq!(harness.route.deactivations(), 1);
}

#[tokio::test]
async fn text_deltas_arrive_in_emission_order() {
    let mut harness = start_harness(
        vec![vec![
            (Duration::ZERO, TurnSignal::Opened),
            (Duration::ZERO, assistant_text("你")),
            (Duration::ZERO, assistant_text("好")),
            (Duration::ZERO, assistant_text("呀")),
            (Duration::ZERO, TurnSignal::Done),
        ]],
        Duration::from_millis(50),
    )
    .await;

    let mut texts = Vec::new();
    while texts.len() < 3 {
        if let ConversationUpdate::Transcript(entry) = next_update(&mut harness.updates).await {
            assert_eq!(entry.turn_id, 1);
            texts.push(entry.text);
        }
    }
    assert_eq!(texts, vec!["你", "好", "呀"]);
}

#[tokio::test]
async fn interrupt_during_thinking_recovers_listening() {
    let mut harness = start_harness(
        vec![vec![(Duration::ZERO, TurnSignal::Opened)]],
        Duration::from_millis(50),
    )
    .await;

    wait_for_state(&mut harness.updates, CoordinatorState::Thinking).await;
    let client = harness.client.clone();
    wait_until(|| client.request_count() == 1, "intro turn").await;
    sleep(Duration::from_millis(50)).await;

    harness.handle.interrupt().await;
    wait_for_state(&mut harness.updates, CoordinatorState::Listening).await;

    assert!(harness.client.cancel_token(0).is_cancelled());
    assert!(!harness.handle.is_turn_in_flight());
    assert_eq!(harness.microphone.starts(), 1);
}
