mod handle;
mod state;
mod util;
mod worker;

pub use handle::ConversationHandle;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;

use crate::dialogue::config::ConversationConfig;
use crate::dialogue::constants::{
    INTENT_BUS_CAPACITY, SIGNAL_BUS_CAPACITY, WATCHDOG_POLL_INTERVAL,
};
use crate::dialogue::traits::{AudioOutput, DialogueClient, DuplexRoute, MicrophoneCapture};
use crate::dialogue::types::{ConversationUpdate, VoiceIntent};

use self::state::TurnGuards;
use self::worker::ConversationWorker;

#[derive(Debug)]
pub(crate) enum ConversationCommand {
    Begin { intro: String },
    SpeakScripted { utterance: String },
    Interrupt,
    Stop,
    ResumeListening { epoch: u64 },
    AbortStalledTurn { epoch: u64 },
}

pub(crate) fn spawn_conversation(
    config: ConversationConfig,
    client: Arc<dyn DialogueClient>,
    microphone: Arc<dyn MicrophoneCapture>,
    audio_output: Arc<dyn AudioOutput>,
    route: Arc<dyn DuplexRoute>,
) -> (
    ConversationHandle,
    mpsc::Receiver<ConversationUpdate>,
    mpsc::Receiver<VoiceIntent>,
) {
    let (updates_tx, updates_rx) = mpsc::channel(config.update_capacity);
    let (intents_tx, intents_rx) = mpsc::channel(INTENT_BUS_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUS_CAPACITY);
    let (mic_tx, mic_rx) = mpsc::channel(config.frame_capacity);
    let guards = Arc::new(TurnGuards::new());
    let started_at = Instant::now();

    let monitor_guards = Arc::clone(&guards);
    let monitor_tx = command_tx.clone();
    let deadline_ms = util::duration_to_ms(config.turn_open_deadline);

    let monitor: JoinHandle<()> = tokio::spawn(async move {
        let mut last_flagged_epoch = 0_u64;

        loop {
            sleep(WATCHDOG_POLL_INTERVAL).await;

            if monitor_tx.is_closed() {
                break;
            }

            if !monitor_guards.is_turn_in_flight() {
                continue;
            }

            let turn_started_ms = monitor_guards.turn_started_ms();
            if turn_started_ms == 0 || monitor_guards.has_first_signal() {
                continue;
            }

            let elapsed_ms =
                util::duration_to_ms(started_at.elapsed()).saturating_sub(turn_started_ms);
            let epoch = monitor_guards.epoch();

            if elapsed_ms >= deadline_ms && epoch != last_flagged_epoch {
                warn!(
                    target: "turn_coordinator",
                    elapsed_ms,
                    "dialogue stream silent past the open deadline"
                );

                if monitor_tx
                    .send(ConversationCommand::AbortStalledTurn { epoch })
                    .await
                    .is_err()
                {
                    break;
                }
                last_flagged_epoch = epoch;
            }
        }
    });

    let worker = ConversationWorker::new(
        config,
        client,
        microphone,
        audio_output,
        route,
        command_rx,
        command_tx.clone(),
        signal_rx,
        signal_tx,
        mic_rx,
        mic_tx,
        updates_tx,
        intents_tx,
        Arc::clone(&guards),
        started_at,
    );

    let worker_handle = worker.spawn();
    let handle = ConversationHandle::new(command_tx, guards, monitor, worker_handle);

    (handle, updates_rx, intents_rx)
}
