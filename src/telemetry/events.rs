use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::encounter";
pub(crate) const EVENT_PROXIMITY: &str = "encounter_proximity";
pub(crate) const EVENT_PHASE: &str = "encounter_phase";
pub(crate) const EVENT_TURN: &str = "dialogue_turn";
pub(crate) const EVENT_BARGE_IN: &str = "dialogue_barge_in";
pub(crate) const EVENT_VAD: &str = "dialogue_vad";

#[derive(Debug, Serialize)]
pub struct ProximityTelemetryEvent {
    pub kind: &'static str,
    pub distance_m: f32,
    pub placement_seq: u64,
}

#[derive(Debug, Serialize)]
pub struct PhaseTransitionEvent {
    pub from: &'static str,
    pub to: &'static str,
    pub trigger: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TurnLatencyEvent {
    pub turn_id: u64,
    pub scripted: bool,
    pub first_signal_ms: u64,
    pub total_ms: u64,
    pub outcome: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BargeInEvent {
    pub turn_id: u64,
    pub interrupted_state: &'static str,
    pub playback_elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct VadTransitionEvent {
    pub speech_active: bool,
    pub coordinator_state: &'static str,
}

pub fn record_proximity(kind: &'static str, distance_m: f32, placement_seq: u64) {
    let event = ProximityTelemetryEvent {
        kind,
        distance_m,
        placement_seq,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_PROXIMITY,
            kind = event.kind,
            distance_m = event.distance_m,
            placement_seq = event.placement_seq,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_PROXIMITY,
            %err,
            "failed to encode proximity event"
        ),
    }
}

pub fn record_phase_transition(from: &'static str, to: &'static str, trigger: &'static str) {
    let event = PhaseTransitionEvent { from, to, trigger };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_PHASE,
            from = event.from,
            to = event.to,
            trigger = event.trigger,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_PHASE,
            %err,
            "failed to encode phase transition event"
        ),
    }
}

pub fn record_turn_latency(
    turn_id: u64,
    scripted: bool,
    first_signal: Duration,
    total: Duration,
    outcome: &'static str,
) {
    let event = TurnLatencyEvent {
        turn_id,
        scripted,
        first_signal_ms: duration_to_ms(first_signal),
        total_ms: duration_to_ms(total),
        outcome,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TURN,
            turn_id = event.turn_id,
            scripted = event.scripted,
            first_signal_ms = event.first_signal_ms,
            total_ms = event.total_ms,
            outcome = event.outcome,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TURN,
            %err,
            "failed to encode turn latency event"
        ),
    }
}

pub fn record_barge_in(turn_id: u64, interrupted_state: &'static str, playback_elapsed: Duration) {
    let event = BargeInEvent {
        turn_id,
        interrupted_state,
        playback_elapsed_ms: duration_to_ms(playback_elapsed),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_BARGE_IN,
            turn_id = event.turn_id,
            interrupted_state = event.interrupted_state,
            playback_elapsed_ms = event.playback_elapsed_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_BARGE_IN,
            %err,
            "failed to encode barge-in event"
        ),
    }
}

pub fn record_vad_transition(speech_active: bool, coordinator_state: &'static str) {
    let event = VadTransitionEvent {
        speech_active,
        coordinator_state,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_VAD,
            speech_active = event.speech_active,
            coordinator_state = event.coordinator_state,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_VAD,
            %err,
            "failed to encode voice activity event"
        ),
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_to_u64() {
        let duration = Duration::new(u64::MAX, 0);
        assert_eq!(duration_to_ms(duration), u64::MAX);
    }
}
