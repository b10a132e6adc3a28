use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::dialogue::types::CoordinatorState;

use super::util::duration_to_ms;

const STATE_IDLE: u8 = 0;
const STATE_LISTENING: u8 = 1;
const STATE_THINKING: u8 = 2;
const STATE_SPEAKING: u8 = 3;

#[derive(Default)]
pub(crate) struct TurnGuards {
    state: AtomicU8,
    turn_in_flight: AtomicBool,
    scripted_in_flight: AtomicBool,
    conversation_active: AtomicBool,
    epoch: AtomicU64,
    turn_started_ms: AtomicU64,
    first_signal_ms: AtomicU64,
}

impl TurnGuards {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> CoordinatorState {
        match self.state.load(Ordering::SeqCst) {
            STATE_LISTENING => CoordinatorState::Listening,
            STATE_THINKING => CoordinatorState::Thinking,
            STATE_SPEAKING => CoordinatorState::Speaking,
            _ => CoordinatorState::Idle,
        }
    }

    pub(crate) fn set_state(&self, state: CoordinatorState) {
        let value = match state {
            CoordinatorState::Idle => STATE_IDLE,
            CoordinatorState::Listening => STATE_LISTENING,
            CoordinatorState::Thinking => STATE_THINKING,
            CoordinatorState::Speaking => STATE_SPEAKING,
        };
        self.state.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_turn_in_flight(&self) -> bool {
        self.turn_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn set_turn_in_flight(&self, value: bool) {
        self.turn_in_flight.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_scripted_in_flight(&self) -> bool {
        self.scripted_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scripted_in_flight(&self, value: bool) {
        self.scripted_in_flight.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_conversation_active(&self) -> bool {
        self.conversation_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_conversation_active(&self, value: bool) {
        self.conversation_active.store(value, Ordering::SeqCst);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub(crate) fn begin_turn_window(&self, started_at: Instant) {
        let stamp = duration_to_ms(started_at.elapsed()).max(1);
        self.turn_started_ms.store(stamp, Ordering::SeqCst);
        self.first_signal_ms.store(0, Ordering::SeqCst);
    }

    pub(crate) fn mark_first_signal(&self, started_at: Instant) {
        let stamp = duration_to_ms(started_at.elapsed()).max(1);
        let _ = self.first_signal_ms.compare_exchange(
            0,
            stamp,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn clear_turn_window(&self) {
        self.turn_started_ms.store(0, Ordering::SeqCst);
        self.first_signal_ms.store(0, Ordering::SeqCst);
    }

    pub(crate) fn turn_started_ms(&self) -> u64 {
        self.turn_started_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn has_first_signal(&self) -> bool {
        self.first_signal_ms.load(Ordering::SeqCst) != 0
    }
}

#[derive(Default)]
pub(crate) struct AudioAccumulator {
    segments: Vec<Bytes>,
    sample_rate_hz: Option<u32>,
}

impl AudioAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The first delta pins the sample rate; later mismatches keep it so one
    /// contiguous buffer can be handed to playback.
    pub(crate) fn push(&mut self, pcm: Bytes, sample_rate_hz: u32) {
        if pcm.is_empty() {
            return;
        }
        if self.sample_rate_hz.is_none() {
            self.sample_rate_hz = Some(sample_rate_hz);
        }
        self.segments.push(pcm);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn take(&mut self) -> Option<(Bytes, u32)> {
        let sample_rate_hz = self.sample_rate_hz.take()?;
        if self.segments.is_empty() {
            return None;
        }
        let total: usize = self.segments.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for segment in self.segments.drain(..) {
            joined.extend_from_slice(&segment);
        }
        Some((joined.freeze(), sample_rate_hz))
    }

    pub(crate) fn clear(&mut self) {
        self.segments.clear();
        self.sample_rate_hz = None;
    }
}
