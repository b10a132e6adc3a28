//! Frame-based voice activity detection over microphone loudness.
//!
//! The detector consumes raw capture buffers, tracks RMS loudness in dBFS and
//! applies sample-counted hysteresis windows so short pops neither open nor
//! close a speech episode.

use std::time::Duration;

use crate::dialogue::config::VadConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum VadEvent {
    SpeechStart,
    SpeechEnd,
    Level { dbfs: f32, speech_active: bool },
}

/// Stateful detector; feed every capture buffer in arrival order.
pub(crate) struct VoiceActivityDetector {
    config: VadConfig,
    start_samples: usize,
    end_samples: usize,
    above_run: usize,
    below_run: usize,
    speech_active: bool,
}

impl VoiceActivityDetector {
    pub(crate) fn new(config: VadConfig) -> Self {
        let start_samples = duration_to_samples(config.start_window, config.sample_rate_hz).max(1);
        let end_samples = duration_to_samples(config.end_window, config.sample_rate_hz).max(1);
        Self {
            config,
            start_samples,
            end_samples,
            above_run: 0,
            below_run: 0,
            speech_active: false,
        }
    }

    /// Clears hysteresis runs and the active flag, e.g. when capture restarts.
    pub(crate) fn reset(&mut self) {
        self.above_run = 0;
        self.below_run = 0;
        self.speech_active = false;
    }

    pub(crate) fn is_speech_active(&self) -> bool {
        self.speech_active
    }

    /// Ingests one buffer and returns the events it produced, in order.
    ///
    /// A `Level` event is emitted for every non-empty buffer after any
    /// transition, so its `speech_active` flag reflects the new state.
    pub(crate) fn ingest(&mut self, frame: &[f32]) -> Vec<VadEvent> {
        if frame.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let dbfs = loudness_dbfs(frame).max(self.config.floor_dbfs);

        if dbfs >= self.config.speech_threshold_dbfs {
            self.above_run = self.above_run.saturating_add(frame.len());
            self.below_run = 0;
            if !self.speech_active && self.above_run >= self.start_samples {
                self.speech_active = true;
                events.push(VadEvent::SpeechStart);
            }
        } else {
            self.below_run = self.below_run.saturating_add(frame.len());
            self.above_run = 0;
            if self.speech_active && self.below_run >= self.end_samples {
                self.speech_active = false;
                events.push(VadEvent::SpeechEnd);
            }
        }

        events.push(VadEvent::Level {
            dbfs,
            speech_active: self.speech_active,
        });
        events
    }
}

fn loudness_dbfs(frame: &[f32]) -> f32 {
    let energy: f32 = frame.iter().map(|sample| sample * sample).sum();
    let rms = (energy / frame.len() as f32).sqrt();
    20.0 * rms.max(1e-9).log10()
}

fn duration_to_samples(duration: Duration, sample_rate_hz: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate_hz)).round() as usize
}
