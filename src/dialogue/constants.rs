use std::time::Duration;

pub(crate) const MIN_SETTLE_AFTER_PLAYBACK: Duration = Duration::from_millis(500);
pub(crate) const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const SIGNAL_BUS_CAPACITY: usize = 64;
pub(crate) const INTENT_BUS_CAPACITY: usize = 16;
