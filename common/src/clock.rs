use std::{cell::Cell, sync::OnceLock, time::Instant};

pub trait Clock {
    /// Monotonic milliseconds; only differences are meaningful.
    fn now_ms(&self) -> u64;

    /// Wall-clock milliseconds since the Unix epoch, used for remote timestamps.
    fn epoch_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn epoch_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
    epoch_base_ms: i64,
}

impl ManualClock {
    pub fn new(start_ms: u64, epoch_base_ms: i64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
            epoch_base_ms,
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(delta_ms));
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.set(now_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn epoch_ms(&self) -> i64 {
        self.epoch_base_ms
            .saturating_add(i64::try_from(self.now_ms.get()).unwrap_or(i64::MAX))
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_tracks_epoch_alongside_monotonic_time() {
        let clock = ManualClock::new(1_000, 1_700_000_000_000);
        clock.advance(500);

        assert_eq!(clock.now_ms(), 1_500);
        assert_eq!(clock.epoch_ms(), 1_700_000_001_500);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let first = monotonic_ms();
        let second = monotonic_ms();
        assert!(second >= first);
    }
}
