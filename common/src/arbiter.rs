use crate::types::{Reading, RemoteRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub current_reading: Reading,
    pub override_active: bool,
    pub override_since_ms: u64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            current_reading: Reading::ZERO,
            override_active: false,
            override_since_ms: 0,
        }
    }
}

/// Owns the authoritative reading and decides whether sensed or remotely
/// injected values win. Performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct OverrideArbiter {
    state: DeviceState,
}

impl OverrideArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn current(&self) -> Reading {
        self.state.current_reading
    }

    pub fn is_override_active(&self) -> bool {
        self.state.override_active
    }

    /// Returns the sample unchanged so the caller can publish it as the raw
    /// sensed value, whether or not it became authoritative.
    pub fn apply_sample(&mut self, reading: Reading) -> Reading {
        if !self.state.override_active && reading.is_valid() {
            self.state.current_reading = reading;
        }
        reading
    }

    pub fn apply_override(&mut self, reading: Reading, now_ms: u64) {
        self.state.override_active = true;
        self.state.override_since_ms = now_ms;
        self.state.current_reading = reading;
    }

    /// Applies an override from a remote record; absent fields keep the
    /// current value.
    pub fn apply_remote_override(
        &mut self,
        record: &RemoteRecord,
        now_ms: u64,
        epoch_ms: i64,
    ) -> Reading {
        let current = self.state.current_reading;
        let reading = Reading::new(
            record
                .temp
                .filter(|value| value.is_finite())
                .unwrap_or(current.temperature),
            record
                .hum
                .filter(|value| value.is_finite())
                .unwrap_or(current.humidity),
            epoch_ms,
        );
        self.apply_override(reading, now_ms);
        reading
    }

    /// Returns true exactly once per activation, when the override lapses.
    /// The caller owns clearing the remote flag.
    pub fn maybe_expire(&mut self, now_ms: u64, timeout_ms: u64) -> bool {
        if !self.state.override_active {
            return false;
        }
        if now_ms.saturating_sub(self.state.override_since_ms) >= timeout_ms {
            self.state.override_active = false;
            return true;
        }
        false
    }

    pub fn override_remaining_ms(&self, now_ms: u64, timeout_ms: u64) -> u64 {
        if !self.state.override_active {
            return 0;
        }
        let elapsed = now_ms.saturating_sub(self.state.override_since_ms);
        timeout_ms.saturating_sub(elapsed)
    }
}
