use serde_json::{json, Value};

use crate::{
    arbiter::OverrideArbiter,
    clock::Clock,
    config::DeviceConfig,
    error::{DeviceFailure, SensorError, StoreError},
    paths::DevicePaths,
    scheduler::IntervalScheduler,
    types::{DeviceView, ErrorRecord, Reading, RemoteRecord, SensorSample},
};

pub trait Sensor {
    fn read(&mut self) -> Result<SensorSample, SensorError>;
}

/// Key-path addressed remote store. Implementations must return within a
/// short bounded time; the device loop calls them inline.
pub trait RemoteStore {
    fn is_ready(&self) -> bool;
    fn set(&mut self, path: &str, value: Value) -> Result<(), StoreError>;
    fn get(&mut self, path: &str) -> Result<Option<Value>, StoreError>;
    /// Appends a record under `path`; existing records are never overwritten.
    fn push(&mut self, path: &str, value: Value) -> Result<(), StoreError>;
}

pub trait StatusDisplay {
    fn refresh(&mut self, view: &DeviceView);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTask {
    Sense,
    Sync,
    ExpireCheck,
    DisplayRefresh,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub ran: Vec<DeviceTask>,
    pub failures: Vec<(DeviceTask, DeviceFailure)>,
    pub sampled: Option<Reading>,
    pub override_applied: Option<Reading>,
    pub override_expired: bool,
    pub sync_skipped: bool,
}

impl TickReport {
    fn fail(&mut self, task: DeviceTask, failure: impl Into<DeviceFailure>) {
        self.failures.push((task, failure.into()));
    }
}

/// Single-threaded driver interleaving sensing, remote sync, override
/// expiry and display refresh. All `DeviceState` mutation happens here.
pub struct DeviceLoop<S, R, D, C> {
    config: DeviceConfig,
    paths: DevicePaths,
    arbiter: OverrideArbiter,
    scheduler: IntervalScheduler<DeviceTask>,
    sensor: S,
    store: R,
    display: D,
    clock: C,
}

impl<S, R, D, C> DeviceLoop<S, R, D, C>
where
    S: Sensor,
    R: RemoteStore,
    D: StatusDisplay,
    C: Clock,
{
    pub fn new(config: DeviceConfig, sensor: S, store: R, display: D, clock: C) -> Self {
        let scheduler = IntervalScheduler::new()
            .with_task(DeviceTask::Sense, config.sense_interval_ms)
            .with_task(DeviceTask::Sync, config.sync_interval_ms)
            .with_task(DeviceTask::ExpireCheck, config.expiry_check_interval_ms)
            .with_task(
                DeviceTask::DisplayRefresh,
                config.display_refresh_interval_ms,
            );

        Self {
            paths: DevicePaths::new(&config.device_id),
            config,
            arbiter: OverrideArbiter::new(),
            scheduler,
            sensor,
            store,
            display,
            clock,
        }
    }

    pub fn arbiter(&self) -> &OverrideArbiter {
        &self.arbiter
    }

    pub fn paths(&self) -> &DevicePaths {
        &self.paths
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn until_next_due_ms(&self) -> u64 {
        self.scheduler
            .until_next_due_ms(self.clock.now_ms())
            .unwrap_or(self.config.loop_tick_ms)
    }

    pub fn view(&self) -> DeviceView {
        let now_ms = self.clock.now_ms();
        DeviceView {
            reading: self.arbiter.current(),
            override_active: self.arbiter.is_override_active(),
            override_remaining_ms: self
                .arbiter
                .override_remaining_ms(now_ms, self.config.override_timeout_ms),
            store_ready: self.store.is_ready(),
        }
    }

    /// Runs every task whose interval has elapsed, in registration order.
    pub fn run_once(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now_ms = self.clock.now_ms();

        for task in self.scheduler.due(now_ms) {
            match task {
                DeviceTask::Sense => self.sense(&mut report),
                DeviceTask::Sync => self.sync(now_ms, &mut report),
                DeviceTask::ExpireCheck => self.expire(now_ms, &mut report),
                DeviceTask::DisplayRefresh => self.refresh_display(),
            }
            report.ran.push(task);
        }

        report
    }

    fn sense(&mut self, report: &mut TickReport) {
        let epoch_ms = self.clock.epoch_ms();
        let reading = self
            .sensor
            .read()
            .and_then(|sample| Reading::from_sample(sample, epoch_ms));

        match reading {
            Ok(reading) => {
                let raw = self.arbiter.apply_sample(reading);
                report.sampled = Some(raw);

                let writes = [
                    (&self.paths.temp, json!(raw.temperature)),
                    (&self.paths.hum, json!(raw.humidity)),
                    (&self.paths.timestamp, json!(raw.sampled_at)),
                ];
                for (path, value) in writes {
                    if let Err(err) = self.store.set(path, value) {
                        report.fail(DeviceTask::Sense, err);
                    }
                }
            }
            Err(err) => {
                let record = ErrorRecord {
                    timestamp: epoch_ms,
                    message: err.to_string(),
                };
                report.fail(DeviceTask::Sense, err);
                if let Err(err) = self.store.push(&self.paths.errors, json!(record)) {
                    report.fail(DeviceTask::Sense, err);
                }
            }
        }
    }

    fn sync(&mut self, now_ms: u64, report: &mut TickReport) {
        if !self.store.is_ready() {
            report.sync_skipped = true;
            return;
        }

        let value = match self.store.get(&self.paths.current) {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(err) => {
                report.fail(DeviceTask::Sync, err);
                return;
            }
        };

        let epoch_ms = self.clock.epoch_ms();
        match serde_json::from_value::<RemoteRecord>(value) {
            Ok(record) => {
                if record.override_requested && !self.arbiter.is_override_active() {
                    let applied = self
                        .arbiter
                        .apply_remote_override(&record, now_ms, epoch_ms);
                    report.override_applied = Some(applied);
                }
            }
            Err(err) => {
                report.fail(
                    DeviceTask::Sync,
                    StoreError::Decode {
                        path: self.paths.current.clone(),
                        reason: err.to_string(),
                    },
                );
                return;
            }
        }

        if let Err(err) = self.store.set(&self.paths.last_online, json!(epoch_ms)) {
            report.fail(DeviceTask::Sync, err);
        }
    }

    fn expire(&mut self, now_ms: u64, report: &mut TickReport) {
        if !self
            .arbiter
            .maybe_expire(now_ms, self.config.override_timeout_ms)
        {
            return;
        }

        report.override_expired = true;
        if let Err(err) = self.store.set(&self.paths.override_flag, json!(false)) {
            report.fail(DeviceTask::ExpireCheck, err);
        }
    }

    fn refresh_display(&mut self) {
        let view = self.view();
        self.display.refresh(&view);
    }
}
