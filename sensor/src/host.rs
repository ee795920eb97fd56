use std::time::Duration;

use envnode_common::{
    DeviceLoop, DeviceView, RuntimeConfig, Sensor, SensorError, SensorSample, StatusDisplay,
    SystemClock, TickReport,
};
use rumqttc::{AsyncClient, MqttOptions};
use tracing::{info, warn};

use crate::store::{spawn_event_loop, MqttStore};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = RuntimeConfig::default_path();
    let mut runtime = RuntimeConfig::load(&config_path).unwrap_or_else(|err| {
        warn!("failed to load {}: {err:#}", config_path.display());
        RuntimeConfig::default()
    });
    runtime.apply_env(|key| std::env::var(key).ok());
    runtime.sanitize();

    let mut mqtt_options = MqttOptions::new(
        format!("envnode-sensor-{}", runtime.device.device_id),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(15));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let store = MqttStore::new(mqtt);

    let fault_every = std::env::var("ENVNODE_SIM_FAULT_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    let mut device = DeviceLoop::new(
        runtime.device.clone(),
        SimulatedSensor::new(fault_every),
        store.clone(),
        LogDisplay,
        SystemClock,
    );
    spawn_event_loop(store, eventloop, device.paths().current_subscription());

    info!(
        device = %runtime.device.device_id,
        broker = %runtime.network.mqtt_host,
        "sensor loop started"
    );

    let mut interval = tokio::time::interval(Duration::from_millis(runtime.device.loop_tick_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = device.run_once();
                log_report(&report);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("sensor loop stopping");
                return Ok(());
            }
        }
    }
}

fn log_report(report: &TickReport) {
    for (task, failure) in &report.failures {
        warn!("{task:?} task failed: {failure}");
    }
    if let Some(reading) = report.override_applied {
        info!(
            "override activated: {:.1}°C / {:.1}%",
            reading.temperature, reading.humidity
        );
    }
    if report.override_expired {
        info!("override expired; resuming sensed values");
    }
}

/// Deterministic stand-in for the temperature/humidity sensor.
/// Hardware integration point: swap for a real driver implementing `Sensor`.
struct SimulatedSensor {
    tick: u64,
    fault_every: u64,
}

impl SimulatedSensor {
    fn new(fault_every: u64) -> Self {
        Self {
            tick: 0,
            fault_every,
        }
    }
}

impl Sensor for SimulatedSensor {
    fn read(&mut self) -> Result<SensorSample, SensorError> {
        self.tick = self.tick.saturating_add(1);

        if self.fault_every > 0 && self.tick % self.fault_every == 0 {
            return Ok(SensorSample {
                temperature: f32::NAN,
                humidity: f32::NAN,
            });
        }

        Ok(SensorSample {
            temperature: 21.0 + ((self.tick % 8) as f32 * 0.2),
            humidity: 45.0 + ((self.tick % 6) as f32 * 0.5),
        })
    }
}

struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn refresh(&mut self, view: &DeviceView) {
        if view.override_active {
            info!(
                "display: {:.1}°C {:.1}% [override, {}s left]{}",
                view.reading.temperature,
                view.reading.humidity,
                view.override_remaining_ms / 1_000,
                offline_suffix(view)
            );
        } else {
            info!(
                "display: {:.1}°C {:.1}%{}",
                view.reading.temperature,
                view.reading.humidity,
                offline_suffix(view)
            );
        }
    }
}

fn offline_suffix(view: &DeviceView) -> &'static str {
    if view.store_ready {
        ""
    } else {
        " (offline)"
    }
}
