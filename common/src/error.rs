use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor returned an invalid reading (temperature={temperature}, humidity={humidity})")]
    InvalidReading { temperature: f32, humidity: f32 },
    #[error("sensor read failed: {0}")]
    Hardware(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("remote store is not ready")]
    NotReady,
    #[error("remote write to `{path}` failed: {reason}")]
    Write { path: String, reason: String },
    #[error("remote read of `{path}` failed: {reason}")]
    Read { path: String, reason: String },
    #[error("remote value at `{path}` could not be decoded: {reason}")]
    Decode { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("no inbound traffic for {0} ms")]
    HeartbeatTimeout(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure recorded by one device-loop task; never fatal to the loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceFailure {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
