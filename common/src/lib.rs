pub mod arbiter;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod paths;
pub mod scheduler;
pub mod types;

pub use arbiter::{DeviceState, OverrideArbiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandChannel, CommandOutcome, Inbound, Intent, Outbound};
pub use config::{DeviceConfig, LinkConfig, NetworkConfig, RuntimeConfig};
pub use connection::{ConnectionManager, ConnectionSnapshot, LinkAction, LinkStatus};
pub use device::{DeviceLoop, DeviceTask, RemoteStore, Sensor, StatusDisplay, TickReport};
pub use error::{ConfigError, DeviceFailure, LinkError, SensorError, StoreError};
pub use paths::DevicePaths;
pub use scheduler::IntervalScheduler;
pub use types::{DeviceView, ErrorRecord, Reading, RemoteRecord, SensorSample};
