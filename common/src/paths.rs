pub const DEVICES_ROOT: &str = "devices";

pub const FIELD_TEMP: &str = "temp";
pub const FIELD_HUM: &str = "hum";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_OVERRIDE: &str = "override";

/// Logical key paths for one device in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    pub current: String,
    pub temp: String,
    pub hum: String,
    pub timestamp: String,
    pub override_flag: String,
    pub last_online: String,
    pub errors: String,
}

impl DevicePaths {
    pub fn new(device_id: &str) -> Self {
        let base = format!("{DEVICES_ROOT}/{device_id}");
        let current = format!("{base}/current");
        Self {
            temp: format!("{current}/{FIELD_TEMP}"),
            hum: format!("{current}/{FIELD_HUM}"),
            timestamp: format!("{current}/{FIELD_TIMESTAMP}"),
            override_flag: format!("{current}/{FIELD_OVERRIDE}"),
            last_online: format!("{base}/metadata/last_online"),
            errors: format!("{base}/errors"),
            current,
        }
    }

    /// Wildcard subscription covering every field of the current record.
    pub fn current_subscription(&self) -> String {
        format!("{}/#", self.current)
    }
}
