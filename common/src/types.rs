use serde::{Deserialize, Serialize};

use crate::error::SensorError;

/// Raw values as delivered by a sensor collaborator, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    #[serde(rename = "sampledAt")]
    pub sampled_at: i64,
}

impl Reading {
    pub const ZERO: Reading = Reading {
        temperature: 0.0,
        humidity: 0.0,
        sampled_at: 0,
    };

    pub fn new(temperature: f32, humidity: f32, sampled_at: i64) -> Self {
        Self {
            temperature,
            humidity,
            sampled_at,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }

    pub fn from_sample(sample: SensorSample, sampled_at: i64) -> Result<Self, SensorError> {
        let reading = Self::new(sample.temperature, sample.humidity, sampled_at);
        if reading.is_valid() {
            Ok(reading)
        } else {
            Err(SensorError::InvalidReading {
                temperature: sample.temperature,
                humidity: sample.humidity,
            })
        }
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::ZERO
    }
}

/// The per-device `current` document in the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default)]
    pub temp: Option<f32>,
    #[serde(default)]
    pub hum: Option<f32>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, rename = "override")]
    pub override_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: i64,
    pub message: String,
}

/// Snapshot handed to the display collaborator on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub reading: Reading,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "overrideRemainingMs")]
    pub override_remaining_ms: u64,
    #[serde(rename = "storeReady")]
    pub store_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_samples_are_rejected() {
        let sample = SensorSample {
            temperature: f32::NAN,
            humidity: 40.0,
        };
        assert!(matches!(
            Reading::from_sample(sample, 10),
            Err(SensorError::InvalidReading { .. })
        ));

        let sample = SensorSample {
            temperature: 21.0,
            humidity: f32::NAN,
        };
        assert!(Reading::from_sample(sample, 10).is_err());
    }

    #[test]
    fn remote_record_tolerates_missing_fields() {
        let record: RemoteRecord =
            serde_json::from_str(r#"{"override": true, "temp": 30}"#).unwrap();

        assert!(record.override_requested);
        assert_eq!(record.temp, Some(30.0));
        assert_eq!(record.hum, None);
        assert_eq!(record.timestamp, None);
    }

    #[test]
    fn remote_record_defaults_override_to_false() {
        let record: RemoteRecord = serde_json::from_str(r#"{"temp": 21.5, "hum": 40}"#).unwrap();
        assert!(!record.override_requested);
    }
}
