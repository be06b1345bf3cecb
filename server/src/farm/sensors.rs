//! Ground-station sensor readings
//!
//! Stations have written their readings under several field names over
//! time. Each quantity lists its accepted names in priority order; the first
//! one holding a usable non-zero number wins, and a quantity with none reads
//! as `0.0`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minutes of readings kept per station
pub const HISTORY_MINUTES: i64 = 10;

const SOIL_TEMP: &[&str] = &["soilTemp", "soil_temp", "soilTemperature"];
const FLOW_RATE: &[&str] = &["flowRate", "flow_rate", "waterFlow", "flow"];
const ENVIRONMENT_TEMP: &[&str] = &["environmentTemp", "env_temp", "envTemp", "temperature"];
const HUMIDITY: &[&str] = &["humidity", "hum"];
const PH: &[&str] = &["phValue", "pHValue", "ph"];
const ATMOS_PRESSURE: &[&str] = &["atmosPressure", "pressure", "atm_pressure"];
const ALTITUDE: &[&str] = &["altitude", "alt"];

/// One snapshot of a ground station's sensors
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Soil temperature, °C
    pub soil_temp: f64,
    /// Irrigation flow, L/s
    pub flow_rate: f64,
    /// Air temperature, °C
    pub environment_temp: f64,
    /// Relative humidity, %
    pub humidity: f64,
    pub ph: f64,
    /// Atmospheric pressure, hPa
    pub atmos_pressure: f64,
    /// Metres
    pub altitude: f64,
}

fn field(raw: &Value, names: &[&str]) -> f64 {
    names
        .iter()
        .filter_map(|name| match raw.get(*name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .find(|v| v.is_finite() && *v != 0.0)
        .unwrap_or(0.0)
}

impl SensorReading {
    /// Parse a stored station node; `None` when the node is not an object
    pub fn from_value(raw: &Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        Some(Self {
            soil_temp: field(raw, SOIL_TEMP),
            flow_rate: field(raw, FLOW_RATE),
            environment_temp: field(raw, ENVIRONMENT_TEMP),
            humidity: field(raw, HUMIDITY),
            ph: field(raw, PH),
            atmos_pressure: field(raw, ATMOS_PRESSURE),
            altitude: field(raw, ALTITUDE),
        })
    }
}

/// A reading stamped with the minute it was taken in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSample {
    /// `HH:MM` (UTC)
    pub minute: String,
    pub recorded_at: DateTime<Utc>,
    pub reading: SensorReading,
}

/// Per-minute readings of one station over the last `HISTORY_MINUTES`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorSeries {
    samples: Vec<SensorSample>,
}

impl SensorSeries {
    /// Store `reading` in the slot for `at`'s minute and drop expired slots
    ///
    /// Returns `true` when the series changed.
    pub fn record(&mut self, at: DateTime<Utc>, reading: SensorReading) -> bool {
        let minute = at.format("%H:%M").to_string();
        let cutoff = at - ChronoDuration::minutes(HISTORY_MINUTES);
        let before = self.samples.len();
        self.samples.retain(|s| s.recorded_at > cutoff);
        let mut changed = self.samples.len() != before;

        match self.samples.iter_mut().find(|s| s.minute == minute) {
            Some(slot) if slot.reading == reading => {}
            Some(slot) => {
                slot.recorded_at = at;
                slot.reading = reading;
                changed = true;
            }
            None => {
                self.samples.push(SensorSample {
                    minute,
                    recorded_at: at,
                    reading,
                });
                changed = true;
            }
        }
        changed
    }

    /// Oldest first
    pub fn samples(&self) -> &[SensorSample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&SensorSample> {
        self.samples.last()
    }
}
