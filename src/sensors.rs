//! Environmental telemetry.
//!
//! Physical sensors are not wired; `SensorSample::synthetic` produces a
//! plausible reading in each channel's range so the dashboard and store have
//! something to carry.

use chrono::{Local, NaiveDateTime, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    pub analog_value: u16,
    pub color_red: u8,
    pub color_green: u8,
    pub color_blue: u8,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Lux.
    pub light_intensity: f64,
    /// Percent.
    pub soil_moisture: f64,
}

impl SensorSample {
    pub fn synthetic() -> Self {
        Self::synthetic_with(&mut rand::thread_rng())
    }

    pub fn synthetic_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            timestamp: now_local(),
            analog_value: rng.gen_range(0..=1023),
            color_red: rng.gen(),
            color_green: rng.gen(),
            color_blue: rng.gen(),
            temperature: rng.gen_range(10.0..30.0),
            humidity: rng.gen_range(20.0..80.0),
            light_intensity: rng.gen_range(100.0..1000.0),
            soil_moisture: rng.gen_range(0.0..100.0),
        }
    }

    pub fn temperature_f(&self) -> f64 {
        celsius_to_fahrenheit(self.temperature)
    }
}

/// Local wall-clock time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn hpa_to_inhg(hpa: f64) -> f64 {
    hpa * 0.02953
}

pub(crate) mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn synthetic_readings_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let s = SensorSample::synthetic_with(&mut rng);
            assert!(s.analog_value <= 1023);
            assert!((10.0..30.0).contains(&s.temperature));
            assert!((20.0..80.0).contains(&s.humidity));
            assert!((100.0..1000.0).contains(&s.light_intensity));
            assert!((0.0..100.0).contains(&s.soil_moisture));
        }
    }

    #[test]
    fn serializes_timestamp_as_local_datetime_string() {
        let mut sample = SensorSample::synthetic();
        sample.timestamp =
            NaiveDateTime::parse_from_str("2024-05-01 08:30:00", TIMESTAMP_FORMAT).unwrap();
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01 08:30:00");
        let back: SensorSample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert!((hpa_to_inhg(1013.25) - 29.921).abs() < 0.001);
    }
}
