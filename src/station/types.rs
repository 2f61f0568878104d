//! Station measurement types.
//!
//! - [`Loop`]: instantaneous conditions reported by the console
//! - [`LoopSample`]: a [`Loop`] accepted by quality control, with sequence and ingest time
//! - [`ArchiveRecord`]: a historical snapshot from the console's archive memory
//!
//! Units follow the console: inches of mercury, degrees Fahrenheit, percent,
//! inches of rain, miles per hour, degrees of compass heading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of soil temperature probe slots on the console.
pub const SOIL_PROBES: usize = 4;

/// Barometric pressure readings (inHg).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Barometer {
    pub altimeter: f64,
    #[serde(rename = "seaLevel")]
    pub sea_level: f64,
    pub station: f64,
    /// Three hour trend as reported by the console (-60 falling rapidly .. 60 rising rapidly).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<i8>,
}

/// Rain accumulation totals (in).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RainAccum {
    #[serde(rename = "last15Min")]
    pub last_15_min: f64,
    #[serde(rename = "lastHour")]
    pub last_hour: f64,
    #[serde(rename = "last24Hours")]
    pub last_24_hours: f64,
    pub today: f64,
    pub storm: f64,
}

/// Rain totals and current rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rain {
    pub accum: RainAccum,
    /// Current rain rate (in/h).
    pub rate: f64,
}

/// A single wind observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindSample {
    /// Direction in degrees (0 - 360).
    pub dir: u16,
    /// Speed (mph).
    pub speed: f64,
}

/// Current wind plus short-term averages and gusts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub cur: WindSample,
    #[serde(rename = "avg2Min")]
    pub avg_2_min: f64,
    #[serde(rename = "avg10Min")]
    pub avg_10_min: f64,
    #[serde(rename = "gust10Min")]
    pub gust_10_min: WindSample,
}

/// Instantaneous ("loop") conditions reported by the console.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub bar: Barometer,
    #[serde(rename = "dewPoint")]
    pub dew_point: f64,
    #[serde(rename = "heatIndex")]
    pub heat_index: f64,
    #[serde(rename = "inHumidity")]
    pub in_humidity: u8,
    #[serde(rename = "inTemperature")]
    pub in_temp: f64,
    #[serde(rename = "outHumidity")]
    pub out_humidity: u8,
    #[serde(rename = "outTemperature")]
    pub out_temp: f64,
    pub rain: Rain,
    #[serde(rename = "solarRadiation")]
    pub solar_rad: u16,
    /// Soil temperature probes (°F); `None` when a probe is not installed.
    #[serde(rename = "soilTemperature")]
    pub soil_temp: [Option<i16>; SOIL_PROBES],
    #[serde(rename = "UVIndex")]
    pub uv_index: f64,
    pub wind: Wind,
    #[serde(rename = "windChill")]
    pub wind_chill: f64,
}

impl Loop {
    /// A loop with only the barometer initialized to the lowest values quality
    /// control accepts; every other reading is zero.
    pub fn qc_minimum() -> Self {
        Self {
            bar: Barometer {
                altimeter: 6.8,
                sea_level: 25.0,
                station: 6.8,
                trend: None,
            },
            ..Default::default()
        }
    }
}

/// A loop accepted by quality control.
///
/// `timestamp` is the wall-clock time the sample was accepted, and `sequence`
/// increases by one for every accepted sample starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSample {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub current: Loop,
}

/// A historical snapshot from the console's archive memory.
///
/// Records are keyed by `timestamp`, the end of the archive interval they
/// summarize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub timestamp: DateTime<Utc>,
    pub bar: f64,
    #[serde(rename = "inHumidity")]
    pub in_humidity: u8,
    #[serde(rename = "inTemperature")]
    pub in_temp: f64,
    #[serde(rename = "outHumidity")]
    pub out_humidity: u8,
    #[serde(rename = "outTemperature")]
    pub out_temp: f64,
    #[serde(rename = "outTemperatureHigh")]
    pub out_temp_hi: f64,
    #[serde(rename = "outTemperatureLow")]
    pub out_temp_low: f64,
    #[serde(rename = "rainAccum")]
    pub rain_accum: f64,
    #[serde(rename = "rainRateHigh")]
    pub rain_rate_hi: f64,
    #[serde(rename = "solarRadiation")]
    pub solar_rad: u16,
    #[serde(rename = "UVIndexAvg")]
    pub uv_index_avg: f64,
    #[serde(rename = "windSpeedAvg")]
    pub wind_speed_avg: f64,
    #[serde(rename = "windDirectionPrevailing")]
    pub wind_dir_prevail: u16,
    #[serde(rename = "windSpeedHigh")]
    pub wind_speed_hi: f64,
    #[serde(rename = "windDirectionHigh")]
    pub wind_dir_hi: u16,
}

impl ArchiveRecord {
    /// Create an empty record for the given interval end.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bar: 0.0,
            in_humidity: 0,
            in_temp: 0.0,
            out_humidity: 0,
            out_temp: 0.0,
            out_temp_hi: 0.0,
            out_temp_low: 0.0,
            rain_accum: 0.0,
            rain_rate_hi: 0.0,
            solar_rad: 0,
            uv_index_avg: 0.0,
            wind_speed_avg: 0.0,
            wind_dir_prevail: 0,
            wind_speed_hi: 0.0,
            wind_dir_hi: 0,
        }
    }
}
