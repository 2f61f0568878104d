//! Loop quality control.
//!
//! Validity checks follow the NOAA "National Set of Validity Check
//! Tolerances" (AWIPS TSP-032-1992R2). Every check runs regardless of earlier
//! failures so a rejected sample reports all of its problems at once.

use std::fmt;

use thiserror::Error;

use crate::station::types::Loop;

/// An inclusive physical range for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCheck {
    pub min: f64,
    pub max: f64,
}

pub const BAROMETER: RangeCheck = RangeCheck { min: 6.8, max: 32.5 };
pub const SEA_LEVEL_PRESSURE: RangeCheck = RangeCheck { min: 25.0, max: 32.5 };
pub const DEW_POINT: RangeCheck = RangeCheck { min: -80.0, max: 90.0 };
pub const HUMIDITY: RangeCheck = RangeCheck { min: 0.0, max: 100.0 };
pub const AIR_TEMPERATURE: RangeCheck = RangeCheck { min: -60.0, max: 130.0 };
pub const RAIN_ACCUMULATION: RangeCheck = RangeCheck { min: 0.0, max: 44.0 };
pub const SOIL_TEMPERATURE: RangeCheck = RangeCheck { min: -40.0, max: 150.0 };
pub const WIND_DIRECTION: RangeCheck = RangeCheck { min: 0.0, max: 360.0 };
pub const WIND_SPEED: RangeCheck = RangeCheck { min: 0.0, max: 287.695 };

impl RangeCheck {
    fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A reading outside its valid range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "range check, {min} <= ({check}) <= {max}, failed for value: {value}",
    min = .range.min,
    max = .range.max
)]
pub struct RangeViolation {
    /// Name of the failed check, e.g. "Barometer (sea-level)".
    pub check: String,
    pub range: RangeCheck,
    pub value: f64,
}

/// Result of a validity check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityControl {
    violations: Vec<RangeViolation>,
}

impl QualityControl {
    /// True when no check failed.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[RangeViolation] {
        &self.violations
    }

    fn assert_range(&mut self, check: impl Into<String>, value: f64, range: RangeCheck) {
        if !range.contains(value) {
            self.violations.push(RangeViolation {
                check: check.into(),
                range,
                value,
            });
        }
    }
}

impl fmt::Display for QualityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return f.write_str("passed");
        }
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Run every validity check against a loop.
pub fn validity_check(l: &Loop) -> QualityControl {
    let mut qc = QualityControl::default();

    qc.assert_range("Barometer (altimeter)", l.bar.altimeter, BAROMETER);
    qc.assert_range("Barometer (station)", l.bar.station, BAROMETER);
    qc.assert_range("Barometer (sea-level)", l.bar.sea_level, SEA_LEVEL_PRESSURE);

    qc.assert_range("Dew point", l.dew_point, DEW_POINT);

    qc.assert_range("Inside humidity", f64::from(l.in_humidity), HUMIDITY);
    qc.assert_range("Outside humidity", f64::from(l.out_humidity), HUMIDITY);

    qc.assert_range("Inside air temperature", l.in_temp, AIR_TEMPERATURE);
    qc.assert_range("Outside air temperature", l.out_temp, AIR_TEMPERATURE);

    let accum = &l.rain.accum;
    qc.assert_range("Rain accumulation (last 15m)", accum.last_15_min, RAIN_ACCUMULATION);
    qc.assert_range("Rain accumulation (last 1h)", accum.last_hour, RAIN_ACCUMULATION);
    qc.assert_range("Rain accumulation (last 24h)", accum.last_24_hours, RAIN_ACCUMULATION);
    qc.assert_range("Rain accumulation (today)", accum.today, RAIN_ACCUMULATION);

    for (i, probe) in l.soil_temp.iter().enumerate() {
        if let Some(t) = probe {
            qc.assert_range(format!("Soil temperature #{i}"), f64::from(*t), SOIL_TEMPERATURE);
        }
    }

    qc.assert_range("Wind direction (current)", f64::from(l.wind.cur.dir), WIND_DIRECTION);
    qc.assert_range("Wind speed (current)", l.wind.cur.speed, WIND_SPEED);

    qc
}
