//! pattern.rs — intensidad de tráfico según la hora del día
//!
//! Dos picos gaussianos (9:00 y 18:00) más un suelo de 0.2, saturado a 1.

use chrono::{DateTime, Timelike, Utc};

pub const MORNING_PEAK_MIN: f64 = 540.0;
pub const EVENING_PEAK_MIN: f64 = 1080.0;
pub const PEAK_WIDTH_MIN: f64 = 120.0;
pub const BASE_FLOOR: f64 = 0.2;

#[inline]
pub fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    let d = x - center;
    (-(d * d) / (2.0 * width * width)).exp()
}

pub fn intensity(minute_of_day: f64) -> f64 {
    let v = gaussian(minute_of_day, MORNING_PEAK_MIN, PEAK_WIDTH_MIN)
        + gaussian(minute_of_day, EVENING_PEAK_MIN, PEAK_WIDTH_MIN)
        + BASE_FLOOR;
    v.min(1.0)
}

/// Minuto del día (UTC) con fracción de segundos
pub fn minute_of_day(t: DateTime<Utc>) -> f64 {
    t.hour() as f64 * 60.0 + t.minute() as f64 + t.second() as f64 / 60.0
}

pub fn intensity_at(t: DateTime<Utc>) -> f64 {
    intensity(minute_of_day(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn peaks_at_nine_and_eighteen() {
        let m = intensity(540.0);
        let e = intensity(1080.0);
        assert!((m - 1.0).abs() < 1e-9);
        assert!((e - 1.0).abs() < 1e-9);
        for minute in 0..1440 {
            let v = intensity(minute as f64);
            assert!(v <= m + 1e-12);
            assert!(v <= e + 1e-12);
        }
    }

    #[test]
    fn never_below_floor() {
        for minute in 0..1440 {
            assert!(intensity(minute as f64) >= BASE_FLOOR);
        }
    }

    #[test]
    fn night_is_near_floor() {
        let v = intensity(0.0);
        assert!(v < 0.201, "00:00 -> {v}");
    }

    #[test]
    fn minute_of_day_from_timestamp() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 30).unwrap();
        assert!((minute_of_day(t) - 1080.5).abs() < 1e-9);
        assert!((intensity_at(t) - 1.0).abs() < 1e-4);
    }
}
