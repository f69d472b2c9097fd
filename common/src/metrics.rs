//! Pure comfort-metric math: dew point, heat index, comfort classification.
//! No state, no I/O; everything here is deterministic in its inputs.

use crate::types::ComfortLabel;

// Magnus approximation constants (Sonntag 1990 parameter set).
const MAGNUS_B: f32 = 17.62;
const MAGNUS_C: f32 = 243.12;

// Comfort bands, inclusive on both ends.
const TEMP_BAND_C: (f32, f32) = (20.0, 26.0);
const HUMIDITY_BAND: (f32, f32) = (30.0, 60.0);

// Heat index is only defined at or above this Fahrenheit temperature.
const HEAT_INDEX_MIN_F: f32 = 80.0;

/// Dew point in °C via the Magnus formula.
///
/// Undefined for `humidity <= 0` (the logarithm diverges); callers guard.
pub fn dew_point(temp_c: f32, humidity: f32) -> f32 {
    let gamma = (humidity / 100.0).ln() + (MAGNUS_B * temp_c) / (MAGNUS_C + temp_c);
    (MAGNUS_C * gamma) / (MAGNUS_B - gamma)
}

/// Perceived temperature in °C via the NOAA Rothfusz regression.
///
/// Below 80.0°F the regression does not apply and the input temperature is
/// returned unchanged. That is the NOAA convention for moderate temperatures,
/// not a missing case.
pub fn heat_index(temp_c: f32, humidity: f32) -> f32 {
    let t = temp_c * 1.8 + 32.0;
    if t < HEAT_INDEX_MIN_F {
        return temp_c;
    }

    let h = humidity;
    let hi = -42.379 + 2.04901523 * t + 10.14333127 * h
        - 0.22475541 * t * h
        - 0.00683783 * t * t
        - 0.05481717 * h * h
        + 0.00122874 * t * t * h
        + 0.00085282 * t * h * h
        - 0.00000199 * t * t * h * h;

    (hi - 32.0) / 1.8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Below,
    Within,
    Above,
}

impl Band {
    fn classify(value: f32, (low, high): (f32, f32)) -> Self {
        if value < low {
            Self::Below
        } else if value > high {
            Self::Above
        } else {
            Self::Within
        }
    }
}

/// Classifies a temperature/humidity pair into one of the nine comfort
/// regions. Band edges count as within, so every pair maps to exactly one
/// label.
pub fn comfort_label(temp_c: f32, humidity: f32) -> ComfortLabel {
    let temp = Band::classify(temp_c, TEMP_BAND_C);
    let hum = Band::classify(humidity, HUMIDITY_BAND);

    match (temp, hum) {
        (Band::Within, Band::Within) => ComfortLabel::Ok,
        (Band::Below, Band::Within) => ComfortLabel::Cold,
        (Band::Above, Band::Within) => ComfortLabel::Hot,
        (Band::Within, Band::Below) => ComfortLabel::Dry,
        (Band::Within, Band::Above) => ComfortLabel::Humid,
        (Band::Below, Band::Below) => ComfortLabel::ColdDry,
        (Band::Below, Band::Above) => ComfortLabel::ColdHumid,
        (Band::Above, Band::Below) => ComfortLabel::HotDry,
        (Band::Above, Band::Above) => ComfortLabel::HotHumid,
    }
}
