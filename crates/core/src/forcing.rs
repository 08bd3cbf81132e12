//! Atmospheric forcing and gauge undercatch correction
//!
//! Forcing is one scalar per variable per step; sub-step radiation
//! handling belongs to the driver. The undercatch correction follows the
//! Yang et al. (1998) catch-ratio regressions for an unshielded 8-inch
//! gauge, with gauge-orifice wind extrapolated down the log profile.

use serde::{Deserialize, Serialize};

/// Height of the gauge orifice above the surface [m].
const GAUGE_HEIGHT: f64 = 1.0;

/// Atmospheric forcing for one cell and one time step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AtmosForcing {
    /// Air temperature [C].
    pub air_temp: f64,
    /// Precipitation over the step [mm].
    pub prec: f64,
    /// Wind speed at the measurement height [m/s].
    pub wind: f64,
    /// Incoming shortwave radiation [W/m^2].
    pub shortwave: f64,
    /// Incoming longwave radiation [W/m^2].
    pub longwave: f64,
    /// Vapor pressure [Pa].
    pub vp: f64,
    /// Vapor pressure deficit [Pa].
    pub vpd: f64,
    /// Air pressure [Pa].
    pub pressure: f64,
    /// Air density [kg/m^3].
    pub density: f64,
}

/// Calendar position of one step, used for monthly canopy parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepTime {
    /// Calendar year.
    pub year: i32,
    /// Month, 1..=12.
    pub month: usize,
    /// Day of month.
    pub day: u32,
    /// Hour of day.
    pub hour: u32,
}

impl StepTime {
    /// Index into a `[f64; 12]` monthly parameter table.
    pub fn month_index(&self) -> usize {
        debug_assert!((1..=12).contains(&self.month));
        self.month - 1
    }
}

/// Multiplicative gauge undercatch corrections, rain and snow separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeCorrection {
    /// Correction factor applied to rainfall (>= 1).
    pub rain: f64,
    /// Correction factor applied to snowfall (>= 1).
    pub snow: f64,
}

impl GaugeCorrection {
    /// No correction.
    pub const IDENTITY: GaugeCorrection = GaugeCorrection {
        rain: 1.0,
        snow: 1.0,
    };

    /// Wind-dependent catch-ratio correction.
    ///
    /// The gauge is assumed free of vegetation effects, so the same
    /// factors apply to the whole grid cell. Wind is brought from the
    /// measurement height down to the gauge orifice with a neutral log
    /// profile over the respective surface roughness; the catch ratios
    /// are Yang et al. (1998) for rain and snow.
    pub fn from_wind(wind: f64, wind_height: f64, roughness: f64, snow_roughness: f64) -> Self {
        let rain_wind = gauge_wind(wind, wind_height, roughness);
        let snow_wind = gauge_wind(wind, wind_height, snow_roughness);

        // Catch ratios in percent; corrections are their reciprocals.
        let rain_catch = (4.605 - 0.062 * rain_wind.powf(0.58)).exp();
        let snow_catch = (4.606 - 0.036 * snow_wind.powf(1.75)).exp();

        GaugeCorrection {
            rain: (100.0 / rain_catch).max(1.0),
            snow: (100.0 / snow_catch).max(1.0),
        }
    }
}

/// Wind speed at the gauge orifice from a neutral logarithmic profile.
fn gauge_wind(wind: f64, wind_height: f64, roughness: f64) -> f64 {
    if wind <= 0.0 || wind_height <= roughness {
        return 0.0;
    }
    let ratio = ((GAUGE_HEIGHT + roughness) / roughness).ln() / (wind_height / roughness).ln();
    (wind * ratio).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_correction() {
        assert_eq!(GaugeCorrection::IDENTITY.rain, 1.0);
        assert_eq!(GaugeCorrection::IDENTITY.snow, 1.0);
    }

    #[test]
    fn test_calm_wind_is_near_identity() {
        let correction = GaugeCorrection::from_wind(0.0, 10.0, 0.001, 0.0005);
        assert_relative_eq!(correction.rain, 1.0, max_relative = 0.02);
        assert_relative_eq!(correction.snow, 1.0, max_relative = 0.02);
    }

    #[test]
    fn test_snow_correction_exceeds_rain() {
        // Snow undercatch grows much faster with wind than rain undercatch.
        let correction = GaugeCorrection::from_wind(6.0, 10.0, 0.001, 0.0005);
        assert!(correction.snow > correction.rain);
        assert!(correction.rain >= 1.0);
    }

    #[test]
    fn test_correction_monotonic_in_wind() {
        let low = GaugeCorrection::from_wind(2.0, 10.0, 0.001, 0.0005);
        let high = GaugeCorrection::from_wind(8.0, 10.0, 0.001, 0.0005);
        assert!(high.snow > low.snow);
        assert!(high.rain >= low.rain);
    }

    #[test]
    fn test_month_index() {
        let time = StepTime {
            year: 1997,
            month: 1,
            day: 8,
            hour: 0,
        };
        assert_eq!(time.month_index(), 0);
    }
}
