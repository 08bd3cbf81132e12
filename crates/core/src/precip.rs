//! Temperature-based rain/snow partition
//!
//! Linear ramp between the all-snow and all-rain air temperature
//! thresholds. A configuration where the all-rain threshold does not
//! exceed the all-snow threshold makes the ramp degenerate and is
//! reported as an error rather than silently producing one phase.

use crate::error::{StepError, StepResult};

/// Rain amount of `prec` [mm] at air temperature `air_temp` [C].
///
/// All rain at or above `max_snow_temp`, all snow at or below
/// `min_rain_temp`, linear in between.
pub fn rain_portion(
    prec: f64,
    air_temp: f64,
    max_snow_temp: f64,
    min_rain_temp: f64,
) -> StepResult<f64> {
    if max_snow_temp <= min_rain_temp {
        return Err(StepError::RainSnowPartition {
            max_snow_temp,
            min_rain_temp,
        });
    }
    let fraction = ((air_temp - min_rain_temp) / (max_snow_temp - min_rain_temp)).clamp(0.0, 1.0);
    Ok(prec * fraction)
}

/// Partition `prec` [mm] into `(rain, snow)`.
pub fn partition(
    prec: f64,
    air_temp: f64,
    max_snow_temp: f64,
    min_rain_temp: f64,
) -> StepResult<(f64, f64)> {
    let rain = rain_portion(prec, air_temp, max_snow_temp, min_rain_temp)?;
    Ok((rain, prec - rain))
}
