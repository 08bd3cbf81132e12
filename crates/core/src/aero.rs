//! Aerodynamic resistance provider
//!
//! Neutral log-profile resistances over the snow-free and snow-covered
//! surface, computed for a fixed set of reference surfaces (used for
//! potential evaporation) plus the tile's actual vegetation, which is
//! always evaluated last and stored as the tile's resistance.
//!
//! Overstory canopies attenuate wind exponentially through the canopy
//! air space; the surface resistance is then taken at the trunk-space
//! wind speed.

use serde::{Deserialize, Serialize};

use crate::error::{StepError, StepResult};
use crate::veg::VegParams;

/// Von Karman constant.
const VON_K: f64 = 0.4;

/// Reference surfaces evaluated before the tile's own vegetation, in
/// enumeration order.
pub const N_REF_SURFACES: usize = 4;

/// Standardized reference surface types for potential evaporation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceSurface {
    /// Saturated bare soil.
    SaturatedSoil,
    /// Open water surface.
    OpenWater,
    /// Clipped grass reference crop.
    ShortReference,
    /// Alfalfa-like tall reference crop.
    TallReference,
}

impl ReferenceSurface {
    /// All reference surfaces in evaluation order.
    pub const ALL: [ReferenceSurface; N_REF_SURFACES] = [
        ReferenceSurface::SaturatedSoil,
        ReferenceSurface::OpenWater,
        ReferenceSurface::ShortReference,
        ReferenceSurface::TallReference,
    ];

    /// Roughness length [m].
    pub fn roughness(self) -> f64 {
        match self {
            ReferenceSurface::SaturatedSoil => 0.001,
            ReferenceSurface::OpenWater => 0.0002,
            ReferenceSurface::ShortReference => 0.0148,
            ReferenceSurface::TallReference => 0.0615,
        }
    }

    /// Displacement height [m].
    pub fn displacement(self) -> f64 {
        match self {
            ReferenceSurface::SaturatedSoil | ReferenceSurface::OpenWater => 0.0,
            ReferenceSurface::ShortReference => 0.08,
            ReferenceSurface::TallReference => 0.335,
        }
    }
}

/// Aerodynamic resistances for one surface description [s/m].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AeroResistance {
    /// Resistance between the (snow-free) surface and the atmosphere.
    pub surface: f64,
    /// Resistance over a snow-covered surface.
    pub snow: f64,
    /// Resistance above the overstory canopy, when one exists.
    pub overstory: Option<f64>,
}

impl AeroResistance {
    /// A resistance pair with no overstory, used to seed state.
    pub fn zero() -> Self {
        AeroResistance {
            surface: 0.0,
            snow: 0.0,
            overstory: None,
        }
    }
}

/// Geometry of one surface for the resistance computation.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceDescription {
    /// Roughness length [m].
    pub roughness: f64,
    /// Displacement height [m].
    pub displacement: f64,
    /// Whether the canopy closes above the snow surface.
    pub overstory: bool,
    /// Within-canopy wind attenuation coefficient.
    pub wind_atten: f64,
    /// Fraction of canopy height occupied by trunks.
    pub trunk_ratio: f64,
    /// Snow surface roughness [m].
    pub snow_roughness: f64,
}

impl SurfaceDescription {
    /// Describe a reference surface.
    pub fn reference(surface: ReferenceSurface, snow_roughness: f64) -> Self {
        SurfaceDescription {
            roughness: surface.roughness(),
            displacement: surface.displacement(),
            overstory: false,
            wind_atten: 0.5,
            trunk_ratio: 0.2,
            snow_roughness,
        }
    }

    /// Describe a vegetation cover for `month_index`, falling back to
    /// the bare soil roughness when the monthly table holds zero.
    pub fn vegetation(
        veg: &VegParams,
        month_index: usize,
        soil_roughness: f64,
        snow_roughness: f64,
    ) -> Self {
        let mut roughness = veg.roughness[month_index];
        if roughness == 0.0 {
            roughness = soil_roughness;
        }
        SurfaceDescription {
            roughness,
            displacement: veg.displacement[month_index],
            overstory: veg.overstory,
            wind_atten: veg.wind_atten,
            trunk_ratio: veg.trunk_ratio,
            snow_roughness,
        }
    }

    /// Vegetation height implied by the displacement height
    /// (d = 0.67 h).
    pub fn height(&self) -> f64 {
        self.displacement / 0.67
    }

    /// Reference height for the wind profile: the measurement height for
    /// short covers, raised above tall canopies.
    pub fn reference_height(&self, wind_h: f64) -> f64 {
        if self.displacement < wind_h {
            wind_h
        } else {
            self.displacement + wind_h + self.roughness
        }
    }
}

/// Log-profile resistance between heights `z` (reference) and the
/// surface with roughness `z0` and displacement `d` [s/m].
fn log_profile_resistance(wind: f64, z: f64, d: f64, z0: f64) -> StepResult<f64> {
    if wind <= 0.0 {
        return Err(StepError::Resistance(format!(
            "wind speed {wind} m/s must be positive"
        )));
    }
    if z - d <= z0 || z0 <= 0.0 {
        return Err(StepError::Resistance(format!(
            "infeasible profile geometry: reference height {z} m, displacement {d} m, \
             roughness {z0} m"
        )));
    }
    let log_term = ((z - d) / z0).ln();
    Ok(log_term * log_term / (VON_K * VON_K * wind))
}

/// Compute aerodynamic resistances for one surface description.
///
/// Returns resistances for the snow-free surface, the snow-covered
/// surface, and (for overstory canopies) the canopy top. Any geometry
/// or wind infeasibility is propagated as `StepError::Resistance`.
pub fn compute_resistance(
    desc: &SurfaceDescription,
    wind: f64,
    wind_h: f64,
) -> StepResult<AeroResistance> {
    let z = desc.reference_height(wind_h);

    if desc.overstory {
        // Above-canopy resistance at the canopy top, then exponential
        // wind attenuation down to the trunk space for the surface
        // exchange.
        let height = desc.height();
        let r_over = log_profile_resistance(wind, z, desc.displacement, desc.roughness)?;

        let u_canopy = wind * ((z - desc.displacement) / desc.roughness).ln().recip()
            * ((height - desc.displacement) / desc.roughness).ln();
        let trunk_height = height * desc.trunk_ratio;
        let attenuation = (-desc.wind_atten * (1.0 - trunk_height / height)).exp();
        let u_surface = (u_canopy * attenuation).max(1e-3);

        let surface = log_profile_resistance(u_surface, 2.0, 0.0, desc.snow_roughness.max(1e-5))?;
        let snow = surface;
        Ok(AeroResistance {
            surface,
            snow,
            overstory: Some(r_over),
        })
    } else {
        let surface = log_profile_resistance(wind, z, desc.displacement, desc.roughness)?;
        let snow = log_profile_resistance(wind, z, 0.0, desc.snow_roughness)?;
        Ok(AeroResistance {
            surface,
            snow,
            overstory: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_surface_order() {
        assert_eq!(ReferenceSurface::ALL.len(), N_REF_SURFACES);
        assert_eq!(ReferenceSurface::ALL[0], ReferenceSurface::SaturatedSoil);
    }

    #[test]
    fn test_bare_surface_resistance_matches_log_profile() {
        let desc = SurfaceDescription::reference(ReferenceSurface::SaturatedSoil, 0.0005);
        let ra = compute_resistance(&desc, 3.0, 10.0).unwrap();
        let expected = (10.0_f64 / 0.001).ln().powi(2) / (0.4 * 0.4 * 3.0);
        assert_relative_eq!(ra.surface, expected, max_relative = 1e-12);
        assert!(ra.overstory.is_none());
    }

    #[test]
    fn test_resistance_decreases_with_wind() {
        let desc = SurfaceDescription::reference(ReferenceSurface::ShortReference, 0.0005);
        let slow = compute_resistance(&desc, 1.0, 10.0).unwrap();
        let fast = compute_resistance(&desc, 8.0, 10.0).unwrap();
        assert!(fast.surface < slow.surface);
    }

    #[test]
    fn test_zero_wind_is_an_error() {
        let desc = SurfaceDescription::reference(ReferenceSurface::OpenWater, 0.0005);
        let err = compute_resistance(&desc, 0.0, 10.0).unwrap_err();
        assert!(matches!(err, StepError::Resistance(_)));
    }

    #[test]
    fn test_degenerate_roughness_is_an_error() {
        let desc = SurfaceDescription {
            roughness: 0.0,
            displacement: 0.0,
            overstory: false,
            wind_atten: 0.5,
            trunk_ratio: 0.2,
            snow_roughness: 0.0005,
        };
        assert!(compute_resistance(&desc, 3.0, 10.0).is_err());
    }

    #[test]
    fn test_overstory_reports_canopy_resistance() {
        let mut veg = VegParams::short_grass();
        veg.overstory = true;
        veg.displacement = [8.0; 12];
        veg.roughness = [1.2; 12];
        let desc = SurfaceDescription::vegetation(&veg, 0, 0.001, 0.0005);
        let ra = compute_resistance(&desc, 4.0, 10.0).unwrap();
        assert!(ra.overstory.is_some());
        assert!(ra.surface > 0.0);
    }
}
