//! Vegetation cover parameters
//!
//! Monthly canopy tables (leaf area, albedo, roughness, displacement)
//! and the root-zone description from which per-layer root fractions
//! are derived. Root fractions depend on layer depths, so they are
//! recomputed whenever the soil column subsides.

use serde::{Deserialize, Serialize};

use crate::soil::SoilLayer;

/// A rooting zone: a depth interval below the surface holding a fixed
/// share of the roots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootZone {
    /// Zone thickness [m].
    pub depth: f64,
    /// Fraction of total roots in the zone.
    pub fract: f64,
}

/// Canopy and rooting parameters of one vegetation cover type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegParams {
    /// Leaf area index per month [m^2/m^2].
    pub lai: [f64; 12],
    /// Snow-free albedo per month.
    pub albedo: [f64; 12],
    /// Roughness length per month [m].
    pub roughness: [f64; 12],
    /// Displacement height per month [m].
    pub displacement: [f64; 12],
    /// Shortwave extinction coefficient of the canopy.
    pub rad_atten: f64,
    /// Within-canopy wind attenuation coefficient.
    pub wind_atten: f64,
    /// Fraction of canopy height occupied by trunks.
    pub trunk_ratio: f64,
    /// Whether the canopy closes above the snow surface.
    pub overstory: bool,
    /// Wind measurement height above this cover [m].
    pub wind_h: f64,
    /// Rooting zones, surface first.
    pub root_zones: Vec<RootZone>,
}

impl VegParams {
    /// Bare soil: no canopy, all roots (none, effectively) at the surface.
    pub fn bare_soil() -> Self {
        VegParams {
            lai: [0.0; 12],
            albedo: [0.2; 12],
            roughness: [0.001; 12],
            displacement: [0.0; 12],
            rad_atten: 0.5,
            wind_atten: 0.5,
            trunk_ratio: 0.2,
            overstory: false,
            wind_h: 10.0,
            root_zones: vec![RootZone {
                depth: 0.1,
                fract: 1.0,
            }],
        }
    }

    /// A short grass cover with a shallow root profile.
    pub fn short_grass() -> Self {
        VegParams {
            lai: [2.0; 12],
            albedo: [0.2; 12],
            roughness: [0.01; 12],
            displacement: [0.05; 12],
            rad_atten: 0.5,
            wind_atten: 0.5,
            trunk_ratio: 0.2,
            overstory: false,
            wind_h: 10.0,
            root_zones: vec![
                RootZone {
                    depth: 0.3,
                    fract: 0.7,
                },
                RootZone {
                    depth: 0.7,
                    fract: 0.3,
                },
            ],
        }
    }

    /// Canopy shortwave attenuation for `month_index` (0..12):
    /// `exp(-rad_atten * LAI)`.
    pub fn surface_attenuation(&self, month_index: usize) -> f64 {
        (-self.rad_atten * self.lai[month_index]).exp()
    }
}

/// Distribute rooting-zone fractions over soil layers by depth overlap.
///
/// Each zone's share is split across the layers it intersects in
/// proportion to the intersected thickness; roots below the column
/// bottom are assigned to the bottom layer. The result is normalized to
/// sum to 1 when any roots exist.
pub fn calc_root_fractions(zones: &[RootZone], layers: &[SoilLayer]) -> Vec<f64> {
    let mut root = vec![0.0; layers.len()];
    if layers.is_empty() {
        return root;
    }

    // Layer bottom depths, cumulative from the surface.
    let mut layer_bottom = Vec::with_capacity(layers.len());
    let mut depth = 0.0;
    for layer in layers {
        depth += layer.depth;
        layer_bottom.push(depth);
    }
    let column_bottom = depth;

    let mut zone_top = 0.0;
    for zone in zones {
        let zone_bottom = zone_top + zone.depth;
        if zone.depth <= 0.0 || zone.fract <= 0.0 {
            zone_top = zone_bottom;
            continue;
        }
        let per_meter = zone.fract / zone.depth;

        let mut layer_top: f64 = 0.0;
        for (lidx, &bottom) in layer_bottom.iter().enumerate() {
            let overlap = (bottom.min(zone_bottom) - layer_top.max(zone_top)).max(0.0);
            root[lidx] += per_meter * overlap;
            layer_top = bottom;
        }
        // Roots deeper than the column end up in the bottom layer.
        if zone_bottom > column_bottom {
            let overhang = zone_bottom - column_bottom.max(zone_top);
            if overhang > 0.0 {
                let last = root.len() - 1;
                root[last] += per_meter * overhang;
            }
        }
        zone_top = zone_bottom;
    }

    let total: f64 = root.iter().sum();
    if total > 0.0 {
        for r in &mut root {
            *r /= total;
        }
    }
    root
}
