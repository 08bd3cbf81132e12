//! Shared soil column parameters
//!
//! One `SoilColumn` per grid cell, read by every tile and band and
//! mutated only by the subsidence adjuster between the two runoff
//! passes. Layer capacities, moisture limits, infiltration capacity,
//! and baseflow-curve parameters are all derived quantities that must
//! be recomputed together whenever a layer depth changes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BaseflowMode;
use crate::error::{StepError, StepResult};

/// Parameters of one soil layer, cell-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilLayer {
    /// Layer thickness [m]. Shrinks when the layer subsides.
    pub depth: f64,
    /// Floor below which subsidence can never push the thickness [m].
    pub min_depth: f64,
    /// Natural porosity of the thawed matrix [mm/mm].
    pub porosity: f64,
    /// Porosity including excess ice [mm/mm]; equals `porosity` when the
    /// layer carries none.
    pub effective_porosity: f64,
    /// Mineral particle density [kg/m^3].
    pub soil_density: f64,
    /// Bulk density [kg/m^3]; derived from `effective_porosity`.
    pub bulk_density: f64,
    /// Maximum moisture capacity [mm]; derived from depth and
    /// `effective_porosity`.
    pub max_moist: f64,
    /// Critical-point moisture [mm].
    pub wcr: f64,
    /// Wilting-point moisture [mm].
    pub wpwp: f64,
    /// Critical point as a fraction of `max_moist` (fixed).
    pub wcr_fract: f64,
    /// Wilting point as a fraction of `max_moist` (fixed).
    pub wpwp_fract: f64,
    /// Residual moisture content [mm/mm] (fixed).
    pub resid_moist: f64,
    /// Subsidence applied to this layer in the current step [mm],
    /// recorded for reporting.
    pub subsidence: f64,
}

impl SoilLayer {
    /// Build a layer, deriving capacity, bulk density, and moisture
    /// limits from the primary parameters.
    pub fn new(
        depth: f64,
        min_depth: f64,
        porosity: f64,
        effective_porosity: f64,
        soil_density: f64,
        wcr_fract: f64,
        wpwp_fract: f64,
        resid_moist: f64,
    ) -> Self {
        let max_moist = depth * effective_porosity * 1000.0;
        SoilLayer {
            depth,
            min_depth,
            porosity,
            effective_porosity,
            soil_density,
            bulk_density: (1.0 - effective_porosity) * soil_density,
            max_moist,
            wcr: wcr_fract * max_moist,
            wpwp: wpwp_fract * max_moist,
            wcr_fract,
            wpwp_fract,
            resid_moist,
            subsidence: 0.0,
        }
    }

    /// True when the layer holds ice beyond its natural porosity.
    pub fn has_excess_ice(&self) -> bool {
        self.effective_porosity > self.porosity
    }

    /// Moisture between wilting point and saturation [mm]; the
    /// normalizer of the wetness index.
    pub fn plant_available_capacity(&self) -> f64 {
        self.effective_porosity * self.depth * 1000.0 - self.wpwp
    }
}

/// Nijssen et al. (2001) baseflow parameters, kept so the ARNO form can
/// be re-derived after layer capacities change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NijssenBaseflow {
    /// Linear reservoir coefficient.
    pub ds: f64,
    /// Maximum baseflow velocity [mm/day].
    pub dsmax: f64,
    /// Moisture threshold for nonlinear baseflow [mm].
    pub ws: f64,
}

/// Baseflow-curve parameters for the bottom soil layer (ARNO form),
/// optionally backed by their Nijssen-form originals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaseflowParams {
    /// Fraction of `dsmax` where nonlinear baseflow begins.
    pub ds: f64,
    /// Maximum baseflow [mm/day].
    pub dsmax: f64,
    /// Fraction of maximum moisture where nonlinear baseflow begins.
    pub ws: f64,
    /// Exponent of the nonlinear branch.
    pub c: f64,
    /// Nijssen-form originals when that parameterization is primary.
    pub nijssen: Option<NijssenBaseflow>,
}

/// Cell-wide soil column shared by all tiles and bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilColumn {
    /// Soil layers, surface first.
    pub layers: Vec<SoilLayer>,
    /// Thermal damping depth [m]. Shrinks with total subsidence.
    pub dp: f64,
    /// Variable infiltration curve shape parameter.
    pub b_infilt: f64,
    /// Maximum infiltration capacity [mm]; derived from the top layers.
    pub max_infil: f64,
    /// Baseflow parameters for the bottom layer.
    pub baseflow: BaseflowParams,
    /// Bare soil roughness length [m].
    pub rough: f64,
    /// Snow surface roughness length [m].
    pub snow_rough: f64,
    /// Area weight of each frost subarea (sums to 1; `[1.0]` when
    /// spatial frost is off).
    pub frost_fract: Vec<f64>,
    /// Thermal node depths below the surface [m].
    pub node_depth: Vec<f64>,
}

impl SoilColumn {
    /// Assemble a column and derive infiltration capacity and thermal
    /// node placement.
    pub fn new(
        layers: Vec<SoilLayer>,
        dp: f64,
        b_infilt: f64,
        baseflow: BaseflowParams,
        rough: f64,
        snow_rough: f64,
        frost_fract: Vec<f64>,
        n_nodes: usize,
    ) -> Self {
        let mut soil = SoilColumn {
            layers,
            dp,
            b_infilt,
            max_infil: 0.0,
            baseflow,
            rough,
            snow_rough,
            frost_fract,
            node_depth: Vec::new(),
        };
        soil.recompute_max_infiltration();
        soil.recompute_node_depths(n_nodes);
        soil
    }

    /// Maximum infiltration capacity from the top layer (two-layer
    /// columns) or the top two layers (deeper columns).
    pub fn recompute_max_infiltration(&mut self) {
        let top = self.layers[0].max_moist;
        self.max_infil = if self.layers.len() <= 2 {
            (1.0 + self.b_infilt) * top
        } else {
            (1.0 + self.b_infilt) * (top + self.layers[1].max_moist)
        };
    }

    /// Critical- and wilting-point moisture from their fixed fractions of
    /// the (possibly changed) layer capacities.
    ///
    /// The ordering `residual <= wilting point <= critical point` is a
    /// configuration-time invariant; violating it here is fatal.
    pub fn recompute_moisture_limits(&mut self) -> StepResult<()> {
        for (lidx, layer) in self.layers.iter_mut().enumerate() {
            layer.wcr = layer.wcr_fract * layer.max_moist;
            layer.wpwp = layer.wpwp_fract * layer.max_moist;
            if layer.wpwp > layer.wcr {
                return Err(StepError::SoilInvariant {
                    layer: lidx,
                    message: format!(
                        "wilting point moisture ({:.3} mm) exceeds critical point \
                         moisture ({:.3} mm); wpwp_fract must be <= wcr_fract",
                        layer.wpwp, layer.wcr
                    ),
                });
            }
            let residual = layer.resid_moist * layer.depth * 1000.0;
            if layer.wpwp < residual {
                return Err(StepError::SoilInvariant {
                    layer: lidx,
                    message: format!(
                        "wilting point moisture ({:.3} mm) is below residual \
                         moisture ({:.3} mm)",
                        layer.wpwp, residual
                    ),
                });
            }
        }
        Ok(())
    }

    /// Re-derive the ARNO baseflow parameters from their Nijssen-form
    /// originals and the bottom layer's current capacity.
    ///
    /// No-op unless the run uses the Nijssen parameterization.
    pub fn reconvert_baseflow(&mut self, mode: BaseflowMode) {
        if mode != BaseflowMode::Nijssen2001 {
            return;
        }
        let Some(orig) = self.baseflow.nijssen else {
            return;
        };
        let bottom_max = self.layers[self.layers.len() - 1].max_moist;
        let c = self.baseflow.c;
        self.baseflow.dsmax =
            orig.dsmax * (1.0 / (bottom_max - orig.ws)).powf(-c) + orig.ds * bottom_max;
        self.baseflow.ds = orig.ds * orig.ws / orig.dsmax;
        self.baseflow.ws = orig.ws / bottom_max;
        debug!(
            ds = self.baseflow.ds,
            dsmax = self.baseflow.dsmax,
            ws = self.baseflow.ws,
            "reconverted baseflow parameters to ARNO form"
        );
    }

    /// Place thermal nodes: one at the surface, the rest evenly through
    /// the damping depth.
    pub fn recompute_node_depths(&mut self, n_nodes: usize) {
        self.node_depth.clear();
        if n_nodes == 0 {
            return;
        }
        if n_nodes == 1 {
            self.node_depth.push(0.0);
            return;
        }
        let spacing = self.dp / (n_nodes as f64 - 1.0);
        for i in 0..n_nodes {
            self.node_depth.push(spacing * i as f64);
        }
    }

    /// Total thickness of the column [m].
    pub fn total_depth(&self) -> f64 {
        self.layers.iter().map(|l| l.depth).sum()
    }
}

/// A typical three-layer silt-loam column used by tests and examples.
pub fn default_column(n_nodes: usize) -> SoilColumn {
    let layers = vec![
        SoilLayer::new(0.1, 0.05, 0.45, 0.45, 2685.0, 0.7, 0.4, 0.05),
        SoilLayer::new(0.5, 0.1, 0.45, 0.45, 2685.0, 0.7, 0.4, 0.05),
        SoilLayer::new(1.0, 0.1, 0.43, 0.43, 2685.0, 0.7, 0.4, 0.05),
    ];
    let baseflow = BaseflowParams {
        ds: 0.02,
        dsmax: 10.0,
        ws: 0.8,
        c: 2.0,
        nijssen: None,
    };
    SoilColumn::new(
        layers,
        4.0,
        0.3,
        baseflow,
        0.001,
        0.0005,
        vec![1.0],
        n_nodes,
    )
}
