//! Variable infiltration runoff solver
//!
//! Surface runoff follows the variable infiltration capacity curve:
//! the saturated fraction of the band grows with the wetness of the
//! upper soil, so part of the surface inflow runs off before the
//! column saturates. Drainage cascades moisture held above the
//! drainage threshold downward, and baseflow leaves the bottom layer
//! on the ARNO recession curve.

use crate::error::{StepError, StepResult};
use crate::solver::{FluxInputs, RunoffSolver};
use crate::state::{BandState, CellState};

const HOURS_PER_DAY: f64 = 24.0;

pub struct VariableInfiltration;

impl VariableInfiltration {
    /// Surface runoff from the infiltration capacity curve. `moist`
    /// and `max_moist` cover the layers that set the infiltration
    /// capacity (the top one or two).
    fn surface_runoff(inflow: f64, moist: f64, max_moist: f64, b: f64, max_infil: f64) -> f64 {
        if inflow <= 0.0 || max_moist <= 0.0 || max_infil <= 0.0 {
            return 0.0;
        }
        let saturation = (moist / max_moist).clamp(0.0, 1.0);
        let i0 = max_infil * (1.0 - (1.0 - saturation).powf(1.0 / (1.0 + b)));
        let runoff = if i0 + inflow > max_infil {
            inflow - (max_moist - moist)
        } else {
            inflow - (max_moist - moist)
                + max_moist * (1.0 - (i0 + inflow) / max_infil).powf(1.0 + b)
        };
        runoff.clamp(0.0, inflow)
    }

    /// ARNO baseflow from the bottom layer [mm per step].
    fn baseflow(inputs: &FluxInputs<'_>, bottom_moist: f64) -> f64 {
        let soil = inputs.soil;
        let Some(bottom) = soil.layers.last() else {
            return 0.0;
        };
        let resid = bottom.resid_moist * bottom.depth * 1000.0;
        let span = bottom.max_moist - resid;
        if span <= 0.0 {
            return 0.0;
        }
        let rel = ((bottom_moist - resid) / span).clamp(0.0, 1.0);
        let params = &soil.baseflow;
        let mut flow = params.ds * params.dsmax / params.ws * rel;
        if rel > params.ws {
            flow += params.dsmax
                * (1.0 - params.ds / params.ws)
                * ((rel - params.ws) / (1.0 - params.ws)).powf(params.c);
        }
        flow * inputs.config.dt / HOURS_PER_DAY
    }

    fn solve_branch(
        inputs: &FluxInputs<'_>,
        tile_idx: usize,
        band_idx: usize,
        branch: &mut CellState,
    ) -> StepResult<()> {
        let soil = inputs.soil;
        let n_top = soil.layers.len().min(2);

        // Evaporation set by the surface solve comes out first.
        for (layer, soil_layer) in branch.layers.iter_mut().zip(&soil.layers) {
            layer.moist = (layer.moist - layer.evap).max(
                soil_layer.resid_moist * soil_layer.depth * 1000.0,
            );
        }

        let top_moist: f64 = branch.layers[..n_top]
            .iter()
            .map(|layer| layer.moist + layer.weighted_ice(&soil.frost_fract))
            .sum();
        let top_max: f64 = soil.layers[..n_top].iter().map(|l| l.max_moist).sum();

        let mut runoff = Self::surface_runoff(
            branch.inflow,
            top_moist,
            top_max,
            soil.b_infilt,
            soil.max_infil,
        );
        let mut infiltration = branch.inflow - runoff;

        // Fill layers from the top, cascading drainage above the
        // critical point and any saturation excess downward.
        let n_layers = branch.layers.len();
        for idx in 0..n_layers {
            let soil_layer = &soil.layers[idx];
            branch.layers[idx].moist += infiltration;
            infiltration = 0.0;
            if idx + 1 < n_layers {
                let drain = (branch.layers[idx].moist - soil_layer.wcr).max(0.0);
                branch.layers[idx].moist -= drain;
                infiltration = drain;
            }
            let excess = (branch.layers[idx].moist - soil_layer.max_moist).max(0.0);
            branch.layers[idx].moist -= excess;
            if idx + 1 < n_layers {
                infiltration += excess;
            } else {
                runoff += excess;
            }
        }

        let bottom_idx = n_layers - 1;
        let baseflow = Self::baseflow(inputs, branch.layers[bottom_idx].moist)
            .min(branch.layers[bottom_idx].moist);
        branch.layers[bottom_idx].moist -= baseflow;

        if !runoff.is_finite() || !baseflow.is_finite() {
            return Err(StepError::Runoff {
                tile: tile_idx,
                band: band_idx,
                message: format!("non-finite fluxes: runoff {runoff}, baseflow {baseflow}"),
            });
        }
        branch.runoff = runoff;
        branch.baseflow = baseflow;
        Ok(())
    }
}

impl RunoffSolver for VariableInfiltration {
    fn solve(
        &self,
        inputs: &FluxInputs<'_>,
        tile_idx: usize,
        band_idx: usize,
        mu: f64,
        band: &mut BandState,
    ) -> StepResult<()> {
        Self::solve_branch(inputs, tile_idx, band_idx, &mut band.wet)?;
        if mu < 1.0 {
            Self::solve_branch(inputs, tile_idx, band_idx, &mut band.dry)?;
        } else {
            band.dry.runoff = 0.0;
            band.dry.baseflow = 0.0;
        }
        Ok(())
    }
}
