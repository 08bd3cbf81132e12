//! Lake geometry and state
//!
//! A lake basin is described by a depth-area profile (deepest node
//! first-to-shallowest by increasing area). Stage and surface area are
//! derived from stored volume by integrating the profile, so volume is
//! the prognostic variable and depth is always consistent with it.

use serde::{Deserialize, Serialize};

use crate::error::{StepError, StepResult};
use crate::state::{EnergyState, SnowState};

/// One node of the depth-area basin profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasinNode {
    /// Depth above the lake bottom [m].
    pub depth: f64,
    /// Surface area at this depth [m2].
    pub area: f64,
}

/// Static lake parameters for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeParams {
    /// Depth-area profile, ordered by increasing depth from the bottom.
    pub profile: Vec<BasinNode>,
    /// Fraction of cell runoff and baseflow routed into the lake.
    pub rpercent: f64,
    /// Fraction of the lake tile occupied by open water when full.
    pub area_fract: f64,
    /// Grid cell area [m2].
    pub cell_area: f64,
}

impl LakeParams {
    /// Basin depth when full [m].
    pub fn max_depth(&self) -> f64 {
        self.profile.last().map_or(0.0, |node| node.depth)
    }

    /// Surface area when full [m2].
    pub fn max_area(&self) -> f64 {
        self.profile.last().map_or(0.0, |node| node.area)
    }

    /// Basin capacity [m3], integrating the profile by trapezoids.
    pub fn max_volume(&self) -> f64 {
        self.profile
            .windows(2)
            .map(|pair| {
                let dz = pair[1].depth - pair[0].depth;
                0.5 * (pair[0].area + pair[1].area) * dz
            })
            .sum()
    }

    /// Invert the volume-depth relation. Within each profile segment the
    /// area varies linearly with depth, so the stored volume is a
    /// quadratic in the stage above the segment base.
    pub fn depth_from_volume(&self, volume: f64) -> StepResult<f64> {
        if volume < 0.0 {
            return Err(StepError::StageInversion { volume, depth: 0.0 });
        }
        if self.profile.len() < 2 {
            return Err(StepError::Lake(
                "basin profile needs at least two nodes".to_string(),
            ));
        }
        if volume == 0.0 {
            return Ok(0.0);
        }

        let mut remaining = volume;
        for pair in self.profile.windows(2) {
            let dz = pair[1].depth - pair[0].depth;
            let segment_volume = 0.5 * (pair[0].area + pair[1].area) * dz;
            if remaining > segment_volume {
                remaining -= segment_volume;
                continue;
            }
            let a0 = pair[0].area;
            let slope = (pair[1].area - pair[0].area) / dz;
            let x = if slope.abs() < 1e-12 {
                remaining / a0
            } else {
                ((a0 * a0 + 2.0 * slope * remaining).max(0.0).sqrt() - a0) / slope
            };
            return Ok(pair[0].depth + x.clamp(0.0, dz));
        }

        Err(StepError::StageInversion {
            volume,
            depth: self.max_depth(),
        })
    }

    /// Surface area at a given stage [m2], interpolated on the profile.
    pub fn area_from_depth(&self, depth: f64) -> StepResult<f64> {
        if depth < 0.0 || depth > self.max_depth() {
            return Err(StepError::Lake(format!(
                "stage {depth} m is outside the basin profile"
            )));
        }
        for pair in self.profile.windows(2) {
            if depth <= pair[1].depth {
                let dz = pair[1].depth - pair[0].depth;
                let fract = if dz > 0.0 {
                    (depth - pair[0].depth) / dz
                } else {
                    0.0
                };
                return Ok(pair[0].area + fract * (pair[1].area - pair[0].area));
            }
        }
        Ok(self.max_area())
    }
}

/// Prognostic lake state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lake {
    /// Stored water volume [m3].
    pub volume: f64,
    /// Stage above the lake bottom [m].
    pub depth: f64,
    /// Open-water surface area [m2].
    pub sarea: f64,
    /// Ice-covered area [m2].
    pub ice_area: f64,
    /// Ice area formed this step, carried into the next step's cover.
    pub new_ice_area: f64,
    /// Runoff routed into the lake this step [m3].
    pub runoff_in: f64,
    /// Baseflow routed into the lake this step [m3].
    pub baseflow_in: f64,
    /// Spill released as runoff this step [m3].
    pub runoff_out: f64,
    /// Seepage released as baseflow this step [m3].
    pub baseflow_out: f64,
    /// Open-water evaporation this step [mm].
    pub evap: f64,
    /// Mixed-layer temperature [C].
    pub surf_temp: f64,
    /// Snow on the lake ice.
    pub snow: SnowState,
    /// Lake surface energy balance.
    pub energy: EnergyState,
}

impl Lake {
    pub fn with_volume(volume: f64, n_nodes: usize) -> Self {
        Lake {
            volume,
            depth: 0.0,
            sarea: 0.0,
            ice_area: 0.0,
            new_ice_area: 0.0,
            runoff_in: 0.0,
            baseflow_in: 0.0,
            runoff_out: 0.0,
            baseflow_out: 0.0,
            evap: 0.0,
            surf_temp: 4.0,
            snow: SnowState::default(),
            energy: EnergyState::new(n_nodes),
        }
    }

    /// Fraction of the lake surface under ice.
    pub fn ice_fraction(&self) -> f64 {
        if self.sarea <= 0.0 {
            return 0.0;
        }
        (self.ice_area / self.sarea).clamp(0.0, 1.0)
    }
}

/// Lake parameters plus state, stored on the grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeSystem {
    pub params: LakeParams,
    pub state: Lake,
}
