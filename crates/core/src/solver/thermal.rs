//! Thermal node update after a soil geometry change
//!
//! When subsidence shortens the column the node depths are recomputed,
//! so the stored temperature profile no longer sits on its nodes. This
//! solver re-anchors the profile: the surface node keeps the band's
//! surface temperature, the deepest node keeps its damping-depth
//! temperature, and interior nodes are interpolated linearly along the
//! new depths.

use crate::config::ModelConfig;
use crate::error::{StepError, StepResult};
use crate::solver::ThermalSolver;
use crate::soil::SoilColumn;
use crate::state::VegetationTile;

pub struct NodeInterpolation;

impl ThermalSolver for NodeInterpolation {
    fn update_nodes(
        &self,
        config: &ModelConfig,
        soil: &SoilColumn,
        tiles: &mut [VegetationTile],
    ) -> StepResult<()> {
        if soil.node_depth.len() != config.n_nodes {
            return Err(StepError::Thermal(format!(
                "expected {} node depths, found {}",
                config.n_nodes,
                soil.node_depth.len()
            )));
        }
        let bottom_depth = soil.node_depth.last().copied().unwrap_or(0.0);

        for tile in &mut *tiles {
            for band in &mut tile.bands {
                let temps = &mut band.energy.node_temps;
                if temps.len() != config.n_nodes {
                    return Err(StepError::Thermal(format!(
                        "expected {} node temperatures, found {}",
                        config.n_nodes,
                        temps.len()
                    )));
                }
                let top = band.energy.surf_temp;
                let bottom = temps.last().copied().unwrap_or(top);
                for (temp, &depth) in temps.iter_mut().zip(&soil.node_depth) {
                    let fract = if bottom_depth > 0.0 {
                        (depth / bottom_depth).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    *temp = top + (bottom - top) * fract;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soil::default_column;
    use crate::veg::VegParams;
    use approx::assert_relative_eq;

    #[test]
    fn test_profile_spans_surface_to_bottom() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let mut tiles = vec![VegetationTile::new(
            1.0,
            VegParams::short_grass(),
            &soil,
            1,
            1,
            5,
            config.n_nodes,
        )];
        tiles[0].bands[0].energy.surf_temp = 10.0;
        *tiles[0].bands[0].energy.node_temps.last_mut().unwrap() = 2.0;

        NodeInterpolation
            .update_nodes(&config, &soil, &mut tiles)
            .unwrap();
        let temps = &tiles[0].bands[0].energy.node_temps;
        assert_relative_eq!(temps[0], 10.0);
        assert_relative_eq!(temps[config.n_nodes - 1], 2.0);
        // Monotone between the anchors.
        for pair in temps.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn test_node_count_mismatch_is_an_error() {
        let config = ModelConfig::water_balance();
        let mut soil = default_column(config.n_nodes);
        soil.node_depth.pop();
        let mut tiles = vec![VegetationTile::new(
            1.0,
            VegParams::bare_soil(),
            &soil,
            1,
            1,
            5,
            config.n_nodes,
        )];
        assert!(NodeInterpolation
            .update_nodes(&config, &soil, &mut tiles)
            .is_err());
    }
}
