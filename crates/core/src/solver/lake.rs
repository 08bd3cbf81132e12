//! Lake energy and water balance
//!
//! The mixed layer relaxes toward the air temperature; ice forms while
//! the relaxed temperature sits below freezing and the cover fraction
//! formed in one step carries into the next. The water balance adds
//! precipitation and routed inflow, removes open-water evaporation,
//! and spills anything above the basin capacity as runoff.

use crate::error::StepResult;
use crate::lake::{Lake, LakeParams};
use crate::solver::{LakeSolver, LakeStepInputs};
use crate::state::VegetationTile;

/// Mixed-layer relaxation rate toward air temperature [1/day].
const SURFACE_RELAX: f64 = 0.1;

/// Ice cover growth rate per degree of supercooling [1/(C day)].
const ICE_GROWTH: f64 = 0.02;

/// Ratio of molecular weights of water vapor and dry air.
const EPS: f64 = 0.622;

const SECONDS_PER_HOUR: f64 = 3600.0;
const HOURS_PER_DAY: f64 = 24.0;

pub struct LakeBalance;

impl LakeSolver for LakeBalance {
    fn solve_energy(
        &self,
        inputs: &LakeStepInputs<'_>,
        _params: &LakeParams,
        lake: &mut Lake,
    ) -> StepResult<()> {
        let forcing = inputs.forcing;
        let dt_days = inputs.config.dt / HOURS_PER_DAY;

        lake.surf_temp +=
            (forcing.air_temp - lake.surf_temp) * (SURFACE_RELAX * dt_days).min(1.0);

        if lake.surf_temp < 0.0 {
            let growth = (ICE_GROWTH * -lake.surf_temp * dt_days).min(1.0);
            lake.new_ice_area =
                (lake.ice_area + growth * (lake.sarea - lake.ice_area).max(0.0)).min(lake.sarea);
            lake.surf_temp = 0.0;
            // Snow landing on the ice stays on the pack.
            lake.snow.swq += inputs.snowfall * lake.ice_fraction();
        } else {
            // Warm water melts the cover before warming further.
            let decay = (SURFACE_RELAX * lake.surf_temp * dt_days).min(1.0);
            lake.new_ice_area = lake.ice_area * (1.0 - decay);
            if lake.new_ice_area <= 0.0 {
                lake.snow.swq = 0.0;
            }
        }
        lake.energy.surf_temp = lake.surf_temp;
        Ok(())
    }

    fn solve_water(
        &self,
        inputs: &LakeStepInputs<'_>,
        params: &LakeParams,
        lake: &mut Lake,
    ) -> StepResult<()> {
        let forcing = inputs.forcing;
        let open_area = lake.sarea * (1.0 - inputs.ice_fraction);

        // Open-water aerodynamic evaporation.
        let evap_flux = if forcing.pressure > 0.0 {
            forcing.density * EPS * forcing.vpd / (forcing.pressure * 80.0)
        } else {
            0.0
        };
        lake.evap = (evap_flux * inputs.config.dt * SECONDS_PER_HOUR).max(0.0);

        let precip_volume =
            (inputs.rainfall + inputs.snowfall) / 1000.0 * lake.sarea.max(params.max_area() * 0.01);
        let evap_volume = lake.evap / 1000.0 * open_area;
        let melt_volume =
            inputs.meltwater / 1000.0 * params.area_fract * params.cell_area * inputs.lakefrac;

        lake.volume = inputs.old_volume + precip_volume + lake.runoff_in + lake.baseflow_in
            + melt_volume
            - evap_volume;
        lake.volume = lake.volume.max(0.0);

        lake.runoff_out = (lake.volume - params.max_volume()).max(0.0);
        lake.volume -= lake.runoff_out;
        lake.baseflow_out = 0.0;

        lake.depth = params.depth_from_volume(lake.volume)?;
        lake.sarea = params.area_from_depth(lake.depth)?;
        lake.ice_area = lake.new_ice_area.min(lake.sarea);

        // SWE continuity against the pre-step pack.
        if lake.snow.swq < inputs.old_swq {
            lake.snow.melt = inputs.old_swq - lake.snow.swq;
        }
        Ok(())
    }

    fn redistribute(
        &self,
        _params: &LakeParams,
        lake: &Lake,
        lakefrac: f64,
        soil: &crate::soil::SoilColumn,
        tile: &mut VegetationTile,
    ) {
        let band = &mut tile.bands[0];
        // The flooded part of the tile holds a saturated top layer and
        // shares the lake's pack and surface temperature.
        let top_max = soil.layers[0].max_moist;
        band.wet.layers[0].moist =
            band.wet.layers[0].moist * (1.0 - lakefrac) + top_max * lakefrac;
        band.snow.swq = band.snow.swq * (1.0 - lakefrac) + lake.snow.swq * lakefrac;
        band.energy.surf_temp =
            band.energy.surf_temp * (1.0 - lakefrac) + lake.surf_temp * lakefrac;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::forcing::AtmosForcing;
    use crate::lake::BasinNode;
    use crate::soil::default_column;
    use crate::veg::VegParams;
    use approx::assert_relative_eq;

    fn v_basin() -> LakeParams {
        LakeParams {
            profile: vec![
                BasinNode {
                    depth: 0.0,
                    area: 0.0,
                },
                BasinNode {
                    depth: 10.0,
                    area: 1.0e6,
                },
            ],
            rpercent: 0.5,
            area_fract: 0.2,
            cell_area: 5.0e6,
        }
    }

    fn forcing(air_temp: f64) -> AtmosForcing {
        AtmosForcing {
            air_temp,
            prec: 0.0,
            wind: 3.0,
            shortwave: 150.0,
            longwave: 300.0,
            vp: 800.0,
            vpd: 300.0,
            pressure: 95_000.0,
            density: 1.2,
        }
    }

    fn inputs<'a>(
        config: &'a ModelConfig,
        forcing: &'a AtmosForcing,
        soil: &'a crate::soil::SoilColumn,
        old_volume: f64,
    ) -> LakeStepInputs<'a> {
        LakeStepInputs {
            config,
            forcing,
            soil,
            rainfall: 0.0,
            snowfall: 0.0,
            lakefrac: 0.5,
            ice_fraction: 0.0,
            old_volume,
            old_swq: 0.0,
            meltwater: 0.0,
        }
    }

    #[test]
    fn test_cold_air_grows_ice() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let forcing = forcing(-20.0);
        let params = v_basin();
        let mut lake = Lake::with_volume(1.0e6, config.n_nodes);
        lake.sarea = 4.0e5;
        lake.surf_temp = 0.5;
        let step = inputs(&config, &forcing, &soil, lake.volume);

        LakeBalance.solve_energy(&step, &params, &mut lake).unwrap();
        assert!(lake.new_ice_area > 0.0);
        assert_relative_eq!(lake.surf_temp, 0.0);
    }

    #[test]
    fn test_warm_air_melts_ice_cover() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let forcing = forcing(15.0);
        let params = v_basin();
        let mut lake = Lake::with_volume(1.0e6, config.n_nodes);
        lake.sarea = 4.0e5;
        lake.ice_area = 2.0e5;
        lake.surf_temp = 2.0;
        let step = inputs(&config, &forcing, &soil, lake.volume);

        LakeBalance.solve_energy(&step, &params, &mut lake).unwrap();
        assert!(lake.new_ice_area < 2.0e5);
    }

    #[test]
    fn test_spill_above_capacity() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let forcing = forcing(10.0);
        let params = v_basin();
        let capacity = params.max_volume();
        let mut lake = Lake::with_volume(capacity, config.n_nodes);
        lake.sarea = params.max_area();
        lake.runoff_in = 2.0e5;
        let step = inputs(&config, &forcing, &soil, capacity);

        LakeBalance.solve_water(&step, &params, &mut lake).unwrap();
        assert!(lake.runoff_out > 0.0);
        assert!(lake.volume <= capacity + 1e-6);
        assert_relative_eq!(lake.depth, 10.0, max_relative = 1e-6);
    }

    #[test]
    fn test_stage_tracks_volume() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let forcing = forcing(10.0);
        let params = v_basin();
        let mut lake = Lake::with_volume(1.25e6, config.n_nodes);
        lake.sarea = params.area_from_depth(5.0).unwrap();
        let step = inputs(&config, &forcing, &soil, lake.volume);

        LakeBalance.solve_water(&step, &params, &mut lake).unwrap();
        assert!(lake.depth > 0.0 && lake.depth < 10.0);
        assert_relative_eq!(
            lake.sarea,
            params.area_from_depth(lake.depth).unwrap(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_redistribute_saturates_flooded_fraction() {
        let config = ModelConfig::water_balance();
        let soil = default_column(config.n_nodes);
        let params = v_basin();
        let mut lake = Lake::with_volume(1.0e6, config.n_nodes);
        lake.surf_temp = 4.0;
        let mut tile = VegetationTile::new(0.3, VegParams::bare_soil(), &soil, 1, 1, 5, 5);
        tile.is_lake = true;

        LakeBalance.redistribute(&params, &lake, 1.0, &soil, &mut tile);
        assert_relative_eq!(
            tile.bands[0].wet.layers[0].moist,
            soil.layers[0].max_moist,
            max_relative = 1e-12
        );
        assert_relative_eq!(tile.bands[0].energy.surf_temp, 4.0);
    }
}
