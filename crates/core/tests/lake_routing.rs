//! Routing of land outflow into the lake and the coverage discount of
//! the flooded wetland tile.

use approx::assert_relative_eq;
use landflux_core::error::StepResult;
use landflux_core::lake::{BasinNode, Lake, LakeParams, LakeSystem};
use landflux_core::soil::{default_column, SoilColumn};
use landflux_core::solver::{
    BandFluxes, FluxInputs, LakeSolver, LakeStepInputs, RunoffSolver, Solvers, SurfaceFluxSolver,
    ThermalSolver, TileContext, TopLayerThermal,
};
use landflux_core::state::{BandState, VegetationTile};
use landflux_core::veg::VegParams;
use landflux_core::{
    advance_cell, AtmosForcing, BandParams, GridCell, ModelConfig, StepTime,
};

struct DrySurface;

impl SurfaceFluxSolver for DrySurface {
    fn solve_band(
        &self,
        _inputs: &FluxInputs<'_>,
        _tile: &TileContext<'_>,
        _band_idx: usize,
        _prec_factor: f64,
        _thermal: Option<TopLayerThermal>,
        band: &mut BandState,
    ) -> StepResult<BandFluxes> {
        Ok(BandFluxes {
            layer_evap_wet: vec![0.0; band.wet.layers.len()],
            layer_evap_dry: vec![0.0; band.dry.layers.len()],
            ..BandFluxes::default()
        })
    }
}

struct FixedRunoff(f64);

impl RunoffSolver for FixedRunoff {
    fn solve(
        &self,
        _inputs: &FluxInputs<'_>,
        _tile_idx: usize,
        _band_idx: usize,
        _mu: f64,
        band: &mut BandState,
    ) -> StepResult<()> {
        band.wet.runoff = self.0;
        band.wet.baseflow = 0.0;
        band.dry.runoff = 0.0;
        band.dry.baseflow = 0.0;
        Ok(())
    }
}

/// Keeps the lake untouched so the routed inflow can be inspected.
struct NoopLake;

impl LakeSolver for NoopLake {
    fn solve_energy(
        &self,
        _inputs: &LakeStepInputs<'_>,
        _params: &LakeParams,
        _lake: &mut Lake,
    ) -> StepResult<()> {
        Ok(())
    }

    fn solve_water(
        &self,
        _inputs: &LakeStepInputs<'_>,
        _params: &LakeParams,
        _lake: &mut Lake,
    ) -> StepResult<()> {
        Ok(())
    }

    fn redistribute(
        &self,
        _params: &LakeParams,
        _lake: &Lake,
        _lakefrac: f64,
        _soil: &SoilColumn,
        _tile: &mut VegetationTile,
    ) {
    }
}

struct NoopThermal;

impl ThermalSolver for NoopThermal {
    fn update_nodes(
        &self,
        _config: &ModelConfig,
        _soil: &SoilColumn,
        _tiles: &mut [VegetationTile],
    ) -> StepResult<()> {
        Ok(())
    }
}

fn forcing() -> AtmosForcing {
    AtmosForcing {
        air_temp: 12.0,
        prec: 0.0,
        wind: 3.0,
        shortwave: 200.0,
        longwave: 300.0,
        vp: 800.0,
        vpd: 400.0,
        pressure: 95_000.0,
        density: 1.2,
    }
}

fn june() -> StepTime {
    StepTime {
        year: 1999,
        month: 6,
        day: 15,
        hour: 0,
    }
}

/// Land tile (0.7) plus a wetland tile (0.3) whose lake floods half of
/// the wetland: a V basin holding 3.75e5 m3 sits at 5 m stage with
/// 1.5e5 m2 of open water against a 3e5 m2 tile.
fn lake_cell(config: &ModelConfig) -> GridCell {
    let soil = default_column(config.n_nodes);
    let land = VegetationTile::new(
        0.7,
        VegParams::short_grass(),
        &soil,
        1,
        1,
        landflux_core::aero::N_REF_SURFACES + 1,
        config.n_nodes,
    );
    let mut wetland = VegetationTile::new(
        0.3,
        VegParams::bare_soil(),
        &soil,
        1,
        1,
        landflux_core::aero::N_REF_SURFACES + 1,
        config.n_nodes,
    );
    wetland.is_lake = true;

    let params = LakeParams {
        profile: vec![
            BasinNode {
                depth: 0.0,
                area: 0.0,
            },
            BasinNode {
                depth: 10.0,
                area: 3.0e5,
            },
        ],
        rpercent: 0.5,
        area_fract: 0.3,
        cell_area: 1.0e6,
    };
    let state = Lake::with_volume(3.75e5, config.n_nodes);

    GridCell {
        tiles: vec![land, wetland],
        soil,
        bands: vec![BandParams {
            area_fract: 1.0,
            prec_factor: 1.0,
        }],
        lake: Some(LakeSystem { params, state }),
    }
}

#[test]
fn test_runoff_routed_by_rpercent() {
    let config = ModelConfig {
        lakes: true,
        ..ModelConfig::water_balance()
    };
    let mut cell = lake_cell(&config);
    let solvers = Solvers {
        surface_flux: &DrySurface,
        runoff: &FixedRunoff(4.0),
        lake: &NoopLake,
        thermal: &NoopThermal,
    };
    let out = advance_cell(&mut cell, &forcing(), &june(), &config, solvers).unwrap();

    let lake = cell.lake.as_ref().unwrap();
    // Stage re-derivation floods half the wetland tile.
    assert_relative_eq!(lake.state.sarea, 1.5e5, max_relative = 1e-9);

    // Land gives rpercent of its runoff, the wetland gives all of its:
    // 4 * 0.5 * 0.7 + 4 * (0.3 * 0.5) = 2.0 mm over the cell, 2000 m3.
    assert_relative_eq!(lake.state.runoff_in, 2000.0, max_relative = 1e-9);

    // What stays on the land is the unrouted half; the wetland keeps
    // nothing.
    assert_relative_eq!(
        cell.tiles[0].bands[0].wet.runoff,
        2.0,
        max_relative = 1e-12
    );
    assert_relative_eq!(cell.tiles[1].bands[0].wet.runoff, 0.0);
    assert_relative_eq!(out.runoff, 1.4, max_relative = 1e-9);
}

#[test]
fn test_lake_precipitation_enters_cell_totals() {
    let config = ModelConfig {
        lakes: true,
        ..ModelConfig::water_balance()
    };
    let mut cell = lake_cell(&config);
    let solvers = Solvers {
        surface_flux: &DrySurface,
        runoff: &FixedRunoff(0.0),
        lake: &NoopLake,
        thermal: &NoopThermal,
    };
    let mut wet_forcing = forcing();
    wet_forcing.prec = 10.0;
    let out = advance_cell(&mut cell, &wet_forcing, &june(), &config, solvers).unwrap();
    // The mock surface passes nothing through on land, so everything in
    // the total fell on the open water: 10 * 0.3 * 0.5.
    assert_relative_eq!(out.prec, 1.5, max_relative = 1e-9);
}

#[test]
fn test_disabled_lakes_leave_an_attached_lake_untouched() {
    // lakes is off in the water-balance defaults.
    let config = ModelConfig::water_balance();
    let mut cell = lake_cell(&config);
    let solvers = Solvers {
        surface_flux: &DrySurface,
        runoff: &FixedRunoff(4.0),
        lake: &NoopLake,
        thermal: &NoopThermal,
    };
    let out = advance_cell(&mut cell, &forcing(), &june(), &config, solvers).unwrap();

    let lake = cell.lake.as_ref().unwrap();
    // No stage re-derivation, no routing, no coverage discount.
    assert_relative_eq!(lake.state.sarea, 0.0);
    assert_relative_eq!(lake.state.runoff_in, 0.0);
    assert_relative_eq!(lake.state.volume, 3.75e5);
    assert_relative_eq!(cell.tiles[0].bands[0].wet.runoff, 4.0);
    assert_relative_eq!(cell.tiles[1].bands[0].wet.runoff, 4.0);
    assert_relative_eq!(out.runoff, 4.0, max_relative = 1e-12);
}

#[test]
fn test_zero_area_lake_is_not_coupled() {
    let config = ModelConfig {
        lakes: true,
        ..ModelConfig::water_balance()
    };
    let mut cell = lake_cell(&config);
    if let Some(system) = cell.lake.as_mut() {
        system.params.area_fract = 0.0;
    }
    let solvers = Solvers {
        surface_flux: &DrySurface,
        runoff: &FixedRunoff(4.0),
        lake: &NoopLake,
        thermal: &NoopThermal,
    };
    advance_cell(&mut cell, &forcing(), &june(), &config, solvers).unwrap();

    let lake = cell.lake.as_ref().unwrap();
    assert_relative_eq!(lake.state.runoff_in, 0.0);
    assert_relative_eq!(cell.tiles[0].bands[0].wet.runoff, 4.0);
}

#[test]
fn test_cell_without_wetland_tile_skips_routing() {
    let config = ModelConfig {
        lakes: true,
        ..ModelConfig::water_balance()
    };
    let mut cell = lake_cell(&config);
    cell.tiles[1].cv = 0.0;
    let solvers = Solvers {
        surface_flux: &DrySurface,
        runoff: &FixedRunoff(4.0),
        lake: &NoopLake,
        thermal: &NoopThermal,
    };
    advance_cell(&mut cell, &forcing(), &june(), &config, solvers).unwrap();
    let lake = cell.lake.as_ref().unwrap();
    assert_relative_eq!(lake.state.runoff_in, 0.0);
    // Land runoff is left untouched without a lake to route into.
    assert_relative_eq!(cell.tiles[0].bands[0].wet.runoff, 4.0);
}
