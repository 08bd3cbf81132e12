//! Grid-cell step orchestrator
//!
//! One call to [`advance_cell`] advances every vegetation tile, every
//! elevation band, and the optional lake of a cell through one
//! timestep. The sequence is fixed: gauge correction, per-tile
//! aerodynamic resistances, the surface flux and runoff solves per
//! band, excess-ice subsidence with a rollback and runoff re-solve
//! when the soil column shortens, and finally the lake coupling.
//!
//! Every cell aggregate obeys one weighting contract: a band quantity
//! enters the cell total multiplied by the tile coverage and the band
//! area fraction, with the wet and dry branches weighted by mu and
//! 1 - mu. The lake tile's coverage is discounted by the flooded
//! fraction, and only its lowest band is active.

use tracing::{debug, info, warn};

use crate::aero::{self, AeroResistance, ReferenceSurface, SurfaceDescription};
use crate::config::{BaseflowMode, ModelConfig};
use crate::error::{StepError, StepResult};
use crate::forcing::{AtmosForcing, GaugeCorrection, StepTime};
use crate::lake::LakeSystem;
use crate::precip;
use crate::soil::SoilColumn;
use crate::solver::{FluxInputs, LakeStepInputs, Solvers, TileContext, TopLayerThermal};
use crate::state::{PriorStateSnapshot, VegetationTile};
use crate::veg::calc_root_fractions;

/// Albedo of exposed bare soil.
const BARE_ALBEDO: f64 = 0.2;

/// Static description of one elevation band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandParams {
    /// Fraction of the cell in this band.
    pub area_fract: f64,
    /// Multiplier on cell precipitation for this band.
    pub prec_factor: f64,
}

/// One grid cell: vegetation tiles sharing a soil column and band
/// geometry, plus an optional lake.
#[derive(Debug, Clone)]
pub struct GridCell {
    pub tiles: Vec<VegetationTile>,
    pub soil: SoilColumn,
    pub bands: Vec<BandParams>,
    pub lake: Option<LakeSystem>,
}

/// Cell-aggregate water fluxes for one step [mm], plus the subsidence
/// applied to the column [m].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellOutputs {
    pub prec: f64,
    pub rain: f64,
    pub snow: f64,
    pub melt: f64,
    pub runoff: f64,
    pub baseflow: f64,
    pub subsided: f64,
}

struct SubsidenceOutcome {
    /// Total column shortening [m].
    total: f64,
    /// Moisture capacity lost to the shortening [mm].
    meltwater: f64,
}

/// Effective coverage of a tile for cell aggregation. The lake tile
/// counts only its dry (wetland) part.
fn effective_cv(tile: &VegetationTile, lakefrac: f64) -> f64 {
    if tile.is_lake {
        tile.cv * (1.0 - lakefrac)
    } else {
        tile.cv
    }
}

/// Resistances for the reference surfaces followed by the tile's own
/// vegetation, which lands in the last slot.
fn tile_resistances(
    tile: &VegetationTile,
    soil: &SoilColumn,
    forcing: &AtmosForcing,
    config: &ModelConfig,
    month: usize,
) -> StepResult<Vec<AeroResistance>> {
    let mut resistances = Vec::with_capacity(ReferenceSurface::ALL.len() + 1);
    for surface in ReferenceSurface::ALL {
        let desc = SurfaceDescription::reference(surface, soil.snow_rough);
        resistances.push(aero::compute_resistance(
            &desc,
            forcing.wind,
            config.wind_height,
        )?);
    }
    let desc = SurfaceDescription::vegetation(&tile.params, month, soil.rough, soil.snow_rough);
    resistances.push(aero::compute_resistance(
        &desc,
        forcing.wind,
        config.wind_height,
    )?);
    Ok(resistances)
}

/// Surface flux and runoff solves for every active tile and band.
#[allow(clippy::too_many_lines)]
fn flux_pass(
    tiles: &mut [VegetationTile],
    soil: &SoilColumn,
    bands: &[BandParams],
    config: &ModelConfig,
    time: &StepTime,
    forcing: &AtmosForcing,
    gauge: &GaugeCorrection,
    lakefrac: f64,
    solvers: Solvers<'_>,
    snapshot: &mut Option<PriorStateSnapshot>,
    outputs: &mut CellOutputs,
) -> StepResult<()> {
    let inputs = FluxInputs {
        config,
        time,
        forcing,
        gauge,
        soil,
    };
    let month = time.month_index();
    let prepare_thermal = config.full_energy || config.frozen_soil;

    for (tile_idx, tile) in tiles.iter_mut().enumerate() {
        if tile.cv <= 0.0 {
            continue;
        }
        let cv_eff = effective_cv(tile, lakefrac);
        let n_active = tile.n_active_bands();
        let resistances = tile_resistances(tile, soil, forcing, config, month)?;
        let surf_atten = tile.params.surface_attenuation(month);
        let mu = tile.mu;

        let VegetationTile {
            params,
            root,
            bands: tile_bands,
            ..
        } = tile;

        for (band_idx, band) in tile_bands.iter_mut().enumerate().take(n_active) {
            let geometry = &bands[band_idx];
            if geometry.area_fract <= 0.0 {
                continue;
            }

            band.wet.aero_resist = resistances[resistances.len() - 1];
            band.dry.aero_resist = band.wet.aero_resist;

            // Top-layer moisture and ice ahead of the solve, for the
            // thermal seed of energy-balance implementations.
            let thermal = prepare_thermal.then(|| {
                let wet = &band.wet.layers[0];
                let dry = &band.dry.layers[0];
                TopLayerThermal {
                    moist: wet.moist * mu + dry.moist * (1.0 - mu),
                    ice: wet.weighted_ice(&soil.frost_fract) * mu
                        + dry.weighted_ice(&soil.frost_fract) * (1.0 - mu),
                }
            });

            let context = TileContext {
                tile_idx,
                params,
                root,
                mu,
                surf_atten,
                bare_albedo: BARE_ALBEDO,
                aero: &resistances,
            };
            let fluxes = solvers.surface_flux.solve_band(
                &inputs,
                &context,
                band_idx,
                geometry.prec_factor,
                thermal,
                band,
            )?;

            let weight = cv_eff * geometry.area_fract;
            outputs.prec += fluxes.out_prec * weight;
            outputs.rain += fluxes.out_rain * weight;
            outputs.snow += fluxes.out_snow * weight;
            outputs.melt += fluxes.melt * weight;

            if let Some(snap) = snapshot.as_mut() {
                snap.record_evap(
                    tile_idx,
                    band_idx,
                    &fluxes.layer_evap_wet,
                    &fluxes.layer_evap_dry,
                );
            }

            solvers.runoff.solve(&inputs, tile_idx, band_idx, mu, band)?;
            band.wet.recompute_moisture_indices(soil, root);
            band.dry.recompute_moisture_indices(soil, root);
        }
    }
    Ok(())
}

/// Shorten soil layers whose average excess ice has thawed past the
/// trigger fraction. Returns the total shortening and the moisture
/// capacity released by it.
fn apply_subsidence(
    soil: &mut SoilColumn,
    tiles: &[VegetationTile],
    config: &ModelConfig,
    bands: &[BandParams],
    lakefrac: f64,
) -> StepResult<SubsidenceOutcome> {
    let mut total = 0.0;
    let mut meltwater = 0.0;

    for idx in 0..soil.layers.len() {
        soil.layers[idx].subsidence = 0.0;
        if !soil.layers[idx].has_excess_ice() {
            continue;
        }

        // Cell-average ice in this layer under the weighting contract,
        // and the largest ice content anywhere in the cell, which the
        // shortened layer must still hold.
        let mut ave_ice = 0.0;
        let mut max_ice_layer: f64 = 0.0;
        for tile in tiles {
            if tile.cv <= 0.0 {
                continue;
            }
            let cv_eff = effective_cv(tile, lakefrac);
            for (band, geometry) in tile
                .bands
                .iter()
                .zip(bands)
                .take(tile.n_active_bands())
            {
                if geometry.area_fract <= 0.0 {
                    continue;
                }
                let wet = band.wet.layers[idx].weighted_ice(&soil.frost_fract);
                let dry = band.dry.layers[idx].weighted_ice(&soil.frost_fract);
                ave_ice +=
                    (wet * tile.mu + dry * (1.0 - tile.mu)) * cv_eff * geometry.area_fract;
                max_ice_layer = max_ice_layer
                    .max(band.wet.layers[idx].max_ice())
                    .max(band.dry.layers[idx].max_ice());
            }
        }

        let layer = &mut soil.layers[idx];
        let ave_ice_fract = ave_ice / layer.max_moist;
        if ave_ice_fract > config.subsidence_ice_threshold {
            continue;
        }

        let depth_prior = layer.depth;
        let subsidence_mm =
            (1000.0 * depth_prior - max_ice_layer).min(config.max_subsidence);
        if subsidence_mm <= 0.0 {
            continue;
        }
        let tmp_depth = (depth_prior - subsidence_mm / 1000.0).max(layer.min_depth);
        // Depths are carried to whole millimeters; the shortened pore
        // space follows the rounded depth.
        let new_depth = (tmp_depth * 1000.0 + 0.5).trunc() / 1000.0;
        let subsided = depth_prior - new_depth;
        if subsided <= 0.0 {
            continue;
        }
        if new_depth <= layer.min_depth {
            layer.effective_porosity = layer.porosity;
        } else {
            layer.effective_porosity =
                1.0 - (1.0 - layer.effective_porosity) * depth_prior / new_depth;
            if layer.effective_porosity < layer.porosity {
                layer.effective_porosity = layer.porosity;
            }
        }

        layer.depth = new_depth;
        layer.subsidence = subsided * 1000.0;
        layer.bulk_density = (1.0 - layer.effective_porosity) * layer.soil_density;
        let old_max_moist = layer.max_moist;
        layer.max_moist = layer.depth * layer.effective_porosity * 1000.0;
        meltwater += (old_max_moist - layer.max_moist).max(0.0);
        total += subsided;

        info!(
            layer = idx,
            subsided_m = subsided,
            new_depth_m = new_depth,
            ave_ice_fract,
            "layer subsided"
        );
    }

    if total > 0.0 {
        soil.dp = (soil.dp - total).max(soil.total_depth());
        soil.recompute_max_infiltration();
        soil.recompute_moisture_limits()?;
        if config.baseflow_mode == BaseflowMode::Nijssen2001 {
            soil.reconvert_baseflow(config.baseflow_mode);
        }
        soil.recompute_node_depths(config.n_nodes);
        debug!(total_m = total, meltwater_mm = meltwater, "soil column shortened");
    }

    Ok(SubsidenceOutcome { total, meltwater })
}

/// Re-run the runoff solve for every active band from the inflow left
/// by the flux pass, against the shortened column.
fn rerun_runoff(
    tiles: &mut [VegetationTile],
    soil: &SoilColumn,
    config: &ModelConfig,
    time: &StepTime,
    forcing: &AtmosForcing,
    gauge: &GaugeCorrection,
    bands: &[BandParams],
    solvers: Solvers<'_>,
) -> StepResult<()> {
    let inputs = FluxInputs {
        config,
        time,
        forcing,
        gauge,
        soil,
    };
    for (tile_idx, tile) in tiles.iter_mut().enumerate() {
        if tile.cv <= 0.0 {
            continue;
        }
        let n_active = tile.n_active_bands();
        let mu = tile.mu;
        let VegetationTile {
            root,
            bands: tile_bands,
            ..
        } = tile;
        for (band_idx, band) in tile_bands.iter_mut().enumerate().take(n_active) {
            if bands[band_idx].area_fract <= 0.0 {
                continue;
            }
            solvers.runoff.solve(&inputs, tile_idx, band_idx, mu, band)?;
            band.wet.recompute_moisture_indices(soil, root);
            band.dry.recompute_moisture_indices(soil, root);
        }
    }
    Ok(())
}

/// Route land runoff into the lake, step the lake balance, and fold
/// the lake state back onto the wetland tile.
#[allow(clippy::too_many_arguments)]
fn couple_lake(
    lake: &mut LakeSystem,
    tiles: &mut [VegetationTile],
    soil: &SoilColumn,
    bands: &[BandParams],
    config: &ModelConfig,
    forcing: &AtmosForcing,
    gauge: &GaugeCorrection,
    lakefrac: f64,
    old_volume: f64,
    old_swq: f64,
    ice_fraction: f64,
    meltwater: f64,
    solvers: Solvers<'_>,
    outputs: &mut CellOutputs,
) -> StepResult<()> {
    let Some(wetland_idx) = tiles.iter().position(|t| t.is_lake && t.cv > 0.0) else {
        return Ok(());
    };
    let rpercent = lake.params.rpercent;

    // Land tiles give rpercent of their outflow to the lake and keep
    // the rest; the wetland gives everything.
    let mut runoff_in_mm = 0.0;
    let mut baseflow_in_mm = 0.0;
    for (tile_idx, tile) in tiles.iter_mut().enumerate() {
        if tile.cv <= 0.0 {
            continue;
        }
        let cv_eff = effective_cv(tile, lakefrac);
        let mu = tile.mu;
        let n_active = tile.n_active_bands();
        for (band_idx, band) in tile.bands.iter_mut().enumerate().take(n_active) {
            let weight = cv_eff * bands[band_idx].area_fract;
            if weight <= 0.0 {
                continue;
            }
            for branch_weight in [(mu, 0), (1.0 - mu, 1)] {
                let (frac, which) = branch_weight;
                if frac <= 0.0 {
                    continue;
                }
                let branch = if which == 0 { &mut band.wet } else { &mut band.dry };
                if tile_idx == wetland_idx {
                    runoff_in_mm += branch.runoff * frac * weight;
                    baseflow_in_mm += branch.baseflow * frac * weight;
                    branch.runoff = 0.0;
                    branch.baseflow = 0.0;
                } else {
                    runoff_in_mm += branch.runoff * rpercent * frac * weight;
                    baseflow_in_mm += branch.baseflow * rpercent * frac * weight;
                    branch.runoff *= 1.0 - rpercent;
                    branch.baseflow *= 1.0 - rpercent;
                }
            }
        }
    }
    let cell_area = lake.params.cell_area;
    lake.state.runoff_in = runoff_in_mm / 1000.0 * cell_area;
    lake.state.baseflow_in = baseflow_in_mm / 1000.0 * cell_area;

    // Precipitation on the open water. The snow catch correction
    // applies to both phases over the lake surface.
    let (rain, snow) = precip::partition(
        forcing.prec,
        forcing.air_temp,
        config.max_snow_temp,
        config.min_rain_temp,
    )?;
    let rainfall = rain * gauge.snow;
    let snowfall = snow * gauge.snow;
    let lake_weight = tiles[wetland_idx].cv * lakefrac;
    outputs.prec += (rainfall + snowfall) * lake_weight;
    outputs.rain += rainfall * lake_weight;
    outputs.snow += snowfall * lake_weight;

    let step = LakeStepInputs {
        config,
        forcing,
        soil,
        rainfall,
        snowfall,
        lakefrac,
        ice_fraction,
        old_volume,
        old_swq,
        meltwater,
    };
    solvers.lake.solve_energy(&step, &lake.params, &mut lake.state)?;
    solvers.lake.solve_water(&step, &lake.params, &mut lake.state)?;
    solvers.lake.redistribute(
        &lake.params,
        &lake.state,
        lakefrac,
        soil,
        &mut tiles[wetland_idx],
    );

    outputs.runoff += lake.state.runoff_out / cell_area * 1000.0;
    outputs.baseflow += lake.state.baseflow_out / cell_area * 1000.0;
    Ok(())
}

/// Aggregate the runoff and baseflow stored on the tiles into the cell
/// outputs under the weighting contract.
fn aggregate_outflow(
    tiles: &[VegetationTile],
    bands: &[BandParams],
    lakefrac: f64,
    outputs: &mut CellOutputs,
) {
    for tile in tiles {
        if tile.cv <= 0.0 {
            continue;
        }
        let cv_eff = effective_cv(tile, lakefrac);
        for (band, geometry) in tile.bands.iter().zip(bands).take(tile.n_active_bands()) {
            let weight = cv_eff * geometry.area_fract;
            outputs.runoff += (band.wet.runoff * tile.mu
                + band.dry.runoff * (1.0 - tile.mu))
                * weight;
            outputs.baseflow += (band.wet.baseflow * tile.mu
                + band.dry.baseflow * (1.0 - tile.mu))
                * weight;
        }
    }
}

/// Advance one grid cell through one timestep.
///
/// Any solver error aborts the step immediately; no later tile, band,
/// or the lake is touched after a failure.
pub fn advance_cell(
    cell: &mut GridCell,
    forcing: &AtmosForcing,
    time: &StepTime,
    config: &ModelConfig,
    solvers: Solvers<'_>,
) -> StepResult<CellOutputs> {
    let GridCell {
        tiles,
        soil,
        bands,
        lake,
    } = cell;

    if soil.layers.len() != config.n_layers {
        return Err(StepError::SoilInvariant {
            layer: soil.layers.len(),
            message: format!(
                "column has {} layers, configuration expects {}",
                soil.layers.len(),
                config.n_layers
            ),
        });
    }

    let coverage: f64 = tiles.iter().map(|t| t.cv).sum();
    if (coverage - 1.0).abs() > 1e-4 {
        warn!(coverage, "tile coverage fractions do not sum to one");
    }

    // Without the wet/dry precipitation split the whole tile is the wet
    // branch.
    if config.n_dist() == 1 {
        for tile in &mut *tiles {
            tile.mu = 1.0;
        }
    }

    let gauge = if config.correct_precip {
        GaugeCorrection::from_wind(forcing.wind, config.wind_height, soil.rough, soil.snow_rough)
    } else {
        GaugeCorrection::IDENTITY
    };

    // Re-derive the lake stage from the stored volume so depth, area,
    // and the flooded fraction are consistent at the start of the step.
    let mut lakefrac = 0.0;
    let mut old_volume = 0.0;
    let mut old_swq = 0.0;
    let mut ice_fraction = 0.0;
    let lake_active =
        config.lakes && lake.as_ref().is_some_and(|s| s.params.area_fract > 0.0);
    if lake_active {
        if let Some(system) = lake.as_mut() {
            let state = &mut system.state;
            state.depth = system.params.depth_from_volume(state.volume)?;
            state.sarea = system.params.area_from_depth(state.depth)?;
            state.ice_area = state.new_ice_area.min(state.sarea);
            let tile_area = system.params.area_fract * system.params.cell_area;
            if tile_area > 0.0 {
                lakefrac = (state.sarea / tile_area).clamp(0.0, 1.0);
            }
            old_volume = state.volume;
            old_swq = state.snow.swq;
            ice_fraction = state.ice_fraction();
        }
    }

    let mut snapshot = config
        .excess_ice
        .then(|| PriorStateSnapshot::capture(tiles));

    let mut outputs = CellOutputs::default();
    flux_pass(
        tiles, soil, bands, config, time, forcing, &gauge, lakefrac, solvers, &mut snapshot,
        &mut outputs,
    )?;

    let mut meltwater = 0.0;
    if config.excess_ice {
        let outcome = apply_subsidence(soil, tiles, config, bands, lakefrac)?;
        if outcome.total > 0.0 {
            // The column changed under the solution: roll the moisture
            // state back and redo the subsurface pass against the new
            // geometry.
            if let Some(snap) = &snapshot {
                snap.restore(tiles);
            }
            for tile in &mut *tiles {
                tile.root = calc_root_fractions(&tile.params.root_zones, &soil.layers);
            }
            rerun_runoff(tiles, soil, config, time, forcing, &gauge, bands, solvers)?;
            solvers.thermal.update_nodes(config, soil, tiles)?;
            outputs.subsided = outcome.total;
            meltwater = outcome.meltwater;
        }
    }

    if lake_active {
        if let Some(system) = lake.as_mut() {
            couple_lake(
                system,
                tiles,
                soil,
                bands,
                config,
                forcing,
                &gauge,
                lakefrac,
                old_volume,
                old_swq,
                ice_fraction,
                meltwater,
                solvers,
                &mut outputs,
            )?;
        }
    }

    aggregate_outflow(tiles, bands, lakefrac, &mut outputs);
    Ok(outputs)
}
