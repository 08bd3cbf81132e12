//! Water-balance surface flux solver
//!
//! Partitions band precipitation into rain and snow, intercepts rain on
//! the canopy, runs a degree-day snowpack, computes aerodynamic
//! potential evaporation for each reference surface, and extracts soil
//! evaporation from the top layer. Inflow for the runoff solve is left
//! on the wet and dry branches of the band.

use crate::aero::N_REF_SURFACES;
use crate::error::{StepError, StepResult};
use crate::precip;
use crate::solver::{BandFluxes, FluxInputs, SurfaceFluxSolver, TileContext, TopLayerThermal};
use crate::state::{BandState, CanopyState, CellState};

/// Canopy storage capacity per unit leaf area index [mm].
const LAI_WATER_FACTOR: f64 = 0.2;

/// Degree-day melt factor [mm/(C day)].
const DEGREE_DAY_FACTOR: f64 = 4.0;

/// Fresh snow density [kg/m3].
const NEW_SNOW_DENSITY: f64 = 100.0;

/// Ratio of molecular weights of water vapor and dry air.
const EPS: f64 = 0.622;

const SECONDS_PER_HOUR: f64 = 3600.0;
const HOURS_PER_DAY: f64 = 24.0;

pub struct WaterBalanceFluxes;

impl WaterBalanceFluxes {
    /// Aerodynamic potential evaporation [mm] for one resistance.
    fn aerodynamic_pe(inputs: &FluxInputs<'_>, resistance: f64) -> f64 {
        if resistance <= 0.0 || inputs.forcing.pressure <= 0.0 {
            return 0.0;
        }
        let flux = inputs.forcing.density * EPS * inputs.forcing.vpd
            / (inputs.forcing.pressure * resistance);
        (flux * inputs.config.dt * SECONDS_PER_HOUR).max(0.0)
    }

    /// Intercept rain on the canopy and evaporate from the store.
    fn canopy_balance(
        canopy: &mut CanopyState,
        rain: f64,
        max_storage: f64,
        demand: f64,
    ) -> (f64, f64) {
        canopy.water += rain;
        let throughfall = (canopy.water - max_storage).max(0.0);
        canopy.water -= throughfall;
        let canopyevap = demand.min(canopy.water);
        canopy.water -= canopyevap;
        canopy.throughfall = throughfall;
        canopy.canopyevap = canopyevap;
        (throughfall, canopyevap)
    }

    /// Extract soil evaporation from the top layer, limited to the
    /// moisture held above wilting point.
    fn soil_evap(inputs: &FluxInputs<'_>, branch: &mut CellState, demand: f64) -> f64 {
        let top = &inputs.soil.layers[0];
        let available = (branch.layers[0].moist - top.wpwp).max(0.0);
        let evap = demand.min(available);
        branch.layers[0].evap = evap;
        for layer in branch.layers.iter_mut().skip(1) {
            layer.evap = 0.0;
        }
        evap
    }
}

impl SurfaceFluxSolver for WaterBalanceFluxes {
    fn solve_band(
        &self,
        inputs: &FluxInputs<'_>,
        tile: &TileContext<'_>,
        band_idx: usize,
        prec_factor: f64,
        thermal: Option<TopLayerThermal>,
        band: &mut BandState,
    ) -> StepResult<BandFluxes> {
        let config = inputs.config;
        let forcing = inputs.forcing;
        let month = inputs.time.month_index();

        let band_prec = forcing.prec * prec_factor;
        let (mut rain, mut snow) = precip::partition(
            band_prec,
            forcing.air_temp,
            config.max_snow_temp,
            config.min_rain_temp,
        )?;
        rain *= inputs.gauge.rain;
        snow *= inputs.gauge.snow;

        // Potential evaporation for the reference surfaces, then the
        // vegetation itself in the last slot.
        if tile.aero.len() != N_REF_SURFACES + 1 {
            return Err(StepError::SurfaceFlux {
                tile: tile.tile_idx,
                band: band_idx,
                message: format!(
                    "expected {} resistances, got {}",
                    N_REF_SURFACES + 1,
                    tile.aero.len()
                ),
            });
        }
        let mut pot_evap = vec![0.0; tile.aero.len()];
        for (slot, resist) in pot_evap.iter_mut().zip(tile.aero) {
            *slot = Self::aerodynamic_pe(inputs, resist.surface);
        }
        band.wet.pot_evap.clone_from(&pot_evap);
        band.dry.pot_evap.clone_from(&pot_evap);
        let veg_pe = pot_evap[N_REF_SURFACES];

        // Degree-day snowpack shared by both branches.
        let snowpack = &mut band.snow;
        if snow > 0.0 {
            snowpack.swq += snow;
            snowpack.last_snow = 0;
            snowpack.density = NEW_SNOW_DENSITY;
        } else {
            snowpack.last_snow = snowpack.last_snow.saturating_add(1);
        }
        let dt_days = config.dt / HOURS_PER_DAY;
        let melt = if forcing.air_temp > 0.0 && snowpack.swq > 0.0 {
            (DEGREE_DAY_FACTOR * forcing.air_temp * dt_days).min(snowpack.swq)
        } else {
            0.0
        };
        snowpack.swq -= melt;
        snowpack.melt = melt;
        snowpack.coverage = if snowpack.swq > 0.0 { 1.0 } else { 0.0 };
        snowpack.depth = if snowpack.density > 0.0 {
            snowpack.swq / snowpack.density
        } else {
            0.0
        };
        // Rain falling on an existing pack joins the melt stream.
        let (rain_to_canopy, rain_on_snow) = if snowpack.swq > 0.0 {
            (0.0, rain)
        } else {
            (rain, 0.0)
        };

        let max_storage = LAI_WATER_FACTOR * tile.params.lai[month];
        let canopy_demand = veg_pe * (1.0 - tile.surf_atten);
        let (throughfall, wet_canopy_evap) =
            Self::canopy_balance(&mut band.wet_canopy, rain_to_canopy, max_storage, canopy_demand);
        let (_, dry_canopy_evap) =
            Self::canopy_balance(&mut band.dry_canopy, 0.0, max_storage, canopy_demand);

        // Soil evaporation from below the canopy, suppressed under snow
        // and reduced where the top layer is frozen.
        let frozen_fraction = thermal
            .map(|t| {
                let top = &inputs.soil.layers[0];
                if top.max_moist > 0.0 {
                    (t.ice / top.max_moist).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        let exposure = (1.0 - snowpack.coverage) * (1.0 - frozen_fraction);
        let soil_demand =
            (veg_pe * tile.surf_atten * exposure - wet_canopy_evap).max(0.0);
        Self::soil_evap(inputs, &mut band.wet, soil_demand);
        let dry_demand = (veg_pe * tile.surf_atten * exposure - dry_canopy_evap).max(0.0);
        Self::soil_evap(inputs, &mut band.dry, dry_demand);

        let snow_inflow = throughfall + melt + rain_on_snow;
        band.wet.inflow = snow_inflow;
        band.dry.inflow = melt;

        let layer_evap_wet: Vec<f64> = band.wet.layers.iter().map(|l| l.evap).collect();
        let layer_evap_dry: Vec<f64> = band.dry.layers.iter().map(|l| l.evap).collect();

        Ok(BandFluxes {
            out_prec: rain + snow,
            out_rain: rain,
            out_snow: snow,
            melt,
            snow_inflow,
            layer_evap_wet,
            layer_evap_dry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aero::AeroResistance;
    use crate::config::ModelConfig;
    use crate::forcing::{AtmosForcing, GaugeCorrection, StepTime};
    use crate::soil::default_column;
    use crate::veg::VegParams;
    use approx::assert_relative_eq;

    fn forcing(air_temp: f64, prec: f64) -> AtmosForcing {
        AtmosForcing {
            air_temp,
            prec,
            wind: 3.0,
            shortwave: 200.0,
            longwave: 300.0,
            vp: 800.0,
            vpd: 400.0,
            pressure: 95_000.0,
            density: 1.2,
        }
    }

    fn resistances() -> Vec<AeroResistance> {
        (0..=N_REF_SURFACES)
            .map(|_| AeroResistance {
                surface: 60.0,
                snow: 120.0,
                overstory: None,
            })
            .collect()
    }

    struct Fixture {
        config: ModelConfig,
        soil: crate::soil::SoilColumn,
        params: VegParams,
        root: Vec<f64>,
        time: StepTime,
    }

    impl Fixture {
        fn new() -> Self {
            let config = ModelConfig::water_balance();
            let soil = default_column(config.n_nodes);
            let params = VegParams::short_grass();
            let root = crate::veg::calc_root_fractions(&params.root_zones, &soil.layers);
            Fixture {
                config,
                soil,
                params,
                root,
                time: StepTime {
                    year: 1999,
                    month: 6,
                    day: 15,
                    hour: 0,
                },
            }
        }

        fn solve(
            &self,
            air_temp: f64,
            prec: f64,
            aero: &[AeroResistance],
            band: &mut BandState,
        ) -> BandFluxes {
            let forcing = forcing(air_temp, prec);
            let inputs = FluxInputs {
                config: &self.config,
                time: &self.time,
                forcing: &forcing,
                gauge: &GaugeCorrection::IDENTITY,
                soil: &self.soil,
            };
            let tile = TileContext {
                tile_idx: 0,
                params: &self.params,
                root: &self.root,
                mu: 1.0,
                surf_atten: self.params.surface_attenuation(5),
                bare_albedo: 0.2,
                aero,
            };
            WaterBalanceFluxes
                .solve_band(&inputs, &tile, 0, 1.0, None, band)
                .unwrap()
        }
    }

    #[test]
    fn test_warm_rain_reaches_the_surface() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        let fluxes = fx.solve(12.0, 10.0, &resistances(), &mut band);
        assert_relative_eq!(fluxes.out_rain, 10.0);
        assert_relative_eq!(fluxes.out_snow, 0.0);
        assert!(band.wet.inflow > 0.0);
        // Dry branch sees no precipitation.
        assert_relative_eq!(band.dry.inflow, 0.0);
    }

    #[test]
    fn test_cold_precipitation_accumulates_as_snow() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        let fluxes = fx.solve(-5.0, 10.0, &resistances(), &mut band);
        assert_relative_eq!(fluxes.out_snow, 10.0);
        assert_relative_eq!(band.snow.swq, 10.0);
        assert_relative_eq!(fluxes.melt, 0.0);
    }

    #[test]
    fn test_pack_melts_under_warm_air() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        band.snow.swq = 2.0;
        band.snow.density = 100.0;
        let fluxes = fx.solve(10.0, 0.0, &resistances(), &mut band);
        assert_relative_eq!(fluxes.melt, 2.0);
        assert_relative_eq!(band.snow.swq, 0.0);
    }

    #[test]
    fn test_potential_evaporation_fills_every_slot() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        fx.solve(12.0, 0.0, &resistances(), &mut band);
        assert_eq!(band.wet.pot_evap.len(), N_REF_SURFACES + 1);
        assert!(band.wet.pot_evap.iter().all(|&pe| pe > 0.0));
    }

    #[test]
    fn test_wrong_resistance_count_is_an_error() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        let forcing = forcing(12.0, 0.0);
        let inputs = FluxInputs {
            config: &fx.config,
            time: &fx.time,
            forcing: &forcing,
            gauge: &GaugeCorrection::IDENTITY,
            soil: &fx.soil,
        };
        let tile = TileContext {
            tile_idx: 0,
            params: &fx.params,
            root: &fx.root,
            mu: 1.0,
            surf_atten: 1.0,
            bare_albedo: 0.2,
            aero: &[],
        };
        let err = WaterBalanceFluxes
            .solve_band(&inputs, &tile, 0, 1.0, None, &mut band)
            .unwrap_err();
        assert!(matches!(err, StepError::SurfaceFlux { .. }));
    }

    #[test]
    fn test_soil_evaporation_limited_above_wilting_point() {
        let fx = Fixture::new();
        let mut band = BandState::new(3, 1, N_REF_SURFACES + 1, 5);
        let above_wilting = 0.5;
        band.wet.layers[0].moist = fx.soil.layers[0].wpwp + above_wilting;
        fx.solve(25.0, 0.0, &resistances(), &mut band);
        assert!(band.wet.layers[0].evap <= above_wilting + 1e-12);
    }
}
