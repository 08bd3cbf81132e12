//! Solver seams
//!
//! The cell orchestrator drives four solver traits: surface fluxes per
//! band, subsurface runoff per band, the lake balance, and the soil
//! thermal profile. Reference implementations live in the submodules;
//! tests swap in instrumented mocks through the same traits.

mod lake;
mod runoff;
mod surface;
mod thermal;

pub use lake::LakeBalance;
pub use runoff::VariableInfiltration;
pub use surface::WaterBalanceFluxes;
pub use thermal::NodeInterpolation;

use crate::aero::AeroResistance;
use crate::config::ModelConfig;
use crate::error::StepResult;
use crate::forcing::{AtmosForcing, GaugeCorrection, StepTime};
use crate::lake::{Lake, LakeParams};
use crate::soil::SoilColumn;
use crate::state::{BandState, VegetationTile};
use crate::veg::VegParams;

/// Inputs shared by every band solve within one step.
#[derive(Clone, Copy)]
pub struct FluxInputs<'a> {
    pub config: &'a ModelConfig,
    pub time: &'a StepTime,
    pub forcing: &'a AtmosForcing,
    pub gauge: &'a GaugeCorrection,
    pub soil: &'a SoilColumn,
}

/// Per-tile context assembled by the orchestrator before the band loop.
#[derive(Clone, Copy)]
pub struct TileContext<'a> {
    pub tile_idx: usize,
    pub params: &'a VegParams,
    /// Root fraction per soil layer.
    pub root: &'a [f64],
    /// Wet-branch fraction of the tile.
    pub mu: f64,
    /// Shortwave attenuation through the canopy.
    pub surf_atten: f64,
    /// Albedo of the exposed soil surface.
    pub bare_albedo: f64,
    /// Resistances for the reference surfaces followed by the tile's
    /// vegetation.
    pub aero: &'a [AeroResistance],
}

/// Top-layer moisture and ice ahead of the flux solve, used by energy
/// balance implementations to seed the thermal solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopLayerThermal {
    pub moist: f64,
    pub ice: f64,
}

/// Water fluxes produced by one band solve, before coverage weighting.
#[derive(Debug, Clone, Default)]
pub struct BandFluxes {
    /// Precipitation reaching the band [mm].
    pub out_prec: f64,
    /// Liquid fraction of the precipitation [mm].
    pub out_rain: f64,
    /// Frozen fraction of the precipitation [mm].
    pub out_snow: f64,
    /// Snowmelt released to the surface [mm].
    pub melt: f64,
    /// Water delivered to the soil surface [mm].
    pub snow_inflow: f64,
    /// Soil evaporation per layer, wet branch [mm].
    pub layer_evap_wet: Vec<f64>,
    /// Soil evaporation per layer, dry branch [mm].
    pub layer_evap_dry: Vec<f64>,
}

/// Surface flux solve for one band: precipitation partition, canopy
/// interception, snowpack, and evaporation. Leaves surface inflow on
/// the band's wet and dry branches for the runoff solve.
pub trait SurfaceFluxSolver {
    fn solve_band(
        &self,
        inputs: &FluxInputs<'_>,
        tile: &TileContext<'_>,
        band_idx: usize,
        prec_factor: f64,
        thermal: Option<TopLayerThermal>,
        band: &mut BandState,
    ) -> StepResult<BandFluxes>;
}

/// Subsurface solve for one band: surface runoff, drainage, and
/// baseflow, driven by the inflow stored on each branch.
pub trait RunoffSolver {
    fn solve(
        &self,
        inputs: &FluxInputs<'_>,
        tile_idx: usize,
        band_idx: usize,
        mu: f64,
        band: &mut BandState,
    ) -> StepResult<()>;
}

/// Inputs to one lake step, gathered by the orchestrator after the
/// land tiles have been solved.
#[derive(Clone, Copy)]
pub struct LakeStepInputs<'a> {
    pub config: &'a ModelConfig,
    pub forcing: &'a AtmosForcing,
    pub soil: &'a SoilColumn,
    /// Liquid precipitation on the lake surface [mm].
    pub rainfall: f64,
    /// Frozen precipitation on the lake surface [mm].
    pub snowfall: f64,
    /// Fraction of the lake tile under open water.
    pub lakefrac: f64,
    /// Ice cover fraction at the start of the step.
    pub ice_fraction: f64,
    /// Lake volume at the start of the step [m3].
    pub old_volume: f64,
    /// Snow water equivalent on the ice at the start of the step [mm].
    pub old_swq: f64,
    /// Meltwater released by subsidence this step [mm].
    pub meltwater: f64,
}

/// Lake energy and water balance plus redistribution of lake state
/// onto the wetland tile.
pub trait LakeSolver {
    fn solve_energy(
        &self,
        inputs: &LakeStepInputs<'_>,
        params: &LakeParams,
        lake: &mut Lake,
    ) -> StepResult<()>;

    fn solve_water(
        &self,
        inputs: &LakeStepInputs<'_>,
        params: &LakeParams,
        lake: &mut Lake,
    ) -> StepResult<()>;

    fn redistribute(
        &self,
        params: &LakeParams,
        lake: &Lake,
        lakefrac: f64,
        soil: &SoilColumn,
        tile: &mut VegetationTile,
    );
}

/// Soil thermal node update after a geometry change.
pub trait ThermalSolver {
    fn update_nodes(
        &self,
        config: &ModelConfig,
        soil: &SoilColumn,
        tiles: &mut [VegetationTile],
    ) -> StepResult<()>;
}

/// The solver bundle handed to the orchestrator.
#[derive(Clone, Copy)]
pub struct Solvers<'a> {
    pub surface_flux: &'a dyn SurfaceFluxSolver,
    pub runoff: &'a dyn RunoffSolver,
    pub lake: &'a dyn LakeSolver,
    pub thermal: &'a dyn ThermalSolver,
}

impl Solvers<'_> {
    /// The reference implementations.
    pub fn reference() -> Solvers<'static> {
        static SURFACE: WaterBalanceFluxes = WaterBalanceFluxes;
        static RUNOFF: VariableInfiltration = VariableInfiltration;
        static LAKE: LakeBalance = LakeBalance;
        static THERMAL: NodeInterpolation = NodeInterpolation;
        Solvers {
            surface_flux: &SURFACE,
            runoff: &RUNOFF,
            lake: &LAKE,
            thermal: &THERMAL,
        }
    }
}
