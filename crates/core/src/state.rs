//! Prognostic state carried between timesteps
//!
//! State is organized per vegetation tile, per elevation band, and per
//! wet/dry moisture branch. The wet branch receives precipitation, the
//! dry branch does not; when distributed precipitation is off only the
//! wet branch is active (mu = 1).

use serde::{Deserialize, Serialize};

use crate::aero::AeroResistance;
use crate::soil::SoilColumn;
use crate::veg::{calc_root_fractions, VegParams};

/// Moisture state of one soil layer [mm].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    /// Total liquid moisture.
    pub moist: f64,
    /// Ice content per frost subarea.
    pub ice: Vec<f64>,
    /// Evaporation extracted this step.
    pub evap: f64,
}

impl LayerState {
    pub fn new(n_frost: usize) -> Self {
        LayerState {
            moist: 0.0,
            ice: vec![0.0; n_frost],
            evap: 0.0,
        }
    }

    /// Area-weighted mean ice content over the frost subareas [mm].
    pub fn weighted_ice(&self, frost_fract: &[f64]) -> f64 {
        self.ice
            .iter()
            .zip(frost_fract)
            .map(|(ice, fract)| ice * fract)
            .sum()
    }

    /// Largest ice content over the frost subareas [mm].
    pub fn max_ice(&self) -> f64 {
        self.ice.iter().copied().fold(0.0, f64::max)
    }
}

/// One wet or dry moisture branch of a band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub layers: Vec<LayerState>,
    /// Tile aerodynamic resistance, refreshed every step.
    pub aero_resist: AeroResistance,
    /// Water reaching the soil surface this step [mm].
    pub inflow: f64,
    /// Surface runoff this step [mm].
    pub runoff: f64,
    /// Baseflow this step [mm].
    pub baseflow: f64,
    /// Moisture in root-occupied layers, ice included [mm].
    pub rootmoist: f64,
    /// Mean plant-available wetness over the column [0, 1].
    pub wetness: f64,
    /// Potential evaporation per reference surface plus vegetation [mm].
    pub pot_evap: Vec<f64>,
}

impl CellState {
    pub fn new(n_layers: usize, n_frost: usize, n_pet: usize) -> Self {
        CellState {
            layers: (0..n_layers).map(|_| LayerState::new(n_frost)).collect(),
            aero_resist: AeroResistance::zero(),
            inflow: 0.0,
            runoff: 0.0,
            baseflow: 0.0,
            rootmoist: 0.0,
            wetness: 0.0,
            pot_evap: vec![0.0; n_pet],
        }
    }

    /// Recompute root-zone moisture and mean wetness from the layer
    /// states. Wetness measures moisture above wilting point relative
    /// to plant-available capacity, floored at zero.
    pub fn recompute_moisture_indices(&mut self, soil: &SoilColumn, root: &[f64]) {
        self.rootmoist = 0.0;
        self.wetness = 0.0;
        for (idx, layer) in self.layers.iter().enumerate() {
            let total = layer.moist + layer.weighted_ice(&soil.frost_fract);
            if root.get(idx).copied().unwrap_or(0.0) > 0.0 {
                self.rootmoist += total;
            }
            let soil_layer = &soil.layers[idx];
            let capacity = soil_layer.plant_available_capacity();
            if capacity > 0.0 {
                self.wetness += ((total - soil_layer.wpwp) / capacity).max(0.0);
            }
        }
        self.wetness /= self.layers.len() as f64;
    }
}

/// Canopy interception storage of one branch [mm].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanopyState {
    /// Intercepted water on the canopy.
    pub water: f64,
    /// Water passed through to the surface this step.
    pub throughfall: f64,
    /// Evaporation from the canopy store this step.
    pub canopyevap: f64,
}

/// Snowpack state of one band (shared by the wet and dry branches).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnowState {
    /// Snow water equivalent [mm].
    pub swq: f64,
    /// Liquid water held in the pack [mm].
    pub surf_water: f64,
    /// Snow depth [m].
    pub depth: f64,
    /// Pack density [kg/m3].
    pub density: f64,
    /// Surface albedo.
    pub albedo: f64,
    /// Fraction of the band covered by snow.
    pub coverage: f64,
    /// Pack surface temperature [C].
    pub surf_temp: f64,
    /// Sublimation from the pack this step [mm].
    pub vapor_flux: f64,
    /// Sublimation from canopy-intercepted snow this step [mm].
    pub canopy_vapor_flux: f64,
    /// Snow intercepted in the canopy [mm].
    pub snow_canopy: f64,
    /// Meltwater released this step [mm].
    pub melt: f64,
    /// Steps since the last snowfall.
    pub last_snow: u32,
}

/// Surface energy balance terms of one band [W/m2], plus the thermal
/// node temperature profile [C].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyState {
    pub shortwave: f64,
    pub longwave: f64,
    pub latent: f64,
    pub sensible: f64,
    pub grnd_flux: f64,
    pub advection: f64,
    pub refreeze_energy: f64,
    pub surf_temp: f64,
    pub node_temps: Vec<f64>,
}

impl EnergyState {
    pub fn new(n_nodes: usize) -> Self {
        EnergyState {
            node_temps: vec![0.0; n_nodes],
            ..EnergyState::default()
        }
    }
}

/// Full state of one elevation band within a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandState {
    pub wet: CellState,
    pub dry: CellState,
    pub wet_canopy: CanopyState,
    pub dry_canopy: CanopyState,
    pub snow: SnowState,
    pub energy: EnergyState,
}

impl BandState {
    pub fn new(n_layers: usize, n_frost: usize, n_pet: usize, n_nodes: usize) -> Self {
        BandState {
            wet: CellState::new(n_layers, n_frost, n_pet),
            dry: CellState::new(n_layers, n_frost, n_pet),
            wet_canopy: CanopyState::default(),
            dry_canopy: CanopyState::default(),
            snow: SnowState::default(),
            energy: EnergyState::new(n_nodes),
        }
    }

    /// Both moisture branches, wet first.
    pub fn branches_mut(&mut self) -> [&mut CellState; 2] {
        [&mut self.wet, &mut self.dry]
    }
}

/// One vegetation tile: a coverage fraction, its parameters, and state
/// for each elevation band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationTile {
    /// Fraction of the cell covered by this tile.
    pub cv: f64,
    /// Wet-branch fraction of the tile.
    pub mu: f64,
    /// Whether this tile hosts the lake.
    pub is_lake: bool,
    pub params: VegParams,
    /// Root fraction per soil layer.
    pub root: Vec<f64>,
    pub bands: Vec<BandState>,
}

impl VegetationTile {
    pub fn new(
        cv: f64,
        params: VegParams,
        soil: &SoilColumn,
        n_bands: usize,
        n_frost: usize,
        n_pet: usize,
        n_nodes: usize,
    ) -> Self {
        let root = calc_root_fractions(&params.root_zones, &soil.layers);
        let n_layers = soil.layers.len();
        VegetationTile {
            cv,
            mu: 1.0,
            is_lake: false,
            params,
            root,
            bands: (0..n_bands)
                .map(|_| BandState::new(n_layers, n_frost, n_pet, n_nodes))
                .collect(),
        }
    }

    /// Number of bands to process: lake tiles only use band zero.
    pub fn n_active_bands(&self) -> usize {
        if self.is_lake {
            1
        } else {
            self.bands.len()
        }
    }
}

/// Snapshot of the moisture state taken before the flux loop, used to
/// roll the cell back when subsidence forces a re-solve.
#[derive(Debug, Clone)]
pub struct PriorStateSnapshot {
    tiles: Vec<Vec<BranchSnapshot>>,
}

/// Per-layer (moisture, evaporation) pairs for one band.
#[derive(Debug, Clone)]
struct BranchSnapshot {
    wet: Vec<(f64, f64)>,
    dry: Vec<(f64, f64)>,
}

impl PriorStateSnapshot {
    /// Capture layer moisture for every tile and band. Evaporation is
    /// recorded separately after the flux solve.
    pub fn capture(tiles: &[VegetationTile]) -> Self {
        PriorStateSnapshot {
            tiles: tiles
                .iter()
                .map(|tile| {
                    tile.bands
                        .iter()
                        .map(|band| BranchSnapshot {
                            wet: band.wet.layers.iter().map(|l| (l.moist, 0.0)).collect(),
                            dry: band.dry.layers.iter().map(|l| (l.moist, 0.0)).collect(),
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Record the layer evaporation computed by the flux solve so a
    /// restore replays it against the prior moisture.
    pub fn record_evap(&mut self, tile: usize, band: usize, wet: &[f64], dry: &[f64]) {
        let snap = &mut self.tiles[tile][band];
        for (slot, &evap) in snap.wet.iter_mut().zip(wet) {
            slot.1 = evap;
        }
        for (slot, &evap) in snap.dry.iter_mut().zip(dry) {
            slot.1 = evap;
        }
    }

    /// Restore layer moisture and evaporation bit for bit.
    pub fn restore(&self, tiles: &mut [VegetationTile]) {
        for (tile, snap_bands) in tiles.iter_mut().zip(&self.tiles) {
            for (band, snap) in tile.bands.iter_mut().zip(snap_bands) {
                for (layer, &(moist, evap)) in band.wet.layers.iter_mut().zip(&snap.wet) {
                    layer.moist = moist;
                    layer.evap = evap;
                }
                for (layer, &(moist, evap)) in band.dry.layers.iter_mut().zip(&snap.dry) {
                    layer.moist = moist;
                    layer.evap = evap;
                }
            }
        }
    }
}
