//! Model configuration
//!
//! One explicit, read-only value threaded through every call of a cell
//! step. There is no process-wide option state: a driver builds a
//! `ModelConfig` once and passes it (by reference) to `advance_cell` and,
//! through it, to every collaborating solver.

use serde::{Deserialize, Serialize};

/// Parameterization of the baseflow curve for the bottom soil layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseflowMode {
    /// ARNO curve parameters (`ds`, `dsmax`, `ws`, `c`) are primary.
    Arno,
    /// Nijssen et al. (2001) parameters are primary and must be
    /// reconverted to ARNO form whenever layer capacities change.
    Nijssen2001,
}

/// Static configuration for one model run.
///
/// Counts size every bounds-checked container in the cell state; flags
/// select which physics are active. Read-only during a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of soil moisture layers.
    pub n_layers: usize,
    /// Number of soil thermal nodes.
    pub n_nodes: usize,
    /// Number of elevation (snow) bands.
    pub n_bands: usize,
    /// Number of frost subareas per soil layer (1 disables spatial frost).
    pub n_frost_subareas: usize,
    /// Distributed (wet/dry split) precipitation.
    pub distributed_precip: bool,
    /// Full surface energy balance iteration in the flux solver.
    pub full_energy: bool,
    /// Frozen-soil thermal solution.
    pub frozen_soil: bool,
    /// Excess-ice physics: ground subsidence on thaw.
    pub excess_ice: bool,
    /// Lake/wetland coupling.
    pub lakes: bool,
    /// Gauge undercatch correction of precipitation.
    pub correct_precip: bool,
    /// Upper bound on subsidence applied to one layer in one step [mm].
    pub max_subsidence: f64,
    /// Average ice fraction (of layer capacity) at or below which a
    /// layer carrying excess ice subsides.
    pub subsidence_ice_threshold: f64,
    /// Baseflow parameterization in use.
    pub baseflow_mode: BaseflowMode,
    /// Time step length [h].
    pub dt: f64,
    /// Wind measurement height above the surface [m].
    pub wind_height: f64,
    /// Air temperature at or above which precipitation is all rain [C].
    pub max_snow_temp: f64,
    /// Air temperature at or below which precipitation is all snow [C].
    pub min_rain_temp: f64,
}

impl ModelConfig {
    /// A water-balance configuration: three soil layers, one band, no
    /// optional physics. The usual starting point for tests and drivers.
    pub fn water_balance() -> Self {
        ModelConfig {
            n_layers: 3,
            n_nodes: 5,
            n_bands: 1,
            n_frost_subareas: 1,
            distributed_precip: false,
            full_energy: false,
            frozen_soil: false,
            excess_ice: false,
            lakes: false,
            correct_precip: false,
            max_subsidence: 1.0,
            subsidence_ice_threshold: 0.8,
            baseflow_mode: BaseflowMode::Arno,
            dt: 24.0,
            wind_height: 10.0,
            max_snow_temp: 0.5,
            min_rain_temp: -0.5,
        }
    }

    /// Number of wet/dry precipitation branches (2 when distributed).
    pub fn n_dist(&self) -> usize {
        if self.distributed_precip {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_water_balance_defaults() {
        let config = ModelConfig::water_balance();
        assert_eq!(config.n_layers, 3);
        assert_eq!(config.n_dist(), 1);
        assert!(!config.excess_ice);
    }

    #[test]
    fn test_n_dist_distributed() {
        let mut config = ModelConfig::water_balance();
        config.distributed_precip = true;
        assert_eq!(config.n_dist(), 2);
    }
}
