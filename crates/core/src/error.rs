//! Step-level error type
//!
//! Every expected failure of a cell step is a `StepError` variant,
//! propagated by early return the moment it occurs. There are no retries:
//! the caller sees the first failure and the cell is left in its
//! mutated-so-far condition. Configuration-invariant violations are their
//! own variant because they terminate the run rather than one cell step.

use thiserror::Error;

/// Result alias used throughout the cell step.
pub type StepResult<T> = Result<T, StepError>;

/// Failure of one grid-cell time step.
#[derive(Debug, Error)]
pub enum StepError {
    /// Lake volume could not be inverted to a stage/depth within the
    /// basin profile. An expected physical-limit condition, not a bug.
    #[error("lake stage inversion failed: volume {volume} m^3, depth {depth} m")]
    StageInversion {
        /// Lake volume that failed to invert [m^3].
        volume: f64,
        /// Depth reached when the inversion gave up [m].
        depth: f64,
    },

    /// Aerodynamic resistance could not be computed for a surface type.
    #[error("aerodynamic resistance: {0}")]
    Resistance(String),

    /// Rain/snow partition is infeasible for the configured temperature
    /// thresholds.
    #[error(
        "rain/snow partition: all-rain threshold {max_snow_temp} C must exceed \
         all-snow threshold {min_rain_temp} C"
    )]
    RainSnowPartition {
        /// Temperature at or above which precipitation is all rain [C].
        max_snow_temp: f64,
        /// Temperature at or below which precipitation is all snow [C].
        min_rain_temp: f64,
    },

    /// The surface flux solver failed for one tile/band.
    #[error("surface flux solver failed (tile {tile}, band {band}): {message}")]
    SurfaceFlux {
        /// Vegetation tile index.
        tile: usize,
        /// Elevation band index.
        band: usize,
        /// Solver-specific description.
        message: String,
    },

    /// The infiltration/runoff solver failed for one tile/band.
    #[error("runoff solver failed (tile {tile}, band {band}): {message}")]
    Runoff {
        /// Vegetation tile index.
        tile: usize,
        /// Elevation band index.
        band: usize,
        /// Solver-specific description.
        message: String,
    },

    /// A lake energy- or water-balance solve failed.
    #[error("lake solver: {0}")]
    Lake(String),

    /// Thermal-node redistribution failed after subsidence.
    #[error("thermal node update: {0}")]
    Thermal(String),

    /// A derived soil parameter violated a configuration-time invariant
    /// (e.g. wilting point above critical point after subsidence). Fatal
    /// for the run, not recoverable per cell step.
    #[error("soil parameter invariant violated (layer {layer}): {message}")]
    SoilInvariant {
        /// Soil layer index.
        layer: usize,
        /// Which invariant failed and the offending values.
        message: String,
    },
}

impl StepError {
    /// True for errors that must terminate the whole run rather than
    /// just the current cell step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::SoilInvariant { .. })
    }
}
