//! Grid-cell water and energy balance core
//!
//! This crate advances the land surface of one grid cell through one
//! timestep at a time. A cell is a mosaic of vegetation tiles laid
//! over shared elevation bands and a shared soil column, with an
//! optional lake; [`cell::advance_cell`] runs the fixed step sequence
//! over that mosaic and returns the cell-aggregate fluxes.
//!
//! The physics are pluggable. The orchestrator drives the four traits
//! in [`solver`] and ships water-balance reference implementations;
//! richer energy-balance solvers drop in behind the same seams.
//!
//! All aggregation follows one weighting contract: a band quantity
//! enters a cell total multiplied by its tile's coverage fraction and
//! its band's area fraction, with wet and dry precipitation branches
//! weighted by the wet fraction mu.

pub mod aero;
pub mod cell;
pub mod config;
pub mod error;
pub mod forcing;
pub mod lake;
pub mod precip;
pub mod soil;
pub mod solver;
pub mod state;
pub mod veg;

pub use cell::{advance_cell, BandParams, CellOutputs, GridCell};
pub use config::{BaseflowMode, ModelConfig};
pub use error::{StepError, StepResult};
pub use forcing::{AtmosForcing, GaugeCorrection, StepTime};
pub use solver::Solvers;
