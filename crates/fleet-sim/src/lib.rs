//! # Search-Fleet Simulator
//!
//! In-process simulated vehicles implementing the core's
//! [`VehicleAdapter`](fleet_core::VehicleAdapter) seam, plus a
//! parallel-track search pattern generator standing in for the external
//! mission-planning oracle. Used by the `fleet-sim` CLI and the
//! end-to-end tests.

pub mod pattern;
pub mod vehicle;

pub use pattern::SearchPatternBuilder;
pub use vehicle::{SimProfile, SimulatedVehicle};
