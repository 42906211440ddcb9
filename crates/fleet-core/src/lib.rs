//! # Search-Fleet Core
//!
//! Concurrent mission-execution and safety-failsafe subsystem for a
//! small fleet of autonomous search vehicles.
//!
//! ## Architecture
//!
//! Each vehicle runs as an independent concurrent unit; the coordinator
//! owns the arena of units and never reaches into their state:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FleetCoordinator                        │
//! │   plan validation · dispatch fan-out · telemetry aggregation │
//! └─────────────────────────────────────────────────────────────┘
//!        │ commands (mpsc + oneshot)        ▲ status/telemetry (watch)
//!        ▼                                  │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vehicle unit (per vehicle)                │
//! │  ┌───────────────┐   ┌──────────────────┐                   │
//! │  │  VehicleLink  │◄──┤  MissionExecutor │◄── abort (watch)  │
//! │  └───────┬───────┘   └────────▲─────────┘                   │
//! │          │                    │ latest snapshot             │
//! │  ┌───────▼───────────┐   ┌────┴─────────────┐               │
//! │  │ TelemetrySampler  ├──►│ FailsafeMonitor  │               │
//! │  └───────────────────┘   └──────────────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//!        │ VehicleAdapter (command/telemetry protocol seam)
//!        ▼
//!    vehicle / simulator / test mock
//! ```
//!
//! Safety always wins: the failsafe monitor evaluates every snapshot and
//! its triggers preempt the executor at any await point, driving it to
//! Landing regardless of mission phase.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod failsafe;
pub mod link;
pub mod telemetry;
pub mod unit;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use adapter::{AdapterError, MissionItem, RawTelemetry, VehicleAdapter};
pub use config::{
    FailsafeConfig, FleetConfig, LinkConfig, MissionConfig, TelemetryConfig, VehicleEndpoint,
};
pub use coordinator::{DispatchReport, FleetCoordinator, FleetSummary, FleetTelemetry};
pub use error::{FleetError, Result};
pub use events::FleetEvent;
pub use executor::MissionExecutor;
pub use failsafe::{AbortReason, EmergencyAction, FailsafeEvent, FailsafeMonitor, FailsafeRule};
pub use link::VehicleLink;
pub use telemetry::{SamplerExit, SnapshotHistory, TelemetrySampler};
pub use unit::{VehicleClient, VehicleHandle};
pub use validator::{MissionValidator, PlanIssue, ValidatedPlan, ValidatedRoute, ValidationIssue};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
