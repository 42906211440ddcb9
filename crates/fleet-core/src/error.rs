//! Core error taxonomy.

use std::time::Duration;

use thiserror::Error;

use fleet_domain::{ConnectionState, DomainError, ExecutorPhase, VehicleId};

use crate::failsafe::FailsafeRule;
use crate::validator::PlanIssue;

/// Errors raised by the mission-execution and failsafe core.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("vehicle {vehicle_id}: connection failed after {attempts} attempt(s): {reason}")]
    Connection {
        vehicle_id: VehicleId,
        attempts: u32,
        reason: String,
    },

    #[error("vehicle {vehicle_id}: pre-flight health check failed: {reason}")]
    HealthCheck {
        vehicle_id: VehicleId,
        reason: String,
    },

    #[error("mission validation failed with {} issue(s)", .issues.len())]
    Validation { issues: Vec<PlanIssue> },

    #[error("vehicle {vehicle_id}: {command} not acknowledged within {timeout:?}")]
    CommandTimeout {
        vehicle_id: VehicleId,
        command: &'static str,
        timeout: Duration,
    },

    #[error("vehicle {vehicle_id}: {command} rejected: {reason}")]
    CommandRejected {
        vehicle_id: VehicleId,
        command: &'static str,
        reason: String,
    },

    #[error("vehicle {vehicle_id}: not ready for takeoff (link {state:?})")]
    Preflight {
        vehicle_id: VehicleId,
        state: ConnectionState,
    },

    #[error("vehicle {vehicle_id}: executor busy in phase {phase:?}")]
    MissionActive {
        vehicle_id: VehicleId,
        phase: ExecutorPhase,
    },

    #[error("vehicle {vehicle_id}: no mission uploaded")]
    NoMission { vehicle_id: VehicleId },

    #[error("vehicle {vehicle_id}: failed to reach {target_m} m within {timeout:?}")]
    Takeoff {
        vehicle_id: VehicleId,
        target_m: f64,
        timeout: Duration,
    },

    #[error("vehicle {vehicle_id}: failsafe {rule:?} preempted the mission")]
    FailsafeTriggered {
        vehicle_id: VehicleId,
        rule: FailsafeRule,
    },

    #[error("vehicle {vehicle_id}: landing not confirmed within {timeout:?}")]
    ForceLand {
        vehicle_id: VehicleId,
        timeout: Duration,
    },

    #[error("vehicle {vehicle_id}: faulted: {reason}")]
    VehicleFaulted {
        vehicle_id: VehicleId,
        reason: String,
    },

    #[error("vehicle {vehicle_id}: mission aborted for shutdown")]
    Shutdown { vehicle_id: VehicleId },

    #[error("unknown vehicle {0}")]
    UnknownVehicle(VehicleId),

    #[error("vehicle {0} is already registered")]
    DuplicateVehicle(VehicleId),

    #[error("vehicle {vehicle_id}: control unit is no longer running")]
    UnitUnavailable { vehicle_id: VehicleId },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type Result<T> = std::result::Result<T, FleetError>;
