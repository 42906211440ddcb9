//! Fleet-level event feed for observer layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleet_domain::{AlertSeverity, VehicleId};

use crate::failsafe::FailsafeEvent;

/// High-level events published by the coordinator and the per-vehicle
/// tasks on a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FleetEvent {
    VehicleConnected {
        vehicle_id: VehicleId,
    },
    VehicleFaulted {
        vehicle_id: VehicleId,
        reason: String,
    },
    FailsafeTriggered(FailsafeEvent),
    ForceLandAlert {
        vehicle_id: VehicleId,
    },
    PlanDispatched {
        plan_id: Uuid,
        vehicles: usize,
    },
    PlanRejected {
        plan_id: Uuid,
        issues: usize,
    },
    ReplanQueued {
        vehicle_id: VehicleId,
        plan_id: Uuid,
    },
    MissionCompleted {
        vehicle_id: VehicleId,
        plan_id: Uuid,
    },
    MissionAborted {
        vehicle_id: VehicleId,
        reason: String,
    },
}

impl FleetEvent {
    #[must_use]
    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::FailsafeTriggered(_) | Self::ForceLandAlert { .. } | Self::VehicleFaulted { .. } => {
                AlertSeverity::Critical
            }
            Self::MissionAborted { .. } | Self::PlanRejected { .. } => AlertSeverity::Warning,
            Self::VehicleConnected { .. }
            | Self::PlanDispatched { .. }
            | Self::ReplanQueued { .. }
            | Self::MissionCompleted { .. } => AlertSeverity::Info,
        }
    }
}
