//! # Fleet Coordinator
//!
//! Owns the arena of vehicle units, dispatches validated plans, and
//! aggregates fleet telemetry. The vehicle map is mutated only to add or
//! remove vehicles; a vehicle's internal state is owned by its own unit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_domain::{
    ConnectionState, MissionPlan, ObserverSnapshot, TelemetrySnapshot, VehicleId, VehicleStatus,
};

use crate::adapter::VehicleAdapter;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::events::FleetEvent;
use crate::unit::{spawn_vehicle, VehicleHandle};
use crate::validator::MissionValidator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fleet-wide counters derived from the per-vehicle views.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total: usize,
    pub connected: usize,
    pub airborne: usize,
    pub faulted: usize,
    pub missions_active: usize,
    pub average_battery_pct: Option<f32>,
}

/// Merged read-only view over the whole fleet, built from copied
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetTelemetry {
    pub at: DateTime<Utc>,
    pub vehicles: Vec<ObserverSnapshot>,
    pub summary: FleetSummary,
}

/// Per-vehicle outcome of a plan dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    pub plan_id: Uuid,
    pub succeeded: Vec<VehicleId>,
    pub failed: Vec<(VehicleId, FleetError)>,
}

impl DispatchReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FleetCoordinator {
    config: FleetConfig,
    validator: MissionValidator,
    vehicles: HashMap<VehicleId, VehicleHandle>,
    events: broadcast::Sender<FleetEvent>,
}

impl FleetCoordinator {
    #[must_use]
    pub fn new(config: FleetConfig) -> Self {
        let validator = MissionValidator::new(
            config.thresholds.clone(),
            config.search_area,
            config.mission.conflict_sample_interval,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            validator,
            vehicles: HashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Subscribe to the fleet event feed.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Register a vehicle and spawn its concurrent unit.
    pub fn add_vehicle(
        &mut self,
        vehicle_id: VehicleId,
        adapter: Arc<dyn VehicleAdapter>,
    ) -> Result<()> {
        if self.vehicles.contains_key(&vehicle_id) {
            return Err(FleetError::DuplicateVehicle(vehicle_id));
        }
        let handle = spawn_vehicle(&self.config, vehicle_id, adapter, self.events.clone());
        self.vehicles.insert(vehicle_id, handle);
        info!(vehicle = %vehicle_id, "vehicle registered");
        Ok(())
    }

    /// Shut one vehicle down and drop it from the fleet. Other vehicles
    /// are unaffected.
    pub async fn remove_vehicle(&mut self, vehicle_id: VehicleId) -> Result<()> {
        let handle = self
            .vehicles
            .remove(&vehicle_id)
            .ok_or(FleetError::UnknownVehicle(vehicle_id))?;
        handle.shutdown(self.config.shutdown_timeout).await;
        info!(vehicle = %vehicle_id, "vehicle removed");
        Ok(())
    }

    pub fn status_of(&self, vehicle_id: VehicleId) -> Result<VehicleStatus> {
        self.vehicles
            .get(&vehicle_id)
            .map(VehicleHandle::status)
            .ok_or(FleetError::UnknownVehicle(vehicle_id))
    }

    pub fn watch_vehicle(&self, vehicle_id: VehicleId) -> Result<watch::Receiver<VehicleStatus>> {
        self.vehicles
            .get(&vehicle_id)
            .map(VehicleHandle::watch_status)
            .ok_or(FleetError::UnknownVehicle(vehicle_id))
    }

    /// Recent snapshots retained for one vehicle, for diagnostics.
    pub fn telemetry_history(&self, vehicle_id: VehicleId) -> Result<Vec<TelemetrySnapshot>> {
        self.vehicles
            .get(&vehicle_id)
            .map(VehicleHandle::telemetry_history)
            .ok_or(FleetError::UnknownVehicle(vehicle_id))
    }

    /// Connect every registered vehicle concurrently. Vehicles that fail
    /// their connect retries are removed from active fleet operations;
    /// the rest are untouched.
    pub async fn connect_all(&mut self) -> Vec<(VehicleId, Result<()>)> {
        let mut joins = Vec::with_capacity(self.vehicles.len());
        for (vehicle_id, handle) in &self.vehicles {
            let vehicle_id = *vehicle_id;
            let client = handle.client();
            joins.push((
                vehicle_id,
                tokio::spawn(async move { client.connect().await }),
            ));
        }

        let mut results = Vec::with_capacity(joins.len());
        for (vehicle_id, join) in joins {
            let result = join
                .await
                .unwrap_or(Err(FleetError::UnitUnavailable { vehicle_id }));
            results.push((vehicle_id, result));
        }

        let failed: Vec<VehicleId> = results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(vehicle_id, _)| *vehicle_id)
            .collect();
        for vehicle_id in failed {
            warn!(vehicle = %vehicle_id, "dropping vehicle after failed connect");
            if let Err(err) = self.remove_vehicle(vehicle_id).await {
                warn!(vehicle = %vehicle_id, error = %err, "failed to remove vehicle");
            }
        }

        let connected = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(connected, total = results.len(), "fleet connect finished");
        results
    }

    /// Validate a plan (single- and multi-vehicle checks) and, only if it
    /// passes as a whole, fan out per-vehicle upload and start
    /// concurrently with staggered takeoffs. One vehicle's failure does
    /// not block the others.
    pub async fn dispatch_plan(&mut self, plan: &MissionPlan) -> Result<DispatchReport> {
        for vehicle_id in plan.vehicle_ids() {
            if !self.vehicles.contains_key(&vehicle_id) {
                return Err(FleetError::UnknownVehicle(vehicle_id));
            }
        }

        let validated = match self.validator.validate_plan(plan) {
            Ok(validated) => validated,
            Err(err) => {
                if let FleetError::Validation { issues } = &err {
                    for issue in issues {
                        warn!(plan = %plan.plan_id(), %issue, "plan rejected");
                    }
                    let _ = self.events.send(FleetEvent::PlanRejected {
                        plan_id: plan.plan_id(),
                        issues: issues.len(),
                    });
                }
                return Err(err);
            }
        };

        info!(
            plan = %plan.plan_id(),
            vehicles = plan.routes().len(),
            "dispatching validated plan"
        );
        let _ = self.events.send(FleetEvent::PlanDispatched {
            plan_id: plan.plan_id(),
            vehicles: plan.routes().len(),
        });

        let target_altitude_m = self.config.mission.default_takeoff_altitude_m;
        let stagger = self.config.mission.takeoff_stagger;
        let mut joins = Vec::with_capacity(plan.routes().len());
        for (index, route) in plan.routes().iter().enumerate() {
            let vehicle_id = route.vehicle_id;
            let (Some(handle), Some(route)) = (
                self.vehicles.get(&vehicle_id),
                validated.route_for(vehicle_id),
            ) else {
                continue;
            };
            let client = handle.client();
            let delay = stagger * index as u32;
            joins.push((
                vehicle_id,
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    client.dispatch(route, target_altitude_m).await
                }),
            ));
        }

        let mut report = DispatchReport {
            plan_id: plan.plan_id(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (vehicle_id, join) in joins {
            match join.await {
                Ok(Ok(())) => report.succeeded.push(vehicle_id),
                Ok(Err(err)) => {
                    warn!(vehicle = %vehicle_id, error = %err, "dispatch failed");
                    report.failed.push((vehicle_id, err));
                }
                Err(_) => report
                    .failed
                    .push((vehicle_id, FleetError::UnitUnavailable { vehicle_id })),
            }
        }
        Ok(report)
    }

    /// Merge current per-vehicle snapshots into one fleet-level read-only
    /// view. Operates on copies; no per-vehicle lock is held.
    #[must_use]
    pub fn aggregate_telemetry(&self) -> FleetTelemetry {
        let mut vehicles = Vec::with_capacity(self.vehicles.len());
        let mut battery_sum = 0.0_f32;
        let mut battery_count = 0_u32;
        let mut summary = FleetSummary {
            total: self.vehicles.len(),
            connected: 0,
            airborne: 0,
            faulted: 0,
            missions_active: 0,
            average_battery_pct: None,
        };

        for handle in self.vehicles.values() {
            let status = handle.status();
            let telemetry = handle.latest_telemetry();

            if matches!(
                status.connection,
                ConnectionState::Connected | ConnectionState::HealthChecking | ConnectionState::Ready
            ) {
                summary.connected += 1;
            }
            if status.faulted {
                summary.faulted += 1;
            }
            if status.mission_active() {
                summary.missions_active += 1;
            }
            if let Some(snapshot) = &telemetry {
                if snapshot.in_air {
                    summary.airborne += 1;
                }
                battery_sum += snapshot.battery.percent;
                battery_count += 1;
            }
            vehicles.push(ObserverSnapshot::from_parts(&status, telemetry.as_ref()));
        }

        if battery_count > 0 {
            summary.average_battery_pct = Some(battery_sum / battery_count as f32);
        }
        vehicles.sort_by_key(|snapshot| snapshot.vehicle_id);

        FleetTelemetry {
            at: Utc::now(),
            vehicles,
            summary,
        }
    }

    /// Swap the active plan. Vehicles with an active mission receive the
    /// new route: applied immediately while Executing, deferred to the
    /// next phase boundary while inside a critical phase. Vehicles
    /// without an active mission are skipped.
    pub async fn replan(&mut self, plan: &MissionPlan) -> Result<()> {
        for vehicle_id in plan.vehicle_ids() {
            if !self.vehicles.contains_key(&vehicle_id) {
                return Err(FleetError::UnknownVehicle(vehicle_id));
            }
        }
        let validated = self.validator.validate_plan(plan)?;

        for route in plan.routes() {
            let vehicle_id = route.vehicle_id;
            let (Some(handle), Some(route)) = (
                self.vehicles.get(&vehicle_id),
                validated.route_for(vehicle_id),
            ) else {
                continue;
            };
            let status = handle.status();
            if status.mission_active() {
                handle.queue_replan(route);
                let _ = self.events.send(FleetEvent::ReplanQueued {
                    vehicle_id,
                    plan_id: plan.plan_id(),
                });
            } else {
                debug!(vehicle = %vehicle_id, "no active mission, replan skipped");
            }
        }
        Ok(())
    }

    /// Stop the whole fleet: each vehicle lands if airborne, disconnects,
    /// and tears down within the shutdown budget, concurrently.
    pub async fn shutdown(mut self) {
        info!(vehicles = self.vehicles.len(), "fleet shutdown");
        let budget = self.config.shutdown_timeout;
        let joins: Vec<_> = self
            .vehicles
            .drain()
            .map(|(_, handle)| tokio::spawn(handle.shutdown(budget)))
            .collect();
        for join in joins {
            let _ = join.await;
        }
    }
}
