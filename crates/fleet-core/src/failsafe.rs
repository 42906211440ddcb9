//! # Failsafe Monitor
//!
//! Consumes every telemetry snapshot and evaluates safety rules in fixed
//! priority order. Rules are edge-triggered: a rule fires once at
//! condition onset, not once per snapshot, and at most one emergency
//! action is active per vehicle at a time. A trigger preempts the
//! mission executor into its Landing state regardless of phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{error, warn};

use fleet_domain::{SafetyThresholds, TelemetrySnapshot, VehicleId};

use crate::config::FailsafeConfig;
use crate::events::FleetEvent;

/// Safety rules in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailsafeRule {
    LowBattery,
    GpsDegraded,
    FlightTimeExceeded,
    LinkLost,
}

impl FailsafeRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowBattery => "LOW_BATTERY",
            Self::GpsDegraded => "GPS_DEGRADED",
            Self::FlightTimeExceeded => "FLIGHT_TIME_EXCEEDED",
            Self::LinkLost => "LINK_LOST",
        }
    }
}

/// Emergency action commanded when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyAction {
    Land,
    ReturnToLaunch,
}

/// A fired failsafe, published as a high-priority event and delivered to
/// the executor as an abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailsafeEvent {
    pub vehicle_id: VehicleId,
    pub rule: FailsafeRule,
    pub action: EmergencyAction,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Why an executor must abandon its mission. Failsafe triggers and fleet
/// shutdown share the same preemption path.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    Failsafe(FailsafeEvent),
    Shutdown,
}

pub struct FailsafeMonitor {
    vehicle_id: VehicleId,
    thresholds: SafetyThresholds,
    config: FailsafeConfig,

    // Edge-trigger latches, one per rule.
    battery_latched: bool,
    gps_low_since: Option<Instant>,
    gps_latched: bool,
    airborne_since: Option<Instant>,
    flight_time_latched: bool,
    link_lost_latched: bool,

    emergency_active: bool,
    last_in_air: bool,
}

impl FailsafeMonitor {
    pub fn new(
        vehicle_id: VehicleId,
        thresholds: SafetyThresholds,
        config: FailsafeConfig,
    ) -> Self {
        Self {
            vehicle_id,
            thresholds,
            config,
            battery_latched: false,
            gps_low_since: None,
            gps_latched: false,
            airborne_since: None,
            flight_time_latched: false,
            link_lost_latched: false,
            emergency_active: false,
            last_in_air: false,
        }
    }

    /// Evaluate one snapshot. Returns at most one event: the highest
    /// priority rule whose condition onset is observed while no emergency
    /// is already active.
    pub fn evaluate(&mut self, snapshot: &TelemetrySnapshot, now: Instant) -> Option<FailsafeEvent> {
        self.last_in_air = snapshot.in_air;

        if !snapshot.in_air {
            // On the ground every latch clears and any emergency is over.
            self.battery_latched = false;
            self.gps_low_since = None;
            self.gps_latched = false;
            self.airborne_since = None;
            self.flight_time_latched = false;
            self.link_lost_latched = false;
            self.emergency_active = false;
            return None;
        }

        if self.airborne_since.is_none() {
            self.airborne_since = Some(now);
        }

        // Rule 1: battery below threshold.
        let battery_low = snapshot.battery.percent < self.thresholds.battery_min_percent;
        if battery_low && !self.battery_latched {
            self.battery_latched = true;
            if let Some(event) = self.trigger(
                FailsafeRule::LowBattery,
                self.config.emergency_action,
                format!(
                    "battery {:.1}% below minimum {:.1}%",
                    snapshot.battery.percent, self.thresholds.battery_min_percent
                ),
            ) {
                return Some(event);
            }
        } else if !battery_low {
            self.battery_latched = false;
        }

        // Rule 2: satellite count below minimum beyond the grace period.
        let gps_low = snapshot.gps.satellites < self.thresholds.min_satellites;
        if gps_low {
            let since = *self.gps_low_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.gps_grace && !self.gps_latched {
                self.gps_latched = true;
                if let Some(event) = self.trigger(
                    FailsafeRule::GpsDegraded,
                    EmergencyAction::Land,
                    format!(
                        "{} satellites below minimum {} for over {:?}",
                        snapshot.gps.satellites, self.thresholds.min_satellites, self.config.gps_grace
                    ),
                ) {
                    return Some(event);
                }
            }
        } else {
            self.gps_low_since = None;
            self.gps_latched = false;
        }

        // Rule 3: flight time exceeded.
        if let Some(start) = self.airborne_since {
            let elapsed = now.duration_since(start);
            if elapsed > self.thresholds.max_flight_time && !self.flight_time_latched {
                self.flight_time_latched = true;
                if let Some(event) = self.trigger(
                    FailsafeRule::FlightTimeExceeded,
                    EmergencyAction::Land,
                    format!(
                        "airborne {:?}, maximum {:?}",
                        elapsed, self.thresholds.max_flight_time
                    ),
                ) {
                    return Some(event);
                }
            }
        }

        None
    }

    /// Rule 4: no snapshot within the link timeout while airborne.
    /// Driven by the run loop's deadline, not by snapshot arrival.
    pub fn link_lost(&mut self, link_timeout: Duration) -> Option<FailsafeEvent> {
        if !self.last_in_air || self.link_lost_latched {
            return None;
        }
        self.link_lost_latched = true;
        self.trigger(
            FailsafeRule::LinkLost,
            EmergencyAction::Land,
            format!("no telemetry within {link_timeout:?} while airborne"),
        )
    }

    fn trigger(
        &mut self,
        rule: FailsafeRule,
        action: EmergencyAction,
        detail: String,
    ) -> Option<FailsafeEvent> {
        if self.emergency_active {
            return None;
        }
        self.emergency_active = true;
        Some(FailsafeEvent {
            vehicle_id: self.vehicle_id,
            rule,
            action,
            detail,
            at: Utc::now(),
        })
    }
}

/// Failsafe task: one per vehicle, evaluating every incoming snapshot and
/// watching for link loss. Fired events are written to the executor's
/// abort channel and published fleet-wide.
pub async fn run(
    mut monitor: FailsafeMonitor,
    link_timeout: Duration,
    mut updates: broadcast::Receiver<TelemetrySnapshot>,
    abort: Arc<watch::Sender<Option<AbortReason>>>,
    events: broadcast::Sender<FleetEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut deadline = Instant::now() + link_timeout;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            received = updates.recv() => match received {
                Ok(snapshot) => {
                    deadline = Instant::now() + link_timeout;
                    if let Some(event) = monitor.evaluate(&snapshot, Instant::now()) {
                        dispatch(event, &abort, &events);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(vehicle = %monitor.vehicle_id, skipped, "failsafe consumer lagged");
                }
                // Sampler stopped; the vehicle unit handles the fault.
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = tokio::time::sleep_until(deadline) => {
                if let Some(event) = monitor.link_lost(link_timeout) {
                    dispatch(event, &abort, &events);
                }
                deadline = Instant::now() + link_timeout;
            }
        }
    }
}

fn dispatch(
    event: FailsafeEvent,
    abort: &watch::Sender<Option<AbortReason>>,
    events: &broadcast::Sender<FleetEvent>,
) {
    error!(
        vehicle = %event.vehicle_id,
        rule = event.rule.as_str(),
        action = ?event.action,
        detail = %event.detail,
        "failsafe triggered"
    );
    abort.send_replace(Some(AbortReason::Failsafe(event.clone())));
    let _ = events.send(FleetEvent::FailsafeTriggered(event));
}
