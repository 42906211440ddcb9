//! # Mission Executor
//!
//! Per-vehicle state machine driving arm/takeoff/upload/execute/land:
//! Idle → ArmingTakeoff → Uploading → Executing → Landing → Completed,
//! with Aborted reachable from any non-terminal state. Every wait
//! suspends on telemetry-derived conditions and is preemptible by a
//! failsafe abort; every external round trip carries a bounded timeout
//! with abort-to-land as the deterministic fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use fleet_domain::{
    ConnectionState, ExecutorPhase, MissionProgress, TelemetrySnapshot, VehicleId, VehicleStatus,
    Waypoint,
};
use uuid::Uuid;

use crate::adapter::{AdapterError, MissionItem, VehicleAdapter};
use crate::config::MissionConfig;
use crate::error::{FleetError, Result};
use crate::failsafe::{AbortReason, EmergencyAction, FailsafeEvent};
use crate::link::VehicleLink;
use crate::validator::ValidatedRoute;

/// Write half of a vehicle's status view. Shared by the unit task, the
/// executor, and the sampler fault path; observers hold the watch
/// receiver.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: Arc<watch::Sender<VehicleStatus>>,
}

impl StatusPublisher {
    pub fn new(tx: Arc<watch::Sender<VehicleStatus>>) -> Self {
        Self { tx }
    }

    pub fn connection(&self, connection: ConnectionState) {
        self.tx.send_modify(|status| status.connection = connection);
    }

    pub fn phase(&self, phase: ExecutorPhase) {
        self.tx.send_modify(|status| status.phase = phase);
    }

    pub fn mission(&self, mission: Option<MissionProgress>) {
        self.tx.send_modify(|status| status.mission = mission);
    }

    pub fn fault(&self) {
        self.tx.send_modify(|status| {
            status.faulted = true;
            status.connection = ConnectionState::Faulted;
        });
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.tx.borrow().faulted
    }
}

#[derive(Debug, Clone)]
struct UploadedMission {
    plan_id: Uuid,
    waypoints: Vec<Waypoint>,
}

/// Outcome of a bounded, possibly preemptible telemetry wait.
enum WaitOutcome {
    Met,
    TimedOut,
    Aborted(AbortReason),
    /// The telemetry feed ended; the vehicle is faulted.
    Lost,
}

/// Outcome of an unbounded waypoint-arrival wait.
enum Arrival {
    Arrived,
    Aborted(AbortReason),
    Replanned(ValidatedRoute),
    Lost,
}

pub struct MissionExecutor {
    vehicle_id: VehicleId,
    adapter: Arc<dyn VehicleAdapter>,
    config: MissionConfig,
    phase: ExecutorPhase,
    uploaded: Option<UploadedMission>,
    progress: Option<MissionProgress>,
    telemetry: watch::Receiver<Option<TelemetrySnapshot>>,
    abort: watch::Receiver<Option<AbortReason>>,
    replan: watch::Receiver<Option<ValidatedRoute>>,
    status: StatusPublisher,
}

impl MissionExecutor {
    pub fn new(
        vehicle_id: VehicleId,
        adapter: Arc<dyn VehicleAdapter>,
        config: MissionConfig,
        telemetry: watch::Receiver<Option<TelemetrySnapshot>>,
        abort: watch::Receiver<Option<AbortReason>>,
        replan: watch::Receiver<Option<ValidatedRoute>>,
        status: StatusPublisher,
    ) -> Self {
        Self {
            vehicle_id,
            adapter,
            config,
            phase: ExecutorPhase::Idle,
            uploaded: None,
            progress: None,
            telemetry,
            abort,
            replan,
            status,
        }
    }

    pub fn phase(&self) -> ExecutorPhase {
        self.phase
    }

    pub fn progress(&self) -> Option<&MissionProgress> {
        self.progress.as_ref()
    }

    /// Return a terminal executor to Idle for a fresh dispatch.
    pub fn reset(&mut self) {
        if self.phase.is_terminal() {
            self.uploaded = None;
            self.progress = None;
            self.status.mission(None);
            self.set_phase(ExecutorPhase::Idle);
        }
    }

    /// Arm and climb to the target altitude. Requires the paired link to
    /// be Ready; blocks until the altitude is within tolerance or the
    /// takeoff budget elapses, which aborts to land.
    pub async fn arm_and_takeoff(
        &mut self,
        link: &VehicleLink,
        target_altitude_m: f64,
    ) -> Result<()> {
        if !link.is_ready() {
            return Err(FleetError::Preflight {
                vehicle_id: self.vehicle_id,
                state: link.state(),
            });
        }
        if self.phase != ExecutorPhase::Idle {
            return Err(FleetError::MissionActive {
                vehicle_id: self.vehicle_id,
                phase: self.phase,
            });
        }

        self.set_phase(ExecutorPhase::ArmingTakeoff);
        info!(vehicle = %self.vehicle_id, target_altitude_m, "arming and taking off");

        let adapter = self.adapter.clone();
        self.guarded_command("arm", adapter.arm()).await?;
        let adapter = self.adapter.clone();
        self.guarded_command("takeoff", adapter.takeoff(target_altitude_m))
            .await?;

        let tolerance = self.config.altitude_tolerance_m;
        let outcome = self
            .wait_until(self.config.takeoff_timeout, true, move |snapshot| {
                (snapshot.relative_altitude_m - target_altitude_m).abs() <= tolerance
            })
            .await;

        match outcome {
            WaitOutcome::Met => {
                info!(vehicle = %self.vehicle_id, "reached takeoff altitude");
                Ok(())
            }
            WaitOutcome::TimedOut => {
                warn!(vehicle = %self.vehicle_id, "takeoff altitude not reached, aborting to land");
                self.abort_to_land().await;
                Err(FleetError::Takeoff {
                    vehicle_id: self.vehicle_id,
                    target_m: target_altitude_m,
                    timeout: self.config.takeoff_timeout,
                })
            }
            WaitOutcome::Aborted(reason) => Err(self.handle_abort(reason).await),
            WaitOutcome::Lost => Err(self.handle_lost().await),
        }
    }

    /// Upload a validated route. Idempotent: a re-upload replaces any
    /// previously queued mission and resets progress.
    pub async fn upload_mission(&mut self, route: ValidatedRoute) -> Result<()> {
        if self.phase == ExecutorPhase::Landing || self.phase.is_terminal() {
            return Err(FleetError::MissionActive {
                vehicle_id: self.vehicle_id,
                phase: self.phase,
            });
        }

        self.set_phase(ExecutorPhase::Uploading);
        let items: Vec<MissionItem> = route.waypoints().iter().map(MissionItem::from_waypoint).collect();
        let adapter = self.adapter.clone();
        self.guarded_command("upload_mission", adapter.upload_mission(items))
            .await?;

        info!(
            vehicle = %self.vehicle_id,
            plan = %route.plan_id(),
            waypoints = route.waypoints().len(),
            "mission uploaded"
        );
        self.progress = Some(MissionProgress {
            plan_id: route.plan_id(),
            current_index: 0,
            total_waypoints: route.waypoints().len(),
            started_at: None,
            completed_at: None,
        });
        self.status.mission(self.progress.clone());
        self.uploaded = Some(UploadedMission {
            plan_id: route.plan_id(),
            waypoints: route.into_waypoints(),
        });
        Ok(())
    }

    /// Start the uploaded mission: acknowledge the start command and move
    /// to Executing. [`execute_mission`](Self::execute_mission) drives the
    /// waypoints from there.
    pub async fn start_mission(&mut self) -> Result<()> {
        if self.uploaded.is_none() {
            return Err(FleetError::NoMission {
                vehicle_id: self.vehicle_id,
            });
        }
        if self.phase != ExecutorPhase::Uploading {
            return Err(FleetError::MissionActive {
                vehicle_id: self.vehicle_id,
                phase: self.phase,
            });
        }

        let adapter = self.adapter.clone();
        self.guarded_command("start_mission", adapter.start_mission())
            .await?;
        if let Some(progress) = &mut self.progress {
            progress.started_at = Some(Utc::now());
        }
        self.status.mission(self.progress.clone());
        self.set_phase(ExecutorPhase::Executing);
        info!(vehicle = %self.vehicle_id, "mission started");
        Ok(())
    }

    /// Drive the mission to completion: advance the waypoint index as the
    /// vehicle reports arrival within the acceptance radius, honor loiter
    /// durations, apply replans at phase boundaries, then land.
    pub async fn execute_mission(&mut self) -> Result<()> {
        if self.phase != ExecutorPhase::Executing {
            return Err(FleetError::MissionActive {
                vehicle_id: self.vehicle_id,
                phase: self.phase,
            });
        }

        loop {
            // Phase boundary: a replan queued during a critical phase is
            // applied here, before the next leg.
            if let Some(route) = self.pending_replan() {
                self.apply_replan(route).await?;
            }

            let Some(mission) = &self.uploaded else {
                return Err(FleetError::NoMission {
                    vehicle_id: self.vehicle_id,
                });
            };
            let index = self.progress.as_ref().map_or(0, |p| p.current_index);
            if index >= mission.waypoints.len() {
                break;
            }
            let waypoint = mission.waypoints[index];

            match self.wait_arrival(&waypoint).await {
                Arrival::Arrived => {
                    debug!(
                        vehicle = %self.vehicle_id,
                        index,
                        action = waypoint.action().as_str(),
                        progress_pct = self.progress.as_ref().map_or(0.0, MissionProgress::progress_pct),
                        "waypoint reached"
                    );
                    if let Some(loiter) = waypoint.loiter() {
                        match self.wait_until(loiter, true, |_| false).await {
                            // The full loiter elapsed.
                            WaitOutcome::TimedOut | WaitOutcome::Met => {}
                            WaitOutcome::Aborted(reason) => {
                                return Err(self.handle_abort(reason).await)
                            }
                            WaitOutcome::Lost => return Err(self.handle_lost().await),
                        }
                    }
                    if let Some(progress) = &mut self.progress {
                        progress.current_index = index + 1;
                    }
                    self.status.mission(self.progress.clone());
                }
                Arrival::Replanned(route) => self.apply_replan(route).await?,
                Arrival::Aborted(reason) => return Err(self.handle_abort(reason).await),
                Arrival::Lost => return Err(self.handle_lost().await),
            }
        }

        info!(vehicle = %self.vehicle_id, "route complete, landing");
        if let Err(err) = self.descend_and_wait().await {
            self.set_phase(ExecutorPhase::Aborted);
            return Err(err);
        }
        if let Some(progress) = &mut self.progress {
            progress.completed_at = Some(Utc::now());
        }
        self.status.mission(self.progress.clone());
        self.set_phase(ExecutorPhase::Completed);
        info!(vehicle = %self.vehicle_id, "mission completed");
        Ok(())
    }

    /// Command descent and block until grounded. Idempotent: on an
    /// already-landed vehicle this is a no-op success.
    pub async fn land(&mut self) -> Result<()> {
        if !self.is_airborne() && self.phase != ExecutorPhase::Landing {
            debug!(vehicle = %self.vehicle_id, "land requested while already grounded");
            return Ok(());
        }

        let abandoned = self
            .progress
            .as_ref()
            .is_some_and(|p| p.current_index < p.total_waypoints);
        match self.descend_and_wait().await {
            Ok(()) => {
                self.set_phase(if abandoned {
                    ExecutorPhase::Aborted
                } else {
                    ExecutorPhase::Completed
                });
                Ok(())
            }
            Err(err) => {
                self.set_phase(ExecutorPhase::Aborted);
                Err(err)
            }
        }
    }

    fn set_phase(&mut self, phase: ExecutorPhase) {
        if self.phase != phase {
            debug!(vehicle = %self.vehicle_id, from = ?self.phase, to = ?phase, "phase transition");
            self.phase = phase;
            self.status.phase(phase);
        }
    }

    fn latest(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.borrow().clone()
    }

    fn is_airborne(&self) -> bool {
        self.latest().is_some_and(|snapshot| snapshot.in_air)
    }

    /// Issue one protocol command with the bounded ack timeout.
    async fn command<F>(&mut self, name: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), AdapterError>>,
    {
        match timeout(self.config.command_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(FleetError::CommandRejected {
                vehicle_id: self.vehicle_id,
                command: name,
                reason: err.to_string(),
            }),
            Err(_) => Err(FleetError::CommandTimeout {
                vehicle_id: self.vehicle_id,
                command: name,
                timeout: self.config.command_timeout,
            }),
        }
    }

    /// Command with the deterministic fallback: on failure the executor
    /// aborts, landing first if airborne.
    async fn guarded_command<F>(&mut self, name: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), AdapterError>>,
    {
        match self.command(name, fut).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(vehicle = %self.vehicle_id, command = name, error = %err, "command failed");
                self.abort_to_land().await;
                Err(err)
            }
        }
    }

    /// Deterministic fallback path: land if airborne, then mark Aborted.
    async fn abort_to_land(&mut self) {
        if self.is_airborne() {
            if let Err(err) = self.descend_and_wait().await {
                error!(vehicle = %self.vehicle_id, error = %err, "abort-to-land failed");
            }
        }
        self.set_phase(ExecutorPhase::Aborted);
    }

    async fn handle_abort(&mut self, reason: AbortReason) -> FleetError {
        match reason {
            AbortReason::Failsafe(event) => {
                warn!(
                    vehicle = %self.vehicle_id,
                    rule = event.rule.as_str(),
                    "failsafe preempted mission, abandoning remaining waypoints"
                );
                self.emergency_descend(&event).await;
                FleetError::FailsafeTriggered {
                    vehicle_id: self.vehicle_id,
                    rule: event.rule,
                }
            }
            AbortReason::Shutdown => {
                info!(vehicle = %self.vehicle_id, "shutdown requested, landing");
                self.abort_to_land().await;
                FleetError::Shutdown {
                    vehicle_id: self.vehicle_id,
                }
            }
        }
    }

    async fn handle_lost(&mut self) -> FleetError {
        error!(vehicle = %self.vehicle_id, "telemetry feed lost, best-effort landing");
        let adapter = self.adapter.clone();
        if let Err(err) = self.command("land", adapter.land()).await {
            error!(vehicle = %self.vehicle_id, error = %err, "best-effort land failed");
        }
        self.set_phase(ExecutorPhase::Aborted);
        FleetError::VehicleFaulted {
            vehicle_id: self.vehicle_id,
            reason: "telemetry feed ended".into(),
        }
    }

    async fn emergency_descend(&mut self, event: &FailsafeEvent) {
        let result = match event.action {
            EmergencyAction::Land => self.descend_and_wait().await,
            EmergencyAction::ReturnToLaunch => self.return_and_wait().await,
        };
        if let Err(err) = result {
            error!(vehicle = %self.vehicle_id, error = %err, "emergency descent failed");
        }
        self.set_phase(ExecutorPhase::Aborted);
    }

    /// Land command plus grounded confirmation. Not preemptible: once
    /// Landing, a further abort changes nothing.
    async fn descend_and_wait(&mut self) -> Result<()> {
        self.set_phase(ExecutorPhase::Landing);
        let adapter = self.adapter.clone();
        self.command("land", adapter.land()).await?;

        match self
            .wait_until(self.config.land_timeout, false, |snapshot| !snapshot.in_air)
            .await
        {
            WaitOutcome::Met => {
                info!(vehicle = %self.vehicle_id, "landed");
                Ok(())
            }
            WaitOutcome::TimedOut | WaitOutcome::Lost => Err(FleetError::ForceLand {
                vehicle_id: self.vehicle_id,
                timeout: self.config.land_timeout,
            }),
            WaitOutcome::Aborted(_) => unreachable!("landing wait is not preemptible"),
        }
    }

    async fn return_and_wait(&mut self) -> Result<()> {
        self.set_phase(ExecutorPhase::Landing);
        let adapter = self.adapter.clone();
        self.command("return_to_launch", adapter.return_to_launch())
            .await?;

        match self
            .wait_until(self.config.land_timeout, false, |snapshot| !snapshot.in_air)
            .await
        {
            WaitOutcome::Met => {
                info!(vehicle = %self.vehicle_id, "returned and landed");
                Ok(())
            }
            WaitOutcome::TimedOut | WaitOutcome::Lost => Err(FleetError::ForceLand {
                vehicle_id: self.vehicle_id,
                timeout: self.config.land_timeout,
            }),
            WaitOutcome::Aborted(_) => unreachable!("landing wait is not preemptible"),
        }
    }

    fn pending_replan(&mut self) -> Option<ValidatedRoute> {
        let current = self.uploaded.as_ref().map(|m| m.plan_id);
        let pending = self.replan.borrow_and_update().clone();
        pending.filter(|route| Some(route.plan_id()) != current)
    }

    /// Swap in a replanned route: replace the uploaded mission, restart
    /// from its first waypoint.
    async fn apply_replan(&mut self, route: ValidatedRoute) -> Result<()> {
        info!(vehicle = %self.vehicle_id, plan = %route.plan_id(), "applying replanned route");
        let items: Vec<MissionItem> = route.waypoints().iter().map(MissionItem::from_waypoint).collect();
        let adapter = self.adapter.clone();
        self.guarded_command("upload_mission", adapter.upload_mission(items))
            .await?;
        let adapter = self.adapter.clone();
        self.guarded_command("start_mission", adapter.start_mission())
            .await?;

        self.progress = Some(MissionProgress {
            plan_id: route.plan_id(),
            current_index: 0,
            total_waypoints: route.waypoints().len(),
            started_at: Some(Utc::now()),
            completed_at: None,
        });
        self.status.mission(self.progress.clone());
        self.uploaded = Some(UploadedMission {
            plan_id: route.plan_id(),
            waypoints: route.into_waypoints(),
        });
        Ok(())
    }

    /// Bounded wait for a telemetry-derived condition. When preemptible,
    /// a failsafe abort wins over the condition.
    async fn wait_until(
        &mut self,
        limit: Duration,
        preemptible: bool,
        condition: impl Fn(&TelemetrySnapshot) -> bool,
    ) -> WaitOutcome {
        if self
            .latest()
            .as_ref()
            .is_some_and(|snapshot| condition(snapshot))
        {
            return WaitOutcome::Met;
        }

        let deadline = Instant::now() + limit;
        let Self {
            telemetry, abort, ..
        } = self;

        loop {
            tokio::select! {
                biased;
                changed = abort.changed(), if preemptible => {
                    if changed.is_err() {
                        return WaitOutcome::Lost;
                    }
                    if let Some(reason) = abort.borrow_and_update().clone() {
                        return WaitOutcome::Aborted(reason);
                    }
                }
                changed = telemetry.changed() => {
                    if changed.is_err() {
                        return WaitOutcome::Lost;
                    }
                    let met = telemetry
                        .borrow_and_update()
                        .as_ref()
                        .is_some_and(&condition);
                    if met {
                        return WaitOutcome::Met;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            }
        }
    }

    /// Unbounded wait for arrival at one waypoint. Preemptible by abort
    /// and, while Executing, by an immediate replan; the link-lost
    /// failsafe bounds the wait if telemetry stops.
    async fn wait_arrival(&mut self, waypoint: &Waypoint) -> Arrival {
        let radius = self.config.acceptance_radius_m;
        let target = *waypoint.coordinate();
        let arrived =
            |snapshot: &TelemetrySnapshot| snapshot.position.horizontal_distance_m(&target) <= radius;

        if self.latest().as_ref().is_some_and(arrived) {
            return Arrival::Arrived;
        }

        let current_plan = self.uploaded.as_ref().map(|m| m.plan_id);
        let Self {
            telemetry,
            abort,
            replan,
            ..
        } = self;
        let mut replan_open = true;

        loop {
            tokio::select! {
                biased;
                changed = abort.changed() => {
                    if changed.is_err() {
                        return Arrival::Lost;
                    }
                    if let Some(reason) = abort.borrow_and_update().clone() {
                        return Arrival::Aborted(reason);
                    }
                }
                changed = replan.changed(), if replan_open => {
                    if changed.is_err() {
                        replan_open = false;
                    } else if let Some(route) = replan.borrow_and_update().clone() {
                        if Some(route.plan_id()) != current_plan {
                            return Arrival::Replanned(route);
                        }
                    }
                }
                changed = telemetry.changed() => {
                    if changed.is_err() {
                        return Arrival::Lost;
                    }
                    let met = telemetry.borrow_and_update().as_ref().is_some_and(arrived);
                    if met {
                        return Arrival::Arrived;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkConfig, TelemetryConfig};
    use crate::failsafe::FailsafeRule;
    use crate::telemetry::{SamplerExit, TelemetrySampler};
    use crate::testing::MockAdapter;
    use crate::validator::ValidatedRoute;
    use fleet_domain::{GeoCoordinate, WaypointAction};
    use tokio::task::JoinHandle;

    struct Harness {
        adapter: Arc<MockAdapter>,
        link: VehicleLink,
        executor: MissionExecutor,
        abort_tx: watch::Sender<Option<AbortReason>>,
        replan_tx: watch::Sender<Option<ValidatedRoute>>,
        status_rx: watch::Receiver<VehicleStatus>,
        shutdown_tx: watch::Sender<bool>,
        sampler_task: JoinHandle<SamplerExit>,
    }

    impl Harness {
        async fn ready() -> Self {
            let adapter = Arc::new(MockAdapter::healthy());
            let (sampler, handles) = TelemetrySampler::new(
                VehicleId(1),
                adapter.clone(),
                TelemetryConfig {
                    sample_interval: Duration::from_millis(100),
                    failure_limit: 5,
                    history_depth: 10,
                },
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sampler_task = tokio::spawn(sampler.run(shutdown_rx));

            let (abort_tx, abort_rx) = watch::channel(None);
            let (replan_tx, replan_rx) = watch::channel(None);
            let (status_tx, status_rx) = watch::channel(VehicleStatus::offline(VehicleId(1)));

            let config = MissionConfig {
                command_timeout: Duration::from_millis(500),
                takeoff_timeout: Duration::from_secs(5),
                land_timeout: Duration::from_secs(5),
                ..MissionConfig::default()
            };
            let executor = MissionExecutor::new(
                VehicleId(1),
                adapter.clone(),
                config,
                handles.latest,
                abort_rx,
                replan_rx,
                StatusPublisher::new(Arc::new(status_tx)),
            );

            let mut link = VehicleLink::new(VehicleId(1), adapter.clone(), LinkConfig::default());
            link.connect().await.unwrap();
            link.wait_for_global_position(6).await.unwrap();

            Self {
                adapter,
                link,
                executor,
                abort_tx,
                replan_tx,
                status_rx,
                shutdown_tx,
                sampler_task,
            }
        }

        async fn finish(self) {
            self.shutdown_tx.send(true).unwrap();
            let _ = self.sampler_task.await;
        }
    }

    fn wp(lat: f64, lon: f64, alt: f64) -> Waypoint {
        Waypoint::new(
            GeoCoordinate::new(lat, lon, alt).unwrap(),
            5.0,
            WaypointAction::Search,
        )
        .unwrap()
    }

    fn route(waypoints: Vec<Waypoint>) -> ValidatedRoute {
        ValidatedRoute::for_tests(Uuid::new_v4(), VehicleId(1), waypoints)
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_idle_to_completed() {
        let mut h = Harness::ready().await;
        let waypoints = vec![
            wp(47.398_371, 8.546_164, 20.0),
            wp(47.398_371, 8.546_564, 20.0),
            wp(47.398_371, 8.546_964, 20.0),
        ];

        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();
        assert_eq!(h.executor.phase(), ExecutorPhase::ArmingTakeoff);

        h.executor.upload_mission(route(waypoints)).await.unwrap();
        h.executor.start_mission().await.unwrap();
        assert_eq!(h.executor.phase(), ExecutorPhase::Executing);

        h.executor.execute_mission().await.unwrap();
        assert_eq!(h.executor.phase(), ExecutorPhase::Completed);
        let progress = h.executor.progress().unwrap();
        assert_eq!(progress.current_index, 3);
        assert_eq!(progress.total_waypoints, 3);
        assert!(progress.completed_at.is_some());

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_requires_ready_link() {
        let mut h = Harness::ready().await;
        h.link.disconnect().await;

        let err = h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap_err();
        assert!(matches!(err, FleetError::Preflight { .. }));
        assert_eq!(h.executor.phase(), ExecutorPhase::Idle);

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_requires_prior_phase_and_replaces() {
        let mut h = Harness::ready().await;
        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();

        let first = route(vec![
            wp(47.398_371, 8.546_164, 20.0),
            wp(47.398_371, 8.546_564, 20.0),
        ]);
        h.executor.upload_mission(first).await.unwrap();

        // Re-upload replaces the queued mission and resets progress.
        let second = route(vec![
            wp(47.398_771, 8.546_164, 20.0),
            wp(47.398_771, 8.546_564, 20.0),
            wp(47.398_771, 8.546_964, 20.0),
        ]);
        let second_id = second.plan_id();
        h.executor.upload_mission(second).await.unwrap();

        let progress = h.executor.progress().unwrap();
        assert_eq!(progress.plan_id, second_id);
        assert_eq!(progress.total_waypoints, 3);
        assert_eq!(progress.current_index, 0);
        assert_eq!(h.adapter.uploaded_items().len(), 3);

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_upload_fails() {
        let mut h = Harness::ready().await;
        let err = h.executor.start_mission().await.unwrap_err();
        assert!(matches!(err, FleetError::NoMission { .. }));
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeoff_timeout_aborts_to_land() {
        let mut h = Harness::ready().await;
        h.adapter.deny_climb();

        let err = h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap_err();
        assert!(matches!(err, FleetError::Takeoff { .. }));
        assert_eq!(h.executor.phase(), ExecutorPhase::Aborted);
        assert!(h.adapter.commands().contains(&"land"));

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failsafe_abort_preempts_execution() {
        let mut h = Harness::ready().await;
        h.adapter.hold_position();

        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();
        h.executor
            .upload_mission(route(vec![
                wp(47.398_371, 8.546_164, 20.0),
                wp(47.398_371, 8.546_564, 20.0),
            ]))
            .await
            .unwrap();
        h.executor.start_mission().await.unwrap();

        // Preemption arrives while the executor waits for arrival.
        h.abort_tx.send_replace(Some(AbortReason::Failsafe(FailsafeEvent {
            vehicle_id: VehicleId(1),
            rule: FailsafeRule::LowBattery,
            action: EmergencyAction::Land,
            detail: "battery 20.0% below minimum 25.0%".into(),
            at: Utc::now(),
        })));

        let err = h.executor.execute_mission().await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::FailsafeTriggered {
                rule: FailsafeRule::LowBattery,
                ..
            }
        ));
        assert_eq!(h.executor.phase(), ExecutorPhase::Aborted);
        assert!(h.adapter.commands().contains(&"land"));
        assert_eq!(h.status_rx.borrow().phase, ExecutorPhase::Aborted);

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_to_launch_emergency_action() {
        let mut h = Harness::ready().await;
        h.adapter.hold_position();

        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();
        h.executor
            .upload_mission(route(vec![
                wp(47.398_371, 8.546_164, 20.0),
                wp(47.398_371, 8.546_564, 20.0),
            ]))
            .await
            .unwrap();
        h.executor.start_mission().await.unwrap();

        h.abort_tx.send_replace(Some(AbortReason::Failsafe(FailsafeEvent {
            vehicle_id: VehicleId(1),
            rule: FailsafeRule::LowBattery,
            action: EmergencyAction::ReturnToLaunch,
            detail: "battery 18.0% below minimum 25.0%".into(),
            at: Utc::now(),
        })));

        let err = h.executor.execute_mission().await.unwrap_err();
        assert!(matches!(err, FleetError::FailsafeTriggered { .. }));
        assert_eq!(h.executor.phase(), ExecutorPhase::Aborted);
        assert!(h.adapter.commands().contains(&"return_to_launch"));

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_land_is_idempotent_when_grounded() {
        let mut h = Harness::ready().await;

        h.executor.land().await.unwrap();
        h.executor.land().await.unwrap();
        // No descent was ever commanded.
        assert!(!h.adapter.commands().contains(&"land"));

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_landing_escalates() {
        let mut h = Harness::ready().await;
        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();
        h.adapter.ignore_land();

        let err = h.executor.land().await.unwrap_err();
        assert!(matches!(err, FleetError::ForceLand { .. }));
        assert_eq!(h.executor.phase(), ExecutorPhase::Aborted);

        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_replan_swaps_route_at_phase_boundary() {
        let mut h = Harness::ready().await;
        h.adapter.hold_position();

        h.executor.arm_and_takeoff(&h.link, 20.0).await.unwrap();
        h.executor
            .upload_mission(route(vec![
                wp(47.398_371, 8.546_164, 20.0),
                wp(47.398_371, 8.546_564, 20.0),
            ]))
            .await
            .unwrap();
        h.executor.start_mission().await.unwrap();

        let replacement = route(vec![
            wp(47.398_771, 8.546_164, 20.0),
            wp(47.398_771, 8.546_564, 20.0),
            wp(47.398_771, 8.546_964, 20.0),
        ]);
        let replacement_id = replacement.plan_id();
        h.replan_tx.send_replace(Some(replacement));
        h.adapter.release_position();

        h.executor.execute_mission().await.unwrap();
        assert_eq!(h.executor.phase(), ExecutorPhase::Completed);
        let progress = h.executor.progress().unwrap();
        assert_eq!(progress.plan_id, replacement_id);
        assert_eq!(progress.current_index, 3);

        h.finish().await;
    }
}
