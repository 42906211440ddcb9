//! # Vehicle Unit
//!
//! Arena entry for one vehicle. The (VehicleLink, MissionExecutor) pair
//! runs inside its own task alongside a sampler task and a failsafe
//! task; no two units share mutable state. Cross-unit access goes
//! through message passing only: a command channel with reply oneshots,
//! watch channels for status and telemetry views, and the abort/replan
//! channels feeding the executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use fleet_domain::{TelemetrySnapshot, VehicleId, VehicleStatus};

use crate::adapter::VehicleAdapter;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::events::FleetEvent;
use crate::executor::{MissionExecutor, StatusPublisher};
use crate::failsafe::{self, AbortReason, FailsafeMonitor};
use crate::link::VehicleLink;
use crate::telemetry::{SamplerExit, SnapshotHistory, TelemetrySampler};
use crate::validator::ValidatedRoute;

const COMMAND_QUEUE_DEPTH: usize = 16;

enum VehicleCommand {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Dispatch {
        route: ValidatedRoute,
        target_altitude_m: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    Land {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable command endpoint for one vehicle unit.
#[derive(Clone)]
pub struct VehicleClient {
    vehicle_id: VehicleId,
    commands: mpsc::Sender<VehicleCommand>,
}

impl VehicleClient {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> VehicleCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| FleetError::UnitUnavailable {
                vehicle_id: self.vehicle_id,
            })?;
        reply_rx.await.map_err(|_| FleetError::UnitUnavailable {
            vehicle_id: self.vehicle_id,
        })
    }

    /// Connect and run the pre-flight health check.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| VehicleCommand::Connect { reply }).await?
    }

    /// Take off, upload the route, and start executing. Resolves once the
    /// vehicle is Executing; the mission continues inside the unit.
    pub async fn dispatch(&self, route: ValidatedRoute, target_altitude_m: f64) -> Result<()> {
        self.request(|reply| VehicleCommand::Dispatch {
            route,
            target_altitude_m,
            reply,
        })
        .await?
    }

    pub async fn land(&self) -> Result<()> {
        self.request(|reply| VehicleCommand::Land { reply }).await?
    }
}

/// Owning handle for one vehicle unit, held by the coordinator.
pub struct VehicleHandle {
    pub vehicle_id: VehicleId,
    client: VehicleClient,
    status: watch::Receiver<VehicleStatus>,
    telemetry: watch::Receiver<Option<TelemetrySnapshot>>,
    history: SnapshotHistory,
    abort: Arc<watch::Sender<Option<AbortReason>>>,
    replan: watch::Sender<Option<ValidatedRoute>>,
    shutdown: watch::Sender<bool>,
    unit_task: JoinHandle<()>,
    sampler_task: JoinHandle<()>,
    failsafe_task: JoinHandle<()>,
}

impl VehicleHandle {
    pub fn client(&self) -> VehicleClient {
        self.client.clone()
    }

    /// Current read-only status view.
    #[must_use]
    pub fn status(&self) -> VehicleStatus {
        self.status.borrow().clone()
    }

    /// Watch channel over the status view, for observers.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<VehicleStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn latest_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.borrow().clone()
    }

    /// Recent snapshots retained for diagnostics.
    #[must_use]
    pub fn telemetry_history(&self) -> Vec<TelemetrySnapshot> {
        self.history.recent()
    }

    /// Queue a replanned route. The executor swaps it in immediately
    /// while Executing, or at the next phase boundary if the vehicle is
    /// inside a critical phase.
    pub fn queue_replan(&self, route: ValidatedRoute) {
        self.replan.send_replace(Some(route));
    }

    /// Stop this vehicle: graceful landing if airborne, disconnect, and
    /// task teardown, all within the given budget. Never affects other
    /// vehicles.
    pub async fn shutdown(self, budget: Duration) {
        let airborne = self
            .telemetry
            .borrow()
            .as_ref()
            .is_some_and(|snapshot| snapshot.in_air);
        if airborne {
            self.abort.send_replace(Some(AbortReason::Shutdown));
        }

        let graceful = timeout(budget, async {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self
                .client
                .commands
                .send(VehicleCommand::Shutdown { reply: reply_tx })
                .await
                .is_ok()
            {
                let _ = reply_rx.await;
            }
        })
        .await
        .is_ok();

        if !graceful {
            warn!(vehicle = %self.vehicle_id, "graceful shutdown timed out, aborting unit task");
            self.unit_task.abort();
        }
        let _ = self.shutdown.send(true);

        let _ = self.sampler_task.await;
        let _ = self.failsafe_task.await;
        if graceful {
            let _ = self.unit_task.await;
        }
    }
}

/// Spawn the three tasks making up one vehicle unit and return its handle.
pub(crate) fn spawn_vehicle(
    config: &FleetConfig,
    vehicle_id: VehicleId,
    adapter: Arc<dyn VehicleAdapter>,
    events: broadcast::Sender<FleetEvent>,
) -> VehicleHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (status_tx, status_rx) = watch::channel(VehicleStatus::offline(vehicle_id));
    let publisher = StatusPublisher::new(Arc::new(status_tx));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (abort_tx, abort_rx) = watch::channel(None);
    let abort_tx = Arc::new(abort_tx);
    let (replan_tx, replan_rx) = watch::channel(None);
    let (link_up_tx, link_up_rx) = watch::channel(false);

    let (sampler, sampler_handles) =
        TelemetrySampler::new(vehicle_id, adapter.clone(), config.telemetry.clone());

    let failsafe_task = tokio::spawn(failsafe::run(
        FailsafeMonitor::new(vehicle_id, config.thresholds.clone(), config.failsafe.clone()),
        config.link.link_timeout,
        sampler_handles.updates.subscribe(),
        abort_tx.clone(),
        events.clone(),
        shutdown_rx.clone(),
    ));

    let sampler_task = tokio::spawn({
        let publisher = publisher.clone();
        let events = events.clone();
        let shutdown_rx = shutdown_rx.clone();
        let mut link_up_rx = link_up_rx;
        async move {
            // Sampling starts once the link is established.
            if link_up_rx.wait_for(|up| *up).await.is_err() {
                return;
            }
            if let SamplerExit::Faulted { failures } = sampler.run(shutdown_rx).await {
                publisher.fault();
                let _ = events.send(FleetEvent::VehicleFaulted {
                    vehicle_id,
                    reason: format!("{failures} consecutive telemetry failures"),
                });
            }
        }
    });

    let link = VehicleLink::new(vehicle_id, adapter.clone(), config.link.clone());
    let executor = MissionExecutor::new(
        vehicle_id,
        adapter,
        config.mission.clone(),
        sampler_handles.latest.clone(),
        abort_rx,
        replan_rx,
        publisher.clone(),
    );
    let unit_task = tokio::spawn(run_unit(
        vehicle_id,
        link,
        executor,
        cmd_rx,
        publisher,
        events,
        config.thresholds.min_satellites,
        abort_tx.clone(),
        link_up_tx,
    ));

    VehicleHandle {
        vehicle_id,
        client: VehicleClient {
            vehicle_id,
            commands: cmd_tx,
        },
        status: status_rx,
        telemetry: sampler_handles.latest,
        history: sampler_handles.history,
        abort: abort_tx,
        replan: replan_tx,
        shutdown: shutdown_tx,
        unit_task,
        sampler_task,
        failsafe_task,
    }
}

/// The unit's command loop, owning the (link, executor) pair.
#[allow(clippy::too_many_arguments)]
async fn run_unit(
    vehicle_id: VehicleId,
    mut link: VehicleLink,
    mut executor: MissionExecutor,
    mut commands: mpsc::Receiver<VehicleCommand>,
    status: StatusPublisher,
    events: broadcast::Sender<FleetEvent>,
    min_satellites: u32,
    abort: Arc<watch::Sender<Option<AbortReason>>>,
    link_up: watch::Sender<bool>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            VehicleCommand::Connect { reply } => {
                let result = if status.is_faulted() {
                    link.mark_faulted();
                    Err(FleetError::VehicleFaulted {
                        vehicle_id,
                        reason: "telemetry fault".into(),
                    })
                } else {
                    connect_sequence(&mut link, min_satellites).await
                };
                status.connection(link.state());
                if result.is_ok() {
                    link_up.send_replace(true);
                    let _ = events.send(FleetEvent::VehicleConnected { vehicle_id });
                }
                let _ = reply.send(result);
            }

            VehicleCommand::Dispatch {
                route,
                target_altitude_m,
                reply,
            } => {
                if status.is_faulted() {
                    link.mark_faulted();
                    let _ = reply.send(Err(FleetError::VehicleFaulted {
                        vehicle_id,
                        reason: "telemetry fault".into(),
                    }));
                    continue;
                }

                // A stale abort from an earlier mission must not preempt
                // this one.
                abort.send_replace(None);
                executor.reset();
                let plan_id = route.plan_id();

                let prepared = async {
                    executor.arm_and_takeoff(&link, target_altitude_m).await?;
                    executor.upload_mission(route).await?;
                    executor.start_mission().await
                }
                .await;

                match prepared {
                    Ok(()) => {
                        // The caller observes Executing; the mission keeps
                        // running inside this task.
                        let _ = reply.send(Ok(()));
                        match executor.execute_mission().await {
                            Ok(()) => {
                                let _ = events.send(FleetEvent::MissionCompleted {
                                    vehicle_id,
                                    plan_id,
                                });
                            }
                            Err(err) => {
                                if matches!(err, FleetError::ForceLand { .. }) {
                                    let _ =
                                        events.send(FleetEvent::ForceLandAlert { vehicle_id });
                                }
                                let _ = events.send(FleetEvent::MissionAborted {
                                    vehicle_id,
                                    reason: err.to_string(),
                                });
                            }
                        }
                    }
                    Err(err) => {
                        if matches!(err, FleetError::ForceLand { .. }) {
                            let _ = events.send(FleetEvent::ForceLandAlert { vehicle_id });
                        }
                        let _ = reply.send(Err(err));
                    }
                }
            }

            VehicleCommand::Land { reply } => {
                let result = executor.land().await;
                if matches!(result, Err(FleetError::ForceLand { .. })) {
                    let _ = events.send(FleetEvent::ForceLandAlert { vehicle_id });
                }
                let _ = reply.send(result);
            }

            VehicleCommand::Shutdown { reply } => {
                if let Err(err) = executor.land().await {
                    warn!(vehicle = %vehicle_id, error = %err, "landing during shutdown failed");
                }
                link.disconnect().await;
                status.connection(link.state());
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!(vehicle = %vehicle_id, "vehicle unit stopped");
}

async fn connect_sequence(link: &mut VehicleLink, min_satellites: u32) -> Result<()> {
    link.connect().await?;
    link.wait_for_global_position(min_satellites).await
}
