//! Search-Fleet Simulation CLI
//!
//! Runs a full multi-vehicle search mission against in-process simulated
//! vehicles: connect, validate, dispatch, tick until the fleet lands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet_core::{FleetConfig, FleetCoordinator, VehicleEndpoint};
use fleet_domain::{AlertSeverity, ExecutorPhase, GeoCoordinate, VehicleId};
use fleet_sim::{SearchPatternBuilder, SimProfile, SimulatedVehicle};

#[derive(Parser, Debug)]
#[command(name = "fleet-sim")]
#[command(about = "Simulate a multi-vehicle waypoint search mission")]
struct Args {
    /// Number of vehicles
    #[arg(short, long, default_value = "3")]
    vehicles: u32,

    /// Sweep altitude in meters
    #[arg(long, default_value = "20.0")]
    altitude: f64,

    /// Sweep speed in m/s
    #[arg(long, default_value = "5.0")]
    speed: f64,

    /// Track spacing in meters
    #[arg(long, default_value = "25.0")]
    spacing: f64,

    /// Status tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "1800")]
    max_runtime_s: u64,

    /// Print the final fleet view as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fleet_sim=info".parse()?)
                .add_directive("fleet_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = FleetConfig::from_env();
    config.vehicles = (1..=args.vehicles)
        .map(|i| VehicleEndpoint {
            vehicle_id: VehicleId(i),
            endpoint: format!("sim://vehicle-{i}"),
        })
        .collect();
    config.mission.default_takeoff_altitude_m = args.altitude;

    info!(
        vehicles = args.vehicles,
        area_radius_m = config.search_area.radius_m(),
        "starting search-fleet simulation"
    );

    let mut coordinator = FleetCoordinator::new(config.clone());
    let center = *config.search_area.center();
    for endpoint in &config.vehicles {
        // Park the airframes a few meters apart along the apron.
        let start = GeoCoordinate::new(
            center.latitude(),
            center.longitude() + f64::from(endpoint.vehicle_id.0) * 0.000_07,
            0.0,
        )?;
        let profile = SimProfile {
            start,
            ..SimProfile::default()
        };
        info!(vehicle = %endpoint.vehicle_id, endpoint = %endpoint.endpoint, "registering vehicle");
        coordinator.add_vehicle(
            endpoint.vehicle_id,
            Arc::new(SimulatedVehicle::new(profile)),
        )?;
    }

    let results = coordinator.connect_all().await;
    let connected = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!(connected, total = results.len(), "fleet connected");
    if connected == 0 {
        anyhow::bail!("no vehicles connected");
    }

    // Surface fleet events as they happen.
    let mut events = coordinator.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.severity() {
                AlertSeverity::Critical => error!(?event, "fleet event"),
                AlertSeverity::Warning => warn!(?event, "fleet event"),
                AlertSeverity::Info => info!(?event, "fleet event"),
            }
        }
    });

    let ids = coordinator.vehicle_ids();
    let plan = SearchPatternBuilder::new(config.search_area)
        .altitude_m(args.altitude)
        .speed_mps(args.speed)
        .track_spacing_m(args.spacing)
        .plan_for(&ids)?;
    info!(
        plan = %plan.plan_id(),
        strategy = %plan.metadata().strategy_summary,
        eta_s = plan.metadata().estimated_duration.as_secs(),
        "dispatching plan"
    );

    let report = coordinator.dispatch_plan(&plan).await?;
    for (vehicle_id, err) in &report.failed {
        warn!(vehicle = %vehicle_id, error = %err, "vehicle failed to start");
    }
    if report.succeeded.is_empty() {
        anyhow::bail!("no vehicle started the mission");
    }

    // Tick until every vehicle has landed or faulted.
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms));
    loop {
        ticker.tick().await;
        let fleet = coordinator.aggregate_telemetry();
        info!(
            airborne = fleet.summary.airborne,
            missions = fleet.summary.missions_active,
            faulted = fleet.summary.faulted,
            avg_battery = fleet.summary.average_battery_pct.unwrap_or(0.0),
            "tick"
        );

        let all_settled = coordinator.vehicle_ids().iter().all(|id| {
            coordinator.status_of(*id).is_ok_and(|status| {
                status.faulted
                    || status.phase.is_terminal()
                    || status.phase == ExecutorPhase::Idle
            })
        });
        if all_settled {
            break;
        }
        if started.elapsed() > Duration::from_secs(args.max_runtime_s) {
            warn!("runtime limit reached before the fleet settled");
            break;
        }
    }

    let fleet = coordinator.aggregate_telemetry();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&fleet)?);
    } else {
        for vehicle in &fleet.vehicles {
            info!(
                vehicle = %vehicle.vehicle_id,
                in_air = vehicle.in_air,
                battery_pct = vehicle.battery.map_or(0.0, |b| b.percent),
                "final state"
            );
        }
    }
    for id in coordinator.vehicle_ids() {
        let status = coordinator.status_of(id)?;
        if status.faulted {
            let history = coordinator.telemetry_history(id)?;
            warn!(
                vehicle = %id,
                retained_snapshots = history.len(),
                last_seq = history.last().map_or(0, |s| s.seq),
                "vehicle faulted during the run"
            );
        }
    }

    coordinator.shutdown().await;
    info!("simulation complete");
    Ok(())
}
