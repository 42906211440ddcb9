//! # Core Configuration
//!
//! Typed configuration consumed by the core. Loading is owned by the
//! external configuration layer; `from_env` is provided for binaries in
//! the same shape the rest of the stack uses. Unparsable values fall back
//! to defaults.

use std::env;
use std::time::Duration;

use fleet_domain::{GeoCoordinate, SafetyThresholds, SearchArea, VehicleId};

use crate::failsafe::EmergencyAction;

/// Connection endpoint for one vehicle.
#[derive(Debug, Clone)]
pub struct VehicleEndpoint {
    pub vehicle_id: VehicleId,
    pub endpoint: String,
}

/// Link-layer timing and retry limits.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Handshake timeout per connect attempt
    pub connect_timeout: Duration,

    /// Connect retries before the vehicle is given up on
    pub connect_retries: u32,

    /// Initial backoff between connect attempts; doubles per attempt
    pub connect_backoff: Duration,

    /// Total budget for the pre-flight global-position check
    pub health_check_timeout: Duration,

    /// No snapshot within this window counts as a lost link
    pub link_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connect_retries: 3,
            connect_backoff: Duration::from_secs(1),
            health_check_timeout: Duration::from_secs(30),
            link_timeout: Duration::from_secs(5),
        }
    }
}

/// Telemetry sampling configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Sampling interval (default 1 Hz)
    pub sample_interval: Duration,

    /// Consecutive read failures before the vehicle is declared Faulted
    pub failure_limit: u32,

    /// Snapshots retained per vehicle for diagnostics
    pub history_depth: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            failure_limit: 5,
            history_depth: 30,
        }
    }
}

/// Mission execution timing and tolerances.
#[derive(Debug, Clone)]
pub struct MissionConfig {
    /// Climb target when a dispatch does not specify one
    pub default_takeoff_altitude_m: f64,

    /// Altitude window that counts as "reached" during takeoff
    pub altitude_tolerance_m: f64,

    /// Arrival radius around a waypoint
    pub acceptance_radius_m: f64,

    /// Ack timeout for arm/upload/start/land commands
    pub command_timeout: Duration,

    /// Budget to reach takeoff altitude before abort-to-land
    pub takeoff_timeout: Duration,

    /// Budget for the vehicle to report grounded after a land command
    pub land_timeout: Duration,

    /// Delay between consecutive takeoffs in a fleet dispatch
    pub takeoff_stagger: Duration,

    /// Time resolution for cross-vehicle separation sampling
    pub conflict_sample_interval: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            default_takeoff_altitude_m: 20.0,
            altitude_tolerance_m: 2.0,
            acceptance_radius_m: 2.0,
            command_timeout: Duration::from_secs(5),
            takeoff_timeout: Duration::from_secs(60),
            land_timeout: Duration::from_secs(60),
            takeoff_stagger: Duration::from_secs(3),
            conflict_sample_interval: Duration::from_secs(1),
        }
    }
}

/// Failsafe evaluation parameters beyond the raw thresholds.
#[derive(Debug, Clone)]
pub struct FailsafeConfig {
    /// How long satellites may stay below minimum before a trigger
    pub gps_grace: Duration,

    /// Emergency action taken on a low-battery trigger
    pub emergency_action: EmergencyAction,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            gps_grace: Duration::from_secs(10),
            emergency_action: EmergencyAction::Land,
        }
    }
}

/// Full core configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub vehicles: Vec<VehicleEndpoint>,
    pub thresholds: SafetyThresholds,
    pub search_area: SearchArea,
    pub link: LinkConfig,
    pub telemetry: TelemetryConfig,
    pub mission: MissionConfig,
    pub failsafe: FailsafeConfig,

    /// Budget for landing, disconnecting, and joining one vehicle's tasks
    pub shutdown_timeout: Duration,
}

impl FleetConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let count = env_parse("FLEET_VEHICLE_COUNT", config.vehicles.len());
        let base_port: u16 = env_parse("FLEET_BASE_PORT", 14_541);
        config.vehicles = (0..count)
            .map(|i| VehicleEndpoint {
                vehicle_id: VehicleId(i as u32 + 1),
                endpoint: format!("udp://0.0.0.0:{}", base_port + i as u16),
            })
            .collect();

        config.thresholds.battery_min_percent =
            env_parse("SAFETY_BATTERY_MIN_PCT", config.thresholds.battery_min_percent);
        config.thresholds.min_satellites =
            env_parse("SAFETY_MIN_SATELLITES", config.thresholds.min_satellites);
        config.thresholds.max_flight_time = Duration::from_secs(env_parse(
            "SAFETY_MAX_FLIGHT_TIME_S",
            config.thresholds.max_flight_time.as_secs(),
        ));
        config.thresholds.min_altitude_m =
            env_parse("SAFETY_MIN_ALTITUDE_M", config.thresholds.min_altitude_m);
        config.thresholds.max_altitude_m =
            env_parse("SAFETY_MAX_ALTITUDE_M", config.thresholds.max_altitude_m);

        let center_lat = env_parse("SEARCH_CENTER_LAT", config.search_area.center().latitude());
        let center_lon = env_parse("SEARCH_CENTER_LON", config.search_area.center().longitude());
        let radius_m = env_parse("SEARCH_RADIUS_M", config.search_area.radius_m());
        if let Ok(center) = GeoCoordinate::new(center_lat, center_lon, 0.0) {
            if let Ok(area) = SearchArea::new(center, radius_m) {
                config.search_area = area;
            }
        }

        config.telemetry.sample_interval = Duration::from_millis(env_parse(
            "TELEMETRY_SAMPLE_INTERVAL_MS",
            config.telemetry.sample_interval.as_millis() as u64,
        ));
        config.telemetry.failure_limit =
            env_parse("TELEMETRY_FAILURE_LIMIT", config.telemetry.failure_limit);

        config.link.connect_timeout = Duration::from_secs(env_parse(
            "LINK_CONNECT_TIMEOUT_S",
            config.link.connect_timeout.as_secs(),
        ));
        config.link.connect_retries =
            env_parse("LINK_CONNECT_RETRIES", config.link.connect_retries);

        config.mission.default_takeoff_altitude_m = env_parse(
            "MISSION_TAKEOFF_ALTITUDE_M",
            config.mission.default_takeoff_altitude_m,
        );
        config.mission.acceptance_radius_m = env_parse(
            "MISSION_ACCEPTANCE_RADIUS_M",
            config.mission.acceptance_radius_m,
        );

        config
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        // Default search area mirrors the Zurich test range.
        let center =
            GeoCoordinate::new(47.397_971, 8.546_164, 0.0).expect("default center is valid");
        let search_area = SearchArea::new(center, 200.0).expect("default radius is positive");

        Self {
            vehicles: (0..3)
                .map(|i| VehicleEndpoint {
                    vehicle_id: VehicleId(i + 1),
                    endpoint: format!("udp://0.0.0.0:{}", 14_541 + i),
                })
                .collect(),
            thresholds: SafetyThresholds::default(),
            search_area,
            link: LinkConfig::default(),
            telemetry: TelemetryConfig::default(),
            mission: MissionConfig::default(),
            failsafe: FailsafeConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
