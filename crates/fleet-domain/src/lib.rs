//! # Search-Fleet Domain Model
//!
//! Core domain entities, value objects, and enums for multi-vehicle
//! waypoint search missions. These types are the single source of truth
//! across all layers: mission execution, safety monitoring, and the
//! observer-facing views.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable operator-assigned vehicle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic position. Immutable once constructed; construction rejects
/// out-of-range latitude or longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    latitude: f64,
    longitude: f64,
    altitude_m: f64,
}

impl GeoCoordinate {
    /// Create a coordinate, validating latitude ∈ [-90, 90] and
    /// longitude ∈ [-180, 180].
    pub fn new(latitude: f64, longitude: f64, altitude_m: f64) -> Result<Self, DomainError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::InvalidCoordinate {
                lat: latitude,
                lon: longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
            altitude_m,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn altitude_m(&self) -> f64 {
        self.altitude_m
    }

    /// Great-circle ground distance to another point in meters
    /// (Haversine formula).
    #[must_use]
    pub fn horizontal_distance_m(&self, other: &Self) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }

    /// Straight-line distance including the altitude difference, in meters.
    #[must_use]
    pub fn distance_3d_m(&self, other: &Self) -> f64 {
        let horizontal = self.horizontal_distance_m(other);
        let vertical = other.altitude_m - self.altitude_m;
        horizontal.hypot(vertical)
    }

    /// Linear interpolation toward another point; progress is clamped to
    /// [0, 1]. Interpolating between two valid coordinates stays in range.
    #[must_use]
    pub fn interpolate(&self, to: &Self, progress: f64) -> Self {
        let progress = progress.clamp(0.0, 1.0);
        Self {
            latitude: self.latitude + (to.latitude - self.latitude) * progress,
            longitude: self.longitude + (to.longitude - self.longitude) * progress,
            altitude_m: self.altitude_m + (to.altitude_m - self.altitude_m) * progress,
        }
    }

    /// Initial bearing to another point in degrees [0, 360).
    #[must_use]
    pub fn bearing_to_deg(&self, other: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let y = delta_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }
}

/// Circular search-area boundary every mission waypoint must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchArea {
    center: GeoCoordinate,
    radius_m: f64,
}

impl SearchArea {
    pub fn new(center: GeoCoordinate, radius_m: f64) -> Result<Self, DomainError> {
        if radius_m <= 0.0 {
            return Err(DomainError::InvalidRadius(radius_m));
        }
        Ok(Self { center, radius_m })
    }

    pub fn center(&self) -> &GeoCoordinate {
        &self.center
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Whether a point lies inside the boundary (ground distance).
    #[must_use]
    pub fn contains(&self, point: &GeoCoordinate) -> bool {
        self.center.horizontal_distance_m(point) <= self.radius_m
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Action a vehicle performs at a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaypointAction {
    Search,
    Hover,
    Photo,
}

impl WaypointAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "SEARCH",
            Self::Hover => "HOVER",
            Self::Photo => "PHOTO",
        }
    }
}

/// GPS fix quality as reported by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpsFixType {
    NoFix,
    Fix2d,
    Fix3d,
}

impl GpsFixType {
    /// A 3D fix is required before a vehicle is considered navigable.
    #[must_use]
    pub fn is_global_position_ok(&self) -> bool {
        matches!(self, Self::Fix3d)
    }
}

/// Autopilot flight mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Unknown,
    Manual,
    Hold,
    Takeoff,
    Mission,
    Land,
    ReturnToLaunch,
}

impl FlightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Manual => "MANUAL",
            Self::Hold => "HOLD",
            Self::Takeoff => "TAKEOFF",
            Self::Mission => "MISSION",
            Self::Land => "LAND",
            Self::ReturnToLaunch => "RETURN_TO_LAUNCH",
        }
    }
}

/// Connection state of a vehicle link. Faulted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    HealthChecking,
    Ready,
    Faulted,
}

/// Mission-executor phase. Completed and Aborted are terminal; a plan swap
/// is deferred while a vehicle is inside a critical phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorPhase {
    Idle,
    ArmingTakeoff,
    Uploading,
    Executing,
    Landing,
    Completed,
    Aborted,
}

impl ExecutorPhase {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Critical phases defer replans until the next phase boundary.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::ArmingTakeoff | Self::Landing)
    }
}

/// Alert severity levels for fleet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

// =============================================================================
// WAYPOINTS & PLANS
// =============================================================================

/// A single mission waypoint. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    coordinate: GeoCoordinate,
    speed_mps: f64,
    action: WaypointAction,
    loiter: Option<Duration>,
}

impl Waypoint {
    /// Create a waypoint; speed must be strictly positive.
    pub fn new(
        coordinate: GeoCoordinate,
        speed_mps: f64,
        action: WaypointAction,
    ) -> Result<Self, DomainError> {
        if speed_mps <= 0.0 {
            return Err(DomainError::InvalidSpeed(speed_mps));
        }
        Ok(Self {
            coordinate,
            speed_mps,
            action,
            loiter: None,
        })
    }

    /// Attach a loiter duration held on arrival before advancing.
    #[must_use]
    pub fn with_loiter(mut self, loiter: Duration) -> Self {
        self.loiter = Some(loiter);
        self
    }

    pub fn coordinate(&self) -> &GeoCoordinate {
        &self.coordinate
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    pub fn action(&self) -> WaypointAction {
        self.action
    }

    pub fn loiter(&self) -> Option<Duration> {
        self.loiter
    }
}

/// Metadata attached to an externally produced plan. The core never
/// interprets it; it is carried for operators and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub strategy_summary: String,
    pub estimated_duration: Duration,
    pub confidence: f32,
}

/// Ordered per-vehicle waypoint route inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRoute {
    pub vehicle_id: VehicleId,
    pub waypoints: Vec<Waypoint>,
}

/// An externally produced mission plan: ordered per-vehicle routes plus
/// metadata. Immutable once accepted; a replan is a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionPlan {
    plan_id: Uuid,
    metadata: PlanMetadata,
    routes: Vec<VehicleRoute>,
}

impl MissionPlan {
    /// Assemble a plan, rejecting empty plans and duplicate vehicle routes.
    pub fn new(metadata: PlanMetadata, routes: Vec<VehicleRoute>) -> Result<Self, DomainError> {
        if routes.is_empty() {
            return Err(DomainError::EmptyPlan);
        }
        for (i, route) in routes.iter().enumerate() {
            if routes[..i].iter().any(|r| r.vehicle_id == route.vehicle_id) {
                return Err(DomainError::DuplicateRoute(route.vehicle_id));
            }
        }
        Ok(Self {
            plan_id: Uuid::new_v4(),
            metadata,
            routes,
        })
    }

    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    pub fn metadata(&self) -> &PlanMetadata {
        &self.metadata
    }

    pub fn routes(&self) -> &[VehicleRoute] {
        &self.routes
    }

    pub fn route_for(&self, vehicle_id: VehicleId) -> Option<&[Waypoint]> {
        self.routes
            .iter()
            .find(|r| r.vehicle_id == vehicle_id)
            .map(|r| r.waypoints.as_slice())
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.routes.iter().map(|r| r.vehicle_id)
    }
}

// =============================================================================
// SAFETY THRESHOLDS
// =============================================================================

/// Safety limits supplied by the external configuration layer. Read-only
/// to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub battery_min_percent: f32,
    pub min_satellites: u32,
    pub max_flight_time: Duration,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    pub min_horizontal_spacing_m: f64,
    pub min_vehicle_separation_m: f64,
    pub max_leg_length_m: f64,
    pub max_altitude_step_m: f64,
    pub max_waypoints_per_vehicle: usize,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            battery_min_percent: 25.0,
            min_satellites: 6,
            max_flight_time: Duration::from_secs(900),
            min_altitude_m: 5.0,
            max_altitude_m: 120.0,
            min_speed_mps: 0.1,
            max_speed_mps: 20.0,
            min_horizontal_spacing_m: 1.0,
            min_vehicle_separation_m: 10.0,
            max_leg_length_m: 1_000.0,
            max_altitude_step_m: 50.0,
            max_waypoints_per_vehicle: 50,
        }
    }
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Battery reading from a telemetry tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub voltage_v: f32,
    pub percent: f32,
}

/// GPS reading from a telemetry tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    pub satellites: u32,
    pub fix_type: GpsFixType,
}

/// One normalized telemetry reading for a vehicle. `seq` strictly
/// increases per vehicle; each new snapshot supersedes the prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub vehicle_id: VehicleId,
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub position: GeoCoordinate,
    pub relative_altitude_m: f64,
    pub battery: BatteryReading,
    pub gps: GpsReading,
    pub armed: bool,
    pub in_air: bool,
    pub flight_mode: FlightMode,
}

// =============================================================================
// VEHICLE STATE VIEWS
// =============================================================================

/// Per-mission progress exposed in the vehicle status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub plan_id: Uuid,
    pub current_index: usize,
    pub total_waypoints: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionProgress {
    #[must_use]
    pub fn progress_pct(&self) -> f32 {
        if self.total_waypoints == 0 {
            0.0
        } else {
            (self.current_index as f32 / self.total_waypoints as f32) * 100.0
        }
    }
}

/// Read-only view of a vehicle's state published to the coordinator and
/// external observers. Mutation happens only inside the vehicle's own
/// concurrent unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub vehicle_id: VehicleId,
    pub connection: ConnectionState,
    pub phase: ExecutorPhase,
    pub faulted: bool,
    pub mission: Option<MissionProgress>,
}

impl VehicleStatus {
    #[must_use]
    pub fn offline(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            connection: ConnectionState::Disconnected,
            phase: ExecutorPhase::Idle,
            faulted: false,
            mission: None,
        }
    }

    #[must_use]
    pub fn mission_active(&self) -> bool {
        self.mission.is_some() && !self.phase.is_terminal() && self.phase != ExecutorPhase::Idle
    }
}

/// Observer-facing snapshot for dashboard/CLI layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverSnapshot {
    pub vehicle_id: VehicleId,
    pub position: Option<GeoCoordinate>,
    pub battery: Option<BatteryReading>,
    pub gps: Option<GpsReading>,
    pub armed: bool,
    pub in_air: bool,
    pub mission_active: bool,
}

impl ObserverSnapshot {
    /// Merge the status view with the latest telemetry reading, if any.
    #[must_use]
    pub fn from_parts(status: &VehicleStatus, telemetry: Option<&TelemetrySnapshot>) -> Self {
        Self {
            vehicle_id: status.vehicle_id,
            position: telemetry.map(|t| t.position),
            battery: telemetry.map(|t| t.battery),
            gps: telemetry.map(|t| t.gps),
            armed: telemetry.is_some_and(|t| t.armed),
            in_air: telemetry.is_some_and(|t| t.in_air),
            mission_active: status.mission_active(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Waypoint speed must be positive, got {0}")]
    InvalidSpeed(f64),

    #[error("Search area radius must be positive, got {0}")]
    InvalidRadius(f64),

    #[error("Mission plan contains no routes")]
    EmptyPlan,

    #[error("Mission plan contains more than one route for vehicle {0}")]
    DuplicateRoute(VehicleId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64, alt: f64) -> GeoCoordinate {
        GeoCoordinate::new(lat, lon, alt).unwrap()
    }

    #[test]
    fn test_coordinate_range_validation() {
        assert!(GeoCoordinate::new(47.39, 8.54, 20.0).is_ok());
        assert!(GeoCoordinate::new(90.1, 0.0, 0.0).is_err());
        assert!(GeoCoordinate::new(-90.1, 0.0, 0.0).is_err());
        assert!(GeoCoordinate::new(0.0, 180.5, 0.0).is_err());
    }

    #[test]
    fn test_haversine_distance() {
        // ~111.3 km per degree of longitude at the equator.
        let a = coord(0.0, 0.0, 0.0);
        let b = coord(0.0, 1.0, 0.0);
        let d = a.horizontal_distance_m(&b);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");

        // Identical points are zero distance apart.
        assert!(a.horizontal_distance_m(&a) < f64::EPSILON);
    }

    #[test]
    fn test_distance_3d_includes_altitude() {
        let a = coord(47.0, 8.0, 10.0);
        let b = coord(47.0, 8.0, 50.0);
        assert!((a.distance_3d_m(&b) - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_bearing_due_east() {
        let a = coord(0.0, 0.0, 0.0);
        let b = coord(0.0, 1.0, 0.0);
        assert!((a.bearing_to_deg(&b) - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_waypoint_rejects_nonpositive_speed() {
        let c = coord(47.39, 8.54, 20.0);
        assert!(Waypoint::new(c, 0.0, WaypointAction::Search).is_err());
        assert!(Waypoint::new(c, -1.0, WaypointAction::Search).is_err());
        assert!(Waypoint::new(c, 5.0, WaypointAction::Search).is_ok());
    }

    #[test]
    fn test_plan_rejects_duplicate_vehicle_routes() {
        let wp = Waypoint::new(coord(47.39, 8.54, 20.0), 5.0, WaypointAction::Search).unwrap();
        let meta = PlanMetadata {
            strategy_summary: "grid sweep".into(),
            estimated_duration: Duration::from_secs(120),
            confidence: 0.9,
        };
        let routes = vec![
            VehicleRoute {
                vehicle_id: VehicleId(1),
                waypoints: vec![wp],
            },
            VehicleRoute {
                vehicle_id: VehicleId(1),
                waypoints: vec![wp],
            },
        ];
        assert!(matches!(
            MissionPlan::new(meta, routes),
            Err(DomainError::DuplicateRoute(VehicleId(1)))
        ));
    }

    #[test]
    fn test_search_area_contains() {
        let area = SearchArea::new(coord(47.397971, 8.546164, 0.0), 200.0).unwrap();
        assert!(area.contains(&coord(47.397971, 8.546164, 20.0)));
        // ~1 km east is well outside a 200 m radius.
        assert!(!area.contains(&coord(47.397971, 8.559, 20.0)));
    }

    #[test]
    fn test_critical_phases() {
        assert!(ExecutorPhase::ArmingTakeoff.is_critical());
        assert!(ExecutorPhase::Landing.is_critical());
        assert!(!ExecutorPhase::Executing.is_critical());
        assert!(ExecutorPhase::Completed.is_terminal());
        assert!(ExecutorPhase::Aborted.is_terminal());
    }
}
