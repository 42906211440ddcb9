//! # Vehicle Protocol Adapter
//!
//! Seam between the core and the vehicle command/telemetry protocol.
//! Implementations (real link, simulator, test mock) are swapped behind
//! the [`VehicleAdapter`] trait; the core never talks to a transport
//! directly.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use fleet_domain::{BatteryReading, FlightMode, GeoCoordinate, GpsReading, Waypoint};

/// One mission item in the vehicle protocol's vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionItem {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub loiter: Option<Duration>,
}

impl MissionItem {
    #[must_use]
    pub fn from_waypoint(waypoint: &Waypoint) -> Self {
        let coordinate = waypoint.coordinate();
        Self {
            latitude: coordinate.latitude(),
            longitude: coordinate.longitude(),
            altitude_m: coordinate.altitude_m(),
            speed_mps: waypoint.speed_mps(),
            loiter: waypoint.loiter(),
        }
    }
}

/// Raw, unnormalized telemetry reading straight off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTelemetry {
    pub position: GeoCoordinate,
    pub relative_altitude_m: f64,
    pub battery: BatteryReading,
    pub gps: GpsReading,
    pub armed: bool,
    pub in_air: bool,
    pub flight_mode: FlightMode,
}

/// Transport-level failures reported by an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("link not connected")]
    NotConnected,

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),
}

/// Outbound commands and inbound telemetry for one vehicle.
///
/// Adapter calls carry no timeouts of their own; the core wraps every
/// round trip in a bounded timeout and owns the fallback behavior.
#[async_trait]
pub trait VehicleAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self);

    async fn arm(&self) -> Result<(), AdapterError>;

    async fn takeoff(&self, altitude_m: f64) -> Result<(), AdapterError>;

    async fn upload_mission(&self, items: Vec<MissionItem>) -> Result<(), AdapterError>;

    async fn start_mission(&self) -> Result<(), AdapterError>;

    async fn land(&self) -> Result<(), AdapterError>;

    async fn return_to_launch(&self) -> Result<(), AdapterError>;

    /// Read the vehicle's current state. Called once per sampling tick.
    async fn poll_telemetry(&self) -> Result<RawTelemetry, AdapterError>;
}
