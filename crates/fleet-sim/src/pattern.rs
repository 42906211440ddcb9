//! Parallel-track search pattern generation.
//!
//! Stands in for the external mission-planning oracle during simulation
//! and testing: the circular search area is split into one latitude band
//! per vehicle, and each band is covered by a serpentine sweep of
//! east-west tracks. The output is an ordinary [`MissionPlan`] and gets
//! validated like any externally supplied plan.

use std::time::Duration;

use fleet_domain::{
    DomainError, GeoCoordinate, MissionPlan, PlanMetadata, SearchArea, VehicleId, VehicleRoute,
    Waypoint, WaypointAction,
};

const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Margin keeping tracks clearly inside the area boundary.
const BOUNDARY_MARGIN: f64 = 0.85;

pub struct SearchPatternBuilder {
    area: SearchArea,
    altitude_m: f64,
    speed_mps: f64,
    track_spacing_m: f64,
    /// Every n-th waypoint becomes a photo point
    photo_every: usize,
}

impl SearchPatternBuilder {
    #[must_use]
    pub fn new(area: SearchArea) -> Self {
        Self {
            area,
            altitude_m: 20.0,
            speed_mps: 5.0,
            track_spacing_m: 25.0,
            photo_every: 4,
        }
    }

    #[must_use]
    pub fn altitude_m(mut self, altitude_m: f64) -> Self {
        self.altitude_m = altitude_m;
        self
    }

    #[must_use]
    pub fn speed_mps(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    #[must_use]
    pub fn track_spacing_m(mut self, track_spacing_m: f64) -> Self {
        self.track_spacing_m = track_spacing_m;
        self
    }

    /// Build a plan covering the area with one band per vehicle.
    pub fn plan_for(&self, vehicle_ids: &[VehicleId]) -> Result<MissionPlan, DomainError> {
        let count = vehicle_ids.len().max(1);
        let usable_radius = self.area.radius_m() * BOUNDARY_MARGIN;
        let band_height = 2.0 * usable_radius / count as f64;

        let mut routes = Vec::with_capacity(vehicle_ids.len());
        let mut total_length_m = 0.0;
        for (band, vehicle_id) in vehicle_ids.iter().enumerate() {
            let south = -usable_radius + band as f64 * band_height;
            let waypoints =
                self.band_waypoints(south, south + band_height, usable_radius, &mut total_length_m)?;
            routes.push(VehicleRoute {
                vehicle_id: *vehicle_id,
                waypoints,
            });
        }

        let estimated_duration =
            Duration::from_secs_f64((total_length_m / self.speed_mps).max(1.0));
        MissionPlan::new(
            PlanMetadata {
                strategy_summary: format!(
                    "parallel-track sweep, {} vehicle(s), {:.0} m spacing",
                    count, self.track_spacing_m
                ),
                estimated_duration,
                confidence: 0.95,
            },
            routes,
        )
    }

    /// Serpentine tracks across one latitude band, offsets in meters from
    /// the area center.
    fn band_waypoints(
        &self,
        south_m: f64,
        north_m: f64,
        usable_radius: f64,
        total_length_m: &mut f64,
    ) -> Result<Vec<Waypoint>, DomainError> {
        let center = *self.area.center();
        let mut waypoints = Vec::new();
        let mut eastbound = true;
        let mut previous: Option<GeoCoordinate> = None;

        let mut dy = south_m + self.track_spacing_m / 2.0;
        let mut index = 0usize;
        while dy < north_m {
            // Chord half-width of the circle at this offset.
            let half_chord = (usable_radius.powi(2) - dy.powi(2)).max(0.0).sqrt();
            if half_chord >= self.track_spacing_m {
                let ends = if eastbound {
                    [-half_chord, half_chord]
                } else {
                    [half_chord, -half_chord]
                };
                for dx in ends {
                    let coordinate = offset_coordinate(&center, dy, dx, self.altitude_m)?;
                    if let Some(prev) = previous {
                        *total_length_m += prev.horizontal_distance_m(&coordinate);
                    }
                    previous = Some(coordinate);

                    let action = if index % self.photo_every == self.photo_every - 1 {
                        WaypointAction::Photo
                    } else {
                        WaypointAction::Search
                    };
                    waypoints.push(Waypoint::new(coordinate, self.speed_mps, action)?);
                    index += 1;
                }
                eastbound = !eastbound;
            }
            dy += self.track_spacing_m;
        }

        Ok(waypoints)
    }
}

/// Offset a coordinate by meters north (`dy`) and east (`dx`).
fn offset_coordinate(
    center: &GeoCoordinate,
    dy: f64,
    dx: f64,
    altitude_m: f64,
) -> Result<GeoCoordinate, DomainError> {
    let lat = center.latitude() + dy / METERS_PER_DEG_LAT;
    let lon = center.longitude() + dx / (METERS_PER_DEG_LAT * center.latitude().to_radians().cos());
    GeoCoordinate::new(lat, lon, altitude_m)
}
