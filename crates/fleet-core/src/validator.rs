//! # Mission Validator
//!
//! Geometric validation of externally produced plans. Single-vehicle
//! checks are a fixed ordered list of pure predicates over
//! (waypoint, search-area, thresholds); cross-vehicle conflict detection
//! samples each vehicle's constant-speed linear motion over time. The
//! core never interprets a plan's intent; any plan may be rejected here
//! regardless of origin.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use fleet_domain::{
    GeoCoordinate, MissionPlan, SafetyThresholds, SearchArea, VehicleId, Waypoint,
};

use crate::error::{FleetError, Result};

/// One reason a waypoint sequence or plan fails validation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ValidationIssue {
    #[error("route contains no waypoints")]
    EmptyRoute,

    #[error("route has {count} waypoints, maximum is {max}")]
    TooManyWaypoints { count: usize, max: usize },

    #[error("waypoint {index} lies {distance_m:.1} m outside the search area")]
    OutsideSearchArea { index: usize, distance_m: f64 },

    #[error("waypoint {index} altitude {altitude_m:.1} m is outside bounds")]
    AltitudeOutOfBounds { index: usize, altitude_m: f64 },

    #[error("waypoint {index} speed {speed_mps:.1} m/s is outside bounds")]
    SpeedOutOfBounds { index: usize, speed_mps: f64 },

    #[error("waypoints {first} and {second} are {distance_m:.2} m apart, below minimum spacing")]
    SpacingConflict {
        first: usize,
        second: usize,
        distance_m: f64,
    },

    #[error("leg from waypoint {first} to {second} is {distance_m:.0} m, beyond the maximum")]
    LegTooLong {
        first: usize,
        second: usize,
        distance_m: f64,
    },

    #[error("altitude change of {step_m:.1} m between waypoints {first} and {second} exceeds the maximum")]
    AltitudeStepExceeded {
        first: usize,
        second: usize,
        step_m: f64,
    },

    #[error(
        "separation to vehicle {other} drops to {distance_m:.1} m at +{offset_s:.0} s into the mission"
    )]
    SeparationConflict {
        other: VehicleId,
        offset_s: f64,
        distance_m: f64,
    },
}

/// A validation issue attributed to a vehicle's route, or to the plan as
/// a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub vehicle_id: Option<VehicleId>,
    pub issue: ValidationIssue,
}

impl std::fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vehicle_id {
            Some(id) => write!(f, "vehicle {id}: {}", self.issue),
            None => write!(f, "plan: {}", self.issue),
        }
    }
}

/// Proof of a successful validation pass. Routes for upload can only be
/// drawn from a validated plan, so an unvalidated mission can never reach
/// a vehicle.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    plan: MissionPlan,
}

impl ValidatedPlan {
    pub fn plan(&self) -> &MissionPlan {
        &self.plan
    }

    pub fn plan_id(&self) -> Uuid {
        self.plan.plan_id()
    }

    pub fn route_for(&self, vehicle_id: VehicleId) -> Option<ValidatedRoute> {
        self.plan.route_for(vehicle_id).map(|waypoints| ValidatedRoute {
            plan_id: self.plan.plan_id(),
            vehicle_id,
            waypoints: waypoints.to_vec(),
        })
    }
}

/// One vehicle's share of a validated plan.
#[derive(Debug, Clone)]
pub struct ValidatedRoute {
    plan_id: Uuid,
    vehicle_id: VehicleId,
    waypoints: Vec<Waypoint>,
}

impl ValidatedRoute {
    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.vehicle_id
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn into_waypoints(self) -> Vec<Waypoint> {
        self.waypoints
    }

    #[cfg(test)]
    pub(crate) fn for_tests(plan_id: Uuid, vehicle_id: VehicleId, waypoints: Vec<Waypoint>) -> Self {
        Self {
            plan_id,
            vehicle_id,
            waypoints,
        }
    }
}

type WaypointCheck = fn(&MissionValidator, usize, &Waypoint) -> Option<ValidationIssue>;
type PairCheck = fn(&MissionValidator, usize, &Waypoint, &Waypoint) -> Option<ValidationIssue>;

/// Per-waypoint predicates, applied in this order.
const WAYPOINT_CHECKS: &[WaypointCheck] = &[
    MissionValidator::check_inside_search_area,
    MissionValidator::check_altitude_bounds,
    MissionValidator::check_speed_bounds,
];

/// Consecutive-pair predicates, applied in this order. `second` is the
/// index of the later waypoint of the pair.
const PAIR_CHECKS: &[PairCheck] = &[
    MissionValidator::check_min_spacing,
    MissionValidator::check_leg_length,
    MissionValidator::check_altitude_step,
];

pub struct MissionValidator {
    thresholds: SafetyThresholds,
    search_area: SearchArea,
    sample_interval: Duration,
}

impl MissionValidator {
    pub fn new(
        thresholds: SafetyThresholds,
        search_area: SearchArea,
        conflict_sample_interval: Duration,
    ) -> Self {
        Self {
            thresholds,
            search_area,
            sample_interval: conflict_sample_interval,
        }
    }

    /// Validate one vehicle's waypoint sequence. An empty result means
    /// the sequence passes.
    #[must_use]
    pub fn validate_waypoint_sequence(&self, waypoints: &[Waypoint]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if waypoints.is_empty() {
            issues.push(ValidationIssue::EmptyRoute);
            return issues;
        }
        if waypoints.len() > self.thresholds.max_waypoints_per_vehicle {
            issues.push(ValidationIssue::TooManyWaypoints {
                count: waypoints.len(),
                max: self.thresholds.max_waypoints_per_vehicle,
            });
        }

        for (index, waypoint) in waypoints.iter().enumerate() {
            for check in WAYPOINT_CHECKS {
                if let Some(issue) = check(self, index, waypoint) {
                    issues.push(issue);
                }
            }
        }
        for second in 1..waypoints.len() {
            for check in PAIR_CHECKS {
                if let Some(issue) = check(self, second, &waypoints[second - 1], &waypoints[second])
                {
                    issues.push(issue);
                }
            }
        }

        issues
    }

    /// Detect cross-vehicle conflicts: for each pair of vehicles with
    /// overlapping mission time windows, sample interpolated positions at
    /// a fixed resolution and flag any separation below the minimum.
    #[must_use]
    pub fn validate_multi_vehicle(&self, plan: &MissionPlan) -> Vec<PlanIssue> {
        let mut issues = Vec::new();
        let timelines: Vec<(VehicleId, Timeline)> = plan
            .routes()
            .iter()
            .filter(|route| !route.waypoints.is_empty())
            .map(|route| (route.vehicle_id, Timeline::from_route(&route.waypoints)))
            .collect();

        let step = self.sample_interval.as_secs_f64().max(0.1);
        for (i, (id_a, timeline_a)) in timelines.iter().enumerate() {
            for (id_b, timeline_b) in timelines.iter().skip(i + 1) {
                // Both missions start at dispatch; the overlapping window
                // is bounded by the shorter of the two.
                let overlap = timeline_a.duration_s().min(timeline_b.duration_s());
                let mut t = 0.0;
                while t <= overlap {
                    let pos_a = timeline_a.position_at(t);
                    let pos_b = timeline_b.position_at(t);
                    let distance_m = pos_a.distance_3d_m(&pos_b);
                    if distance_m < self.thresholds.min_vehicle_separation_m {
                        issues.push(PlanIssue {
                            vehicle_id: Some(*id_a),
                            issue: ValidationIssue::SeparationConflict {
                                other: *id_b,
                                offset_s: t,
                                distance_m,
                            },
                        });
                        // One conflict per pair is enough to reject.
                        break;
                    }
                    t += step;
                }
            }
        }

        issues
    }

    /// Full plan validation: every route individually, then cross-vehicle
    /// separation. Success yields the [`ValidatedPlan`] token required for
    /// upload.
    pub fn validate_plan(&self, plan: &MissionPlan) -> Result<ValidatedPlan> {
        let mut issues: Vec<PlanIssue> = Vec::new();

        for route in plan.routes() {
            issues.extend(
                self.validate_waypoint_sequence(&route.waypoints)
                    .into_iter()
                    .map(|issue| PlanIssue {
                        vehicle_id: Some(route.vehicle_id),
                        issue,
                    }),
            );
        }
        issues.extend(self.validate_multi_vehicle(plan));

        if issues.is_empty() {
            Ok(ValidatedPlan { plan: plan.clone() })
        } else {
            Err(FleetError::Validation { issues })
        }
    }

    fn check_inside_search_area(&self, index: usize, waypoint: &Waypoint) -> Option<ValidationIssue> {
        let coordinate = waypoint.coordinate();
        if self.search_area.contains(coordinate) {
            return None;
        }
        let distance_m = self.search_area.center().horizontal_distance_m(coordinate)
            - self.search_area.radius_m();
        Some(ValidationIssue::OutsideSearchArea { index, distance_m })
    }

    fn check_altitude_bounds(&self, index: usize, waypoint: &Waypoint) -> Option<ValidationIssue> {
        let altitude_m = waypoint.coordinate().altitude_m();
        if altitude_m < self.thresholds.min_altitude_m || altitude_m > self.thresholds.max_altitude_m
        {
            Some(ValidationIssue::AltitudeOutOfBounds { index, altitude_m })
        } else {
            None
        }
    }

    fn check_speed_bounds(&self, index: usize, waypoint: &Waypoint) -> Option<ValidationIssue> {
        let speed_mps = waypoint.speed_mps();
        if speed_mps < self.thresholds.min_speed_mps || speed_mps > self.thresholds.max_speed_mps {
            Some(ValidationIssue::SpeedOutOfBounds { index, speed_mps })
        } else {
            None
        }
    }

    fn check_min_spacing(
        &self,
        second: usize,
        prev: &Waypoint,
        next: &Waypoint,
    ) -> Option<ValidationIssue> {
        let distance_m = prev
            .coordinate()
            .horizontal_distance_m(next.coordinate());
        // Sub-minimum spacing also catches duplicate and near-duplicate
        // coordinates.
        if distance_m < self.thresholds.min_horizontal_spacing_m {
            Some(ValidationIssue::SpacingConflict {
                first: second - 1,
                second,
                distance_m,
            })
        } else {
            None
        }
    }

    fn check_leg_length(
        &self,
        second: usize,
        prev: &Waypoint,
        next: &Waypoint,
    ) -> Option<ValidationIssue> {
        let distance_m = prev
            .coordinate()
            .horizontal_distance_m(next.coordinate());
        if distance_m > self.thresholds.max_leg_length_m {
            Some(ValidationIssue::LegTooLong {
                first: second - 1,
                second,
                distance_m,
            })
        } else {
            None
        }
    }

    fn check_altitude_step(
        &self,
        second: usize,
        prev: &Waypoint,
        next: &Waypoint,
    ) -> Option<ValidationIssue> {
        let step_m =
            (next.coordinate().altitude_m() - prev.coordinate().altitude_m()).abs();
        if step_m > self.thresholds.max_altitude_step_m {
            Some(ValidationIssue::AltitudeStepExceeded {
                first: second - 1,
                second,
                step_m,
            })
        } else {
            None
        }
    }
}

/// Piecewise-linear position timeline for one route: constant-speed
/// motion along each leg, loiters holding position.
struct Timeline {
    points: Vec<(f64, GeoCoordinate)>,
}

impl Timeline {
    fn from_route(waypoints: &[Waypoint]) -> Self {
        let mut points = Vec::with_capacity(waypoints.len() * 2);
        let mut t = 0.0;

        if let Some(first) = waypoints.first() {
            points.push((t, *first.coordinate()));
            if let Some(loiter) = first.loiter() {
                t += loiter.as_secs_f64();
                points.push((t, *first.coordinate()));
            }
        }
        for pair in waypoints.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let leg_m = from.coordinate().distance_3d_m(to.coordinate());
            t += leg_m / to.speed_mps();
            points.push((t, *to.coordinate()));
            if let Some(loiter) = to.loiter() {
                t += loiter.as_secs_f64();
                points.push((t, *to.coordinate()));
            }
        }

        Self { points }
    }

    fn duration_s(&self) -> f64 {
        self.points.last().map_or(0.0, |(t, _)| *t)
    }

    fn position_at(&self, t: f64) -> GeoCoordinate {
        let first = self.points[0];
        if t <= first.0 {
            return first.1;
        }
        for pair in self.points.windows(2) {
            let (t0, from) = pair[0];
            let (t1, to) = pair[1];
            if t <= t1 {
                let span = t1 - t0;
                let progress = if span > 0.0 { (t - t0) / span } else { 1.0 };
                return from.interpolate(&to, progress);
            }
        }
        self.points[self.points.len() - 1].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::{PlanMetadata, VehicleRoute, WaypointAction};

    fn coord(lat: f64, lon: f64, alt: f64) -> GeoCoordinate {
        GeoCoordinate::new(lat, lon, alt).unwrap()
    }

    fn waypoint(lat: f64, lon: f64, alt: f64) -> Waypoint {
        Waypoint::new(coord(lat, lon, alt), 5.0, WaypointAction::Search).unwrap()
    }

    fn validator() -> MissionValidator {
        let mut thresholds = SafetyThresholds::default();
        thresholds.min_horizontal_spacing_m = 2.0;
        let area = SearchArea::new(coord(47.397_971, 8.546_164, 0.0), 500.0).unwrap();
        MissionValidator::new(thresholds, area, Duration::from_secs(1))
    }

    fn plan_for(routes: Vec<VehicleRoute>) -> MissionPlan {
        MissionPlan::new(
            PlanMetadata {
                strategy_summary: "test".into(),
                estimated_duration: Duration::from_secs(300),
                confidence: 0.9,
            },
            routes,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_sequence_passes() {
        let validator = validator();
        // ~44 m apart per 0.0004° of longitude at this latitude.
        let waypoints = vec![
            waypoint(47.397_971, 8.546_164, 15.0),
            waypoint(47.397_971, 8.546_564, 15.0),
            waypoint(47.397_971, 8.546_964, 20.0),
        ];
        assert!(validator.validate_waypoint_sequence(&waypoints).is_empty());
    }

    #[test]
    fn test_duplicate_coordinates_fail_with_pair_indices() {
        let validator = validator();
        let waypoints = vec![
            waypoint(47.397_971, 8.546_164, 15.0),
            waypoint(47.397_971, 8.546_164, 15.0),
        ];
        let issues = validator.validate_waypoint_sequence(&waypoints);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            ValidationIssue::SpacingConflict {
                first: 0,
                second: 1,
                ..
            }
        )));
    }

    #[test]
    fn test_empty_sequence_fails() {
        let validator = validator();
        let issues = validator.validate_waypoint_sequence(&[]);
        assert_eq!(issues, vec![ValidationIssue::EmptyRoute]);
    }

    #[test]
    fn test_altitude_bounds() {
        let validator = validator();
        let issues = validator.validate_waypoint_sequence(&[waypoint(47.397_971, 8.546_164, 300.0)]);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            ValidationIssue::AltitudeOutOfBounds { index: 0, .. }
        )));
    }

    #[test]
    fn test_speed_bounds() {
        let validator = validator();
        let too_fast = Waypoint::new(
            coord(47.397_971, 8.546_164, 15.0),
            25.0,
            WaypointAction::Search,
        )
        .unwrap();
        let issues = validator.validate_waypoint_sequence(&[too_fast]);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            ValidationIssue::SpeedOutOfBounds { index: 0, .. }
        )));
    }

    #[test]
    fn test_outside_search_area() {
        let validator = validator();
        // ~1.1 km east of the center, area radius is 500 m.
        let issues = validator.validate_waypoint_sequence(&[waypoint(47.397_971, 8.561, 15.0)]);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            ValidationIssue::OutsideSearchArea { index: 0, .. }
        )));
    }

    #[test]
    fn test_altitude_step_limit() {
        let validator = validator();
        let waypoints = vec![
            waypoint(47.397_971, 8.546_164, 10.0),
            waypoint(47.397_971, 8.546_564, 80.0),
        ];
        let issues = validator.validate_waypoint_sequence(&waypoints);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            ValidationIssue::AltitudeStepExceeded {
                first: 0,
                second: 1,
                ..
            }
        )));
    }

    #[test]
    fn test_parallel_close_paths_conflict() {
        let validator = validator();
        // Two vehicles flying the same west-to-east track ~2 m apart.
        let route_a = VehicleRoute {
            vehicle_id: VehicleId(1),
            waypoints: vec![
                waypoint(47.397_971, 8.546_164, 15.0),
                waypoint(47.397_971, 8.546_964, 15.0),
            ],
        };
        let route_b = VehicleRoute {
            vehicle_id: VehicleId(2),
            waypoints: vec![
                waypoint(47.397_989, 8.546_164, 15.0),
                waypoint(47.397_989, 8.546_964, 15.0),
            ],
        };
        let plan = plan_for(vec![route_a, route_b]);
        let issues = validator.validate_multi_vehicle(&plan);
        assert!(issues.iter().any(|pi| matches!(
            pi.issue,
            ValidationIssue::SeparationConflict {
                other: VehicleId(2),
                ..
            }
        )));
    }

    #[test]
    fn test_separated_paths_pass() {
        let validator = validator();
        // Tracks ~220 m apart in latitude.
        let route_a = VehicleRoute {
            vehicle_id: VehicleId(1),
            waypoints: vec![
                waypoint(47.397_0, 8.546_164, 15.0),
                waypoint(47.397_0, 8.546_964, 15.0),
            ],
        };
        let route_b = VehicleRoute {
            vehicle_id: VehicleId(2),
            waypoints: vec![
                waypoint(47.399_0, 8.546_164, 15.0),
                waypoint(47.399_0, 8.546_964, 15.0),
            ],
        };
        let plan = plan_for(vec![route_a, route_b]);
        assert!(validator.validate_multi_vehicle(&plan).is_empty());
    }

    #[test]
    fn test_validate_plan_attributes_issues_to_vehicles() {
        let validator = validator();
        let bad_route = VehicleRoute {
            vehicle_id: VehicleId(2),
            waypoints: vec![
                waypoint(47.397_971, 8.546_164, 15.0),
                waypoint(47.397_971, 8.546_164, 15.0),
            ],
        };
        let good_route = VehicleRoute {
            vehicle_id: VehicleId(1),
            waypoints: vec![
                waypoint(47.399_0, 8.546_164, 15.0),
                waypoint(47.399_0, 8.546_964, 15.0),
            ],
        };
        let plan = plan_for(vec![good_route, bad_route]);
        let err = validator.validate_plan(&plan).unwrap_err();
        match err {
            FleetError::Validation { issues } => {
                assert!(issues
                    .iter()
                    .any(|pi| pi.vehicle_id == Some(VehicleId(2))));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validated_plan_hands_out_routes() {
        let validator = validator();
        let plan = plan_for(vec![VehicleRoute {
            vehicle_id: VehicleId(1),
            waypoints: vec![
                waypoint(47.397_971, 8.546_164, 15.0),
                waypoint(47.397_971, 8.546_964, 15.0),
            ],
        }]);
        let validated = validator.validate_plan(&plan).unwrap();
        let route = validated.route_for(VehicleId(1)).unwrap();
        assert_eq!(route.plan_id(), plan.plan_id());
        assert_eq!(route.waypoints().len(), 2);
        assert!(validated.route_for(VehicleId(9)).is_none());
    }

    #[test]
    fn test_timeline_holds_position_during_loiter() {
        let start = waypoint(47.397_971, 8.546_164, 15.0);
        let end_coord = coord(47.397_971, 8.546_964, 15.0);
        let end = Waypoint::new(end_coord, 5.0, WaypointAction::Hover)
            .unwrap()
            .with_loiter(Duration::from_secs(30));
        let timeline = Timeline::from_route(&[start, end]);

        let leg_s = start.coordinate().distance_3d_m(&end_coord) / 5.0;
        // Mid-loiter the position is pinned at the final waypoint.
        let held = timeline.position_at(leg_s + 10.0);
        assert!(held.horizontal_distance_m(&end_coord) < 0.01);
        assert!((timeline.duration_s() - (leg_s + 30.0)).abs() < 1e-6);
    }
}
