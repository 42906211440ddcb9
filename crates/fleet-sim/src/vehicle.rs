//! Kinematic simulated vehicle behind the [`VehicleAdapter`] seam.
//!
//! The vehicle advances its state on every telemetry poll from the
//! elapsed (tokio) time: climb and descent at fixed rates, constant-speed
//! motion along the uploaded mission, battery drain while armed. Fault
//! injection mirrors what field testing produces: refused connections,
//! telemetry dropouts, aggressive battery drain.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use fleet_core::{AdapterError, MissionItem, RawTelemetry, VehicleAdapter};
use fleet_domain::{BatteryReading, FlightMode, GeoCoordinate, GpsFixType, GpsReading};

/// Tunable behavior of one simulated vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimProfile {
    pub start: GeoCoordinate,
    pub climb_rate_mps: f64,
    pub descent_rate_mps: f64,
    pub rtl_speed_mps: f64,
    /// Battery percentage consumed per armed second
    pub battery_drain_per_s: f32,
    pub satellites: u32,
    pub connect_delay: Duration,
    pub refuse_connect: bool,
    /// Fail this many telemetry polls before recovering
    pub telemetry_dropouts: u32,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            start: GeoCoordinate::new(47.397_971, 8.546_164, 0.0)
                .expect("default start is valid"),
            climb_rate_mps: 2.0,
            descent_rate_mps: 1.5,
            rtl_speed_mps: 8.0,
            battery_drain_per_s: 0.02,
            satellites: 12,
            connect_delay: Duration::from_millis(100),
            refuse_connect: false,
            telemetry_dropouts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimPhase {
    Grounded,
    Climbing,
    Holding,
    Enroute,
    Returning,
    Descending,
}

struct SimState {
    profile: SimProfile,
    connected: bool,
    armed: bool,
    phase: SimPhase,
    position: GeoCoordinate,
    altitude_m: f64,
    target_altitude_m: f64,
    battery_pct: f32,
    mission: Vec<MissionItem>,
    mission_index: usize,
    mission_started: bool,
    loiter_until: Option<Instant>,
    dropouts_left: u32,
    last_advance: Instant,
}

/// In-process vehicle simulation implementing the protocol adapter.
pub struct SimulatedVehicle {
    state: Mutex<SimState>,
}

impl SimulatedVehicle {
    #[must_use]
    pub fn new(profile: SimProfile) -> Self {
        let position = profile.start;
        let dropouts = profile.telemetry_dropouts;
        Self {
            state: Mutex::new(SimState {
                profile,
                connected: false,
                armed: false,
                phase: SimPhase::Grounded,
                position,
                altitude_m: 0.0,
                target_altitude_m: 0.0,
                battery_pct: 100.0,
                mission: Vec::new(),
                mission_index: 0,
                mission_started: false,
                loiter_until: None,
                dropouts_left: dropouts,
                last_advance: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the simulated airframe is on the ground.
    #[must_use]
    pub fn is_grounded(&self) -> bool {
        self.lock().phase == SimPhase::Grounded
    }

    #[must_use]
    pub fn battery_pct(&self) -> f32 {
        self.lock().battery_pct
    }
}

impl SimState {
    /// Advance the kinematics by the elapsed time since the last poll.
    fn advance(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_advance).as_secs_f64();
        self.last_advance = now;
        if dt <= 0.0 {
            return;
        }

        if self.armed {
            self.battery_pct =
                (self.battery_pct - self.profile.battery_drain_per_s * dt as f32).max(0.0);
        }

        match self.phase {
            SimPhase::Grounded | SimPhase::Holding => {}
            SimPhase::Climbing => {
                self.altitude_m += self.profile.climb_rate_mps * dt;
                if self.altitude_m >= self.target_altitude_m {
                    self.altitude_m = self.target_altitude_m;
                    self.phase = if self.mission_started {
                        SimPhase::Enroute
                    } else {
                        SimPhase::Holding
                    };
                }
            }
            SimPhase::Enroute => self.advance_mission(now, dt),
            SimPhase::Returning => {
                let home = self.profile.start;
                let distance = self.position.horizontal_distance_m(&home);
                let step = self.profile.rtl_speed_mps * dt;
                if step >= distance {
                    self.position = home;
                    self.phase = SimPhase::Descending;
                } else {
                    self.position = self.position.interpolate(&home, step / distance);
                }
            }
            SimPhase::Descending => {
                self.altitude_m -= self.profile.descent_rate_mps * dt;
                if self.altitude_m <= 0.0 {
                    self.altitude_m = 0.0;
                    self.armed = false;
                    self.mission_started = false;
                    self.phase = SimPhase::Grounded;
                }
            }
        }
    }

    fn advance_mission(&mut self, now: Instant, dt: f64) {
        if let Some(until) = self.loiter_until {
            if now < until {
                return;
            }
            self.loiter_until = None;
            self.mission_index += 1;
        }
        let Some(item) = self.mission.get(self.mission_index) else {
            self.phase = SimPhase::Holding;
            return;
        };

        let Ok(target) = GeoCoordinate::new(item.latitude, item.longitude, item.altitude_m) else {
            self.phase = SimPhase::Holding;
            return;
        };

        // Altitude tracks the mission item independently of ground track.
        let altitude_gap = item.altitude_m - self.altitude_m;
        let max_step = self.profile.climb_rate_mps * dt;
        self.altitude_m += altitude_gap.clamp(-max_step, max_step);

        let distance = self.position.horizontal_distance_m(&target);
        let step = item.speed_mps * dt;
        if step >= distance {
            self.position = target;
            match item.loiter {
                Some(loiter) if !loiter.is_zero() => {
                    self.loiter_until = Some(now + loiter);
                }
                _ => self.mission_index += 1,
            }
        } else {
            self.position = self.position.interpolate(&target, step / distance);
        }
    }

    fn flight_mode(&self) -> FlightMode {
        match self.phase {
            SimPhase::Grounded => FlightMode::Manual,
            SimPhase::Climbing => FlightMode::Takeoff,
            SimPhase::Holding => FlightMode::Hold,
            SimPhase::Enroute => FlightMode::Mission,
            SimPhase::Returning => FlightMode::ReturnToLaunch,
            SimPhase::Descending => FlightMode::Land,
        }
    }
}

#[async_trait]
impl VehicleAdapter for SimulatedVehicle {
    async fn connect(&self) -> Result<(), AdapterError> {
        let (refuse, delay) = {
            let state = self.lock();
            (state.profile.refuse_connect, state.profile.connect_delay)
        };
        tokio::time::sleep(delay).await;
        if refuse {
            return Err(AdapterError::Refused("simulated link refusal".into()));
        }
        let mut state = self.lock();
        state.connected = true;
        state.last_advance = Instant::now();
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    async fn arm(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(AdapterError::NotConnected);
        }
        state.armed = true;
        Ok(())
    }

    async fn takeoff(&self, altitude_m: f64) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if !state.armed {
            return Err(AdapterError::Rejected("takeoff while disarmed".into()));
        }
        state.target_altitude_m = altitude_m;
        state.phase = SimPhase::Climbing;
        debug!(target = altitude_m, "sim takeoff");
        Ok(())
    }

    async fn upload_mission(&self, items: Vec<MissionItem>) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(AdapterError::NotConnected);
        }
        state.mission = items;
        state.mission_index = 0;
        state.loiter_until = None;
        Ok(())
    }

    async fn start_mission(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if state.mission.is_empty() {
            return Err(AdapterError::Rejected("no mission uploaded".into()));
        }
        state.mission_started = true;
        state.mission_index = 0;
        if state.phase == SimPhase::Holding {
            state.phase = SimPhase::Enroute;
        }
        Ok(())
    }

    async fn land(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if state.phase != SimPhase::Grounded {
            state.phase = SimPhase::Descending;
        }
        Ok(())
    }

    async fn return_to_launch(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        if state.phase != SimPhase::Grounded {
            state.phase = SimPhase::Returning;
        }
        Ok(())
    }

    async fn poll_telemetry(&self) -> Result<RawTelemetry, AdapterError> {
        let mut state = self.lock();
        if state.dropouts_left > 0 {
            state.dropouts_left -= 1;
            return Err(AdapterError::TelemetryUnavailable(
                "simulated dropout".into(),
            ));
        }

        state.advance(Instant::now());

        // Mild sensor noise on the pack voltage only; position stays
        // exact so arrival radii behave deterministically in tests.
        let noise = Normal::new(0.0, 0.05)
            .map(|n| n.sample(&mut rand::thread_rng()) as f32)
            .unwrap_or(0.0);
        let voltage = 12.0 + 4.2 * (state.battery_pct / 100.0) + noise;

        let in_air = state.phase != SimPhase::Grounded;
        Ok(RawTelemetry {
            position: state.position,
            relative_altitude_m: state.altitude_m,
            battery: BatteryReading {
                voltage_v: voltage,
                percent: state.battery_pct,
            },
            gps: GpsReading {
                satellites: state.profile.satellites,
                fix_type: if state.profile.satellites >= 4 {
                    GpsFixType::Fix3d
                } else {
                    GpsFixType::NoFix
                },
            },
            armed: state.armed,
            in_air,
            flight_mode: state.flight_mode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_arm() {
        tokio_test::block_on(async {
            let vehicle = SimulatedVehicle::new(SimProfile::default());
            assert!(vehicle.arm().await.is_err());
            vehicle.connect().await.unwrap();
            vehicle.arm().await.unwrap();
            let telemetry = vehicle.poll_telemetry().await.unwrap();
            assert!(telemetry.armed);
            assert!(!telemetry.in_air);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_climbs_at_configured_rate() {
        let vehicle = SimulatedVehicle::new(SimProfile::default());
        vehicle.connect().await.unwrap();
        vehicle.arm().await.unwrap();
        vehicle.takeoff(20.0).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let telemetry = vehicle.poll_telemetry().await.unwrap();
        assert!(telemetry.in_air);
        assert!((telemetry.relative_altitude_m - 10.0).abs() < 0.5);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let telemetry = vehicle.poll_telemetry().await.unwrap();
        assert!((telemetry.relative_altitude_m - 20.0).abs() < 0.01);
        assert_eq!(telemetry.flight_mode, FlightMode::Hold);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flies_uploaded_mission() {
        let vehicle = SimulatedVehicle::new(SimProfile::default());
        vehicle.connect().await.unwrap();
        vehicle.arm().await.unwrap();
        vehicle.takeoff(20.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        vehicle.poll_telemetry().await.unwrap();

        // One waypoint ~30 m east at 5 m/s.
        vehicle
            .upload_mission(vec![MissionItem {
                latitude: 47.397_971,
                longitude: 8.546_564,
                altitude_m: 20.0,
                speed_mps: 5.0,
                loiter: None,
            }])
            .await
            .unwrap();
        vehicle.start_mission().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let telemetry = vehicle.poll_telemetry().await.unwrap();
        let target = GeoCoordinate::new(47.397_971, 8.546_564, 20.0).unwrap();
        assert!(telemetry.position.horizontal_distance_m(&target) < 1.0);

        vehicle.land().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        vehicle.poll_telemetry().await.unwrap();
        assert!(vehicle.is_grounded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_drains_while_armed() {
        let mut profile = SimProfile::default();
        profile.battery_drain_per_s = 1.0;
        let vehicle = SimulatedVehicle::new(profile);
        vehicle.connect().await.unwrap();
        vehicle.arm().await.unwrap();
        vehicle.poll_telemetry().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        let telemetry = vehicle.poll_telemetry().await.unwrap();
        assert!(telemetry.battery.percent < 75.0);
    }
}
