//! Test support: a scripted in-memory vehicle adapter and snapshot
//! builders shared by the module tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use fleet_domain::{
    BatteryReading, FlightMode, GeoCoordinate, GpsFixType, GpsReading, TelemetrySnapshot,
    VehicleId,
};

use crate::adapter::{AdapterError, MissionItem, RawTelemetry, VehicleAdapter};

/// Scripted vehicle: commands mutate a state machine instantly, so tests
/// under paused time stay deterministic.
pub(crate) struct MockAdapter {
    state: Mutex<MockState>,
}

struct MockState {
    connected: bool,
    armed: bool,
    in_air: bool,
    altitude_m: f64,
    position: GeoCoordinate,
    battery_pct: f32,
    battery_drain_per_poll: f32,
    satellites: u32,
    fix_type: GpsFixType,
    mission: Vec<MissionItem>,
    mission_index: usize,
    mission_started: bool,
    refuse_connects: u32,
    fail_polls: u32,
    ignore_land: bool,
    deny_climb: bool,
    hold_position: bool,
    commands: Vec<&'static str>,
}

impl MockAdapter {
    pub fn healthy() -> Self {
        let position = GeoCoordinate::new(47.397_971, 8.546_164, 0.0).unwrap();
        Self {
            state: Mutex::new(MockState {
                connected: false,
                armed: false,
                in_air: false,
                altitude_m: 0.0,
                position,
                battery_pct: 100.0,
                battery_drain_per_poll: 0.0,
                satellites: 12,
                fix_type: GpsFixType::Fix3d,
                mission: Vec::new(),
                mission_index: 0,
                mission_started: false,
                refuse_connects: 0,
                fail_polls: 0,
                ignore_land: false,
                deny_climb: false,
                hold_position: false,
                commands: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refuse_connects(&self, count: u32) {
        self.lock().refuse_connects = count;
    }

    pub fn fail_polls(&self, count: u32) {
        self.lock().fail_polls = count;
    }

    pub fn set_gps(&self, satellites: u32, fix_type: GpsFixType) {
        let mut state = self.lock();
        state.satellites = satellites;
        state.fix_type = fix_type;
    }

    pub fn set_battery(&self, percent: f32) {
        self.lock().battery_pct = percent;
    }

    pub fn drain_battery_per_poll(&self, percent: f32) {
        self.lock().battery_drain_per_poll = percent;
    }

    pub fn ignore_land(&self) {
        self.lock().ignore_land = true;
    }

    /// Takeoff acknowledges but the vehicle never gains altitude.
    pub fn deny_climb(&self) {
        self.lock().deny_climb = true;
    }

    /// Stop the mock from teleporting along the mission; the vehicle
    /// stays where it is until released.
    pub fn hold_position(&self) {
        self.lock().hold_position = true;
    }

    pub fn release_position(&self) {
        self.lock().hold_position = false;
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.lock().commands.clone()
    }

    pub fn uploaded_items(&self) -> Vec<MissionItem> {
        self.lock().mission.clone()
    }
}

#[async_trait]
impl VehicleAdapter for MockAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("connect");
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(AdapterError::Refused("simulated refusal".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.lock();
        state.commands.push("disconnect");
        state.connected = false;
    }

    async fn arm(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("arm");
        if !state.connected {
            return Err(AdapterError::NotConnected);
        }
        state.armed = true;
        Ok(())
    }

    async fn takeoff(&self, altitude_m: f64) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("takeoff");
        if !state.armed {
            return Err(AdapterError::Rejected("not armed".into()));
        }
        state.in_air = true;
        if !state.deny_climb {
            state.altitude_m = altitude_m;
        }
        Ok(())
    }

    async fn upload_mission(&self, items: Vec<MissionItem>) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("upload_mission");
        state.mission = items;
        state.mission_index = 0;
        state.mission_started = false;
        Ok(())
    }

    async fn start_mission(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("start_mission");
        if state.mission.is_empty() {
            return Err(AdapterError::Rejected("no mission uploaded".into()));
        }
        state.mission_started = true;
        Ok(())
    }

    async fn land(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("land");
        if !state.ignore_land {
            state.in_air = false;
            state.armed = false;
            state.altitude_m = 0.0;
        }
        Ok(())
    }

    async fn return_to_launch(&self) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.commands.push("return_to_launch");
        if !state.ignore_land {
            state.in_air = false;
            state.armed = false;
            state.altitude_m = 0.0;
        }
        Ok(())
    }

    async fn poll_telemetry(&self) -> Result<RawTelemetry, AdapterError> {
        let mut state = self.lock();
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(AdapterError::TelemetryUnavailable("simulated dropout".into()));
        }

        // Teleport one mission item per poll while executing.
        if state.mission_started
            && state.in_air
            && !state.hold_position
            && state.mission_index < state.mission.len()
        {
            let item = state.mission[state.mission_index].clone();
            if let Ok(position) =
                GeoCoordinate::new(item.latitude, item.longitude, item.altitude_m)
            {
                state.position = position;
                state.altitude_m = item.altitude_m;
            }
            state.mission_index += 1;
        }

        state.battery_pct = (state.battery_pct - state.battery_drain_per_poll).max(0.0);

        Ok(RawTelemetry {
            position: state.position,
            relative_altitude_m: if state.in_air { state.altitude_m } else { 0.0 },
            battery: BatteryReading {
                voltage_v: 15.8,
                percent: state.battery_pct,
            },
            gps: GpsReading {
                satellites: state.satellites,
                fix_type: state.fix_type,
            },
            armed: state.armed,
            in_air: state.in_air,
            flight_mode: if state.mission_started && state.in_air {
                FlightMode::Mission
            } else if state.in_air {
                FlightMode::Takeoff
            } else {
                FlightMode::Manual
            },
        })
    }
}

/// Healthy airborne-capable snapshot, adjusted by the closure.
pub(crate) fn snapshot_with(adjust: impl FnOnce(&mut TelemetrySnapshot)) -> TelemetrySnapshot {
    let mut snapshot = TelemetrySnapshot {
        vehicle_id: VehicleId(1),
        seq: 1,
        recorded_at: Utc::now(),
        position: GeoCoordinate::new(47.397_971, 8.546_164, 20.0).unwrap(),
        relative_altitude_m: 20.0,
        battery: BatteryReading {
            voltage_v: 15.8,
            percent: 90.0,
        },
        gps: GpsReading {
            satellites: 12,
            fix_type: GpsFixType::Fix3d,
        },
        armed: false,
        in_air: false,
        flight_mode: FlightMode::Manual,
    };
    adjust(&mut snapshot);
    snapshot
}
