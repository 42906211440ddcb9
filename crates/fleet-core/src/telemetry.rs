//! # Telemetry Sampler
//!
//! Fixed-rate per-vehicle sampling loop. Each tick normalizes one adapter
//! reading into a [`TelemetrySnapshot`] and publishes it on a bounded
//! broadcast channel (lagging consumers drop the oldest updates; the
//! producer never blocks) and a latest-value watch channel. A bounded
//! ring of recent snapshots is retained for diagnostics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, trace, warn};

use fleet_domain::{TelemetrySnapshot, VehicleId};

use crate::adapter::{RawTelemetry, VehicleAdapter};
use crate::config::TelemetryConfig;

/// Capacity of the per-vehicle snapshot broadcast channel.
const BROADCAST_CAPACITY: usize = 64;

/// Why a sampling loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum SamplerExit {
    /// Shutdown was requested; the vehicle is healthy.
    Shutdown,
    /// The consecutive-failure limit was reached; the vehicle is Faulted.
    Faulted { failures: u32 },
}

/// Cloneable handle over the bounded diagnostics ring.
#[derive(Clone)]
pub struct SnapshotHistory {
    inner: Arc<Mutex<VecDeque<TelemetrySnapshot>>>,
}

impl SnapshotHistory {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Copy of the retained snapshots, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<TelemetrySnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn push(&self, snapshot: TelemetrySnapshot, depth: usize) {
        let mut ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.len() == depth {
            ring.pop_front();
        }
        ring.push_back(snapshot);
    }
}

/// Receiving ends of a sampler, handed to consumers at spawn time.
pub struct SamplerHandles {
    /// Subscribe for every snapshot (failsafe monitor).
    pub updates: broadcast::Sender<TelemetrySnapshot>,
    /// Latest snapshot only (executor waits, observers).
    pub latest: watch::Receiver<Option<TelemetrySnapshot>>,
    /// Bounded diagnostics ring.
    pub history: SnapshotHistory,
}

pub struct TelemetrySampler {
    vehicle_id: VehicleId,
    adapter: Arc<dyn VehicleAdapter>,
    config: TelemetryConfig,
    updates: broadcast::Sender<TelemetrySnapshot>,
    latest: watch::Sender<Option<TelemetrySnapshot>>,
    history: SnapshotHistory,
    seq: u64,
    consecutive_failures: u32,
}

impl TelemetrySampler {
    pub fn new(
        vehicle_id: VehicleId,
        adapter: Arc<dyn VehicleAdapter>,
        config: TelemetryConfig,
    ) -> (Self, SamplerHandles) {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(None);
        let history = SnapshotHistory::new();

        let handles = SamplerHandles {
            updates: updates.clone(),
            latest: latest_rx,
            history: history.clone(),
        };
        let sampler = Self {
            vehicle_id,
            adapter,
            config,
            updates,
            latest: latest_tx,
            history,
            seq: 0,
            consecutive_failures: 0,
        };
        (sampler, handles)
    }

    /// Sampling loop. Runs until shutdown is signalled or the
    /// consecutive-failure limit marks the vehicle Faulted.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SamplerExit {
        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return SamplerExit::Shutdown;
                    }
                }
                _ = ticker.tick() => match self.adapter.poll_telemetry().await {
                    Ok(raw) => {
                        self.consecutive_failures = 0;
                        self.publish(raw);
                    }
                    Err(err) => {
                        self.consecutive_failures += 1;
                        warn!(
                            vehicle = %self.vehicle_id,
                            failures = self.consecutive_failures,
                            error = %err,
                            "telemetry read failed"
                        );
                        if self.consecutive_failures >= self.config.failure_limit {
                            error!(
                                vehicle = %self.vehicle_id,
                                failures = self.consecutive_failures,
                                "telemetry failure limit reached, marking vehicle faulted"
                            );
                            return SamplerExit::Faulted {
                                failures: self.consecutive_failures,
                            };
                        }
                    }
                },
            }
        }
    }

    fn publish(&mut self, raw: RawTelemetry) {
        self.seq += 1;
        let snapshot = TelemetrySnapshot {
            vehicle_id: self.vehicle_id,
            seq: self.seq,
            recorded_at: Utc::now(),
            position: raw.position,
            relative_altitude_m: raw.relative_altitude_m,
            battery: raw.battery,
            gps: raw.gps,
            armed: raw.armed,
            in_air: raw.in_air,
            flight_mode: raw.flight_mode,
        };

        trace!(
            vehicle = %self.vehicle_id,
            seq = snapshot.seq,
            mode = snapshot.flight_mode.as_str(),
            "snapshot"
        );
        self.history
            .push(snapshot.clone(), self.config.history_depth);
        // No receivers is fine; the send result is irrelevant either way.
        let _ = self.updates.send(snapshot.clone());
        self.latest.send_replace(Some(snapshot));
    }
}
