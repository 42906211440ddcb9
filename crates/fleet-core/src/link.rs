//! # Vehicle Link
//!
//! Per-vehicle connection state machine:
//! Disconnected → Connecting → Connected → HealthChecking → Ready, with
//! Faulted terminal and reachable from any state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use fleet_domain::{ConnectionState, VehicleId};

use crate::adapter::VehicleAdapter;
use crate::config::LinkConfig;
use crate::error::{FleetError, Result};

pub struct VehicleLink {
    vehicle_id: VehicleId,
    adapter: Arc<dyn VehicleAdapter>,
    config: LinkConfig,
    state: ConnectionState,
}

impl VehicleLink {
    pub fn new(vehicle_id: VehicleId, adapter: Arc<dyn VehicleAdapter>, config: LinkConfig) -> Self {
        Self {
            vehicle_id,
            adapter,
            config,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Attempt the handshake with a bounded per-attempt timeout, retrying
    /// with doubling backoff up to the configured limit. Failure leaves the
    /// link Disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Faulted {
            return Err(FleetError::Connection {
                vehicle_id: self.vehicle_id,
                attempts: 0,
                reason: "link is faulted".into(),
            });
        }

        let mut attempt = 0;
        let mut backoff = self.config.connect_backoff;
        loop {
            attempt += 1;
            self.state = ConnectionState::Connecting;

            let reason = match timeout(self.config.connect_timeout, self.adapter.connect()).await {
                Ok(Ok(())) => {
                    self.state = ConnectionState::Connected;
                    info!(vehicle = %self.vehicle_id, attempt, "link established");
                    return Ok(());
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "handshake timed out after {:?}",
                    self.config.connect_timeout
                ),
            };

            self.state = ConnectionState::Disconnected;
            warn!(vehicle = %self.vehicle_id, attempt, %reason, "connect attempt failed");

            if attempt > self.config.connect_retries {
                return Err(FleetError::Connection {
                    vehicle_id: self.vehicle_id,
                    attempts: attempt,
                    reason,
                });
            }
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    /// Poll satellite count and fix type until the configured minimum is
    /// met or the health-check budget elapses. Success moves the link to
    /// Ready.
    pub async fn wait_for_global_position(&mut self, min_satellites: u32) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Ready
        ) {
            return Err(FleetError::HealthCheck {
                vehicle_id: self.vehicle_id,
                reason: format!("link is {:?}, expected Connected", self.state),
            });
        }

        self.state = ConnectionState::HealthChecking;
        let poll = Duration::from_millis(500);

        let outcome = timeout(self.config.health_check_timeout, async {
            loop {
                match self.adapter.poll_telemetry().await {
                    Ok(raw)
                        if raw.gps.satellites >= min_satellites
                            && raw.gps.fix_type.is_global_position_ok() =>
                    {
                        return;
                    }
                    Ok(raw) => {
                        debug!(
                            vehicle = %self.vehicle_id,
                            satellites = raw.gps.satellites,
                            fix = ?raw.gps.fix_type,
                            "waiting for global position"
                        );
                    }
                    Err(err) => {
                        debug!(vehicle = %self.vehicle_id, error = %err, "health-check read failed");
                    }
                }
                sleep(poll).await;
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                info!(vehicle = %self.vehicle_id, "global position fix acquired");
                Ok(())
            }
            Err(_) => {
                self.state = ConnectionState::Connected;
                Err(FleetError::HealthCheck {
                    vehicle_id: self.vehicle_id,
                    reason: format!(
                        "no global position fix within {:?}",
                        self.config.health_check_timeout
                    ),
                })
            }
        }
    }

    /// Release the connection. Callable from any state, idempotent, and
    /// always succeeds. A faulted link stays Faulted.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.adapter.disconnect().await;
        if self.state != ConnectionState::Faulted {
            self.state = ConnectionState::Disconnected;
        }
        info!(vehicle = %self.vehicle_id, "link released");
    }

    /// Terminal transition; the link is unusable afterwards.
    pub fn mark_faulted(&mut self) {
        self.state = ConnectionState::Faulted;
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;
    use tokio_test::assert_ok;

    fn link_with(adapter: Arc<MockAdapter>) -> VehicleLink {
        let config = LinkConfig {
            connect_timeout: Duration::from_millis(100),
            connect_retries: 2,
            connect_backoff: Duration::from_millis(10),
            health_check_timeout: Duration::from_secs(2),
            link_timeout: Duration::from_secs(5),
        };
        VehicleLink::new(VehicleId(1), adapter, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_connected() {
        let adapter = Arc::new(MockAdapter::healthy());
        let mut link = link_with(adapter);
        assert_ok!(link.connect().await);
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_fails() {
        let adapter = Arc::new(MockAdapter::healthy());
        adapter.refuse_connects(10);
        let mut link = link_with(adapter.clone());

        let err = link.connect().await.unwrap_err();
        match err {
            FleetError::Connection { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_after_transient_refusals() {
        let adapter = Arc::new(MockAdapter::healthy());
        adapter.refuse_connects(2);
        let mut link = link_with(adapter);
        link.connect().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reaches_ready() {
        let adapter = Arc::new(MockAdapter::healthy());
        let mut link = link_with(adapter);
        link.connect().await.unwrap();
        link.wait_for_global_position(6).await.unwrap();
        assert!(link.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_times_out_on_poor_gps() {
        let adapter = Arc::new(MockAdapter::healthy());
        adapter.set_gps(3, fleet_domain::GpsFixType::Fix2d);
        let mut link = link_with(adapter);
        link.connect().await.unwrap();

        let err = link.wait_for_global_position(6).await.unwrap_err();
        assert!(matches!(err, FleetError::HealthCheck { .. }));
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let adapter = Arc::new(MockAdapter::healthy());
        let mut link = link_with(adapter);
        link.connect().await.unwrap();
        link.disconnect().await;
        assert_eq!(link.state(), ConnectionState::Disconnected);
        link.disconnect().await;
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
