//! [`ServiceLoop`] – the cooperative request/refresh loop.
//!
//! The loop is the only owner of the [`SlamService`].  Each iteration:
//!
//! 1. **Wait** up to `poll_interval` for one pending [`RemoteCall`].
//! 2. **Dispatch** it, if one arrived, and send the reply back.
//! 3. **Refresh** through the [`RefreshHook`], which decides whether the loop
//!    goes on.
//!
//! Calls and refreshes never overlap, so no call can observe a half-updated
//! grid.  The refresh cadence follows call traffic: an idle loop refreshes
//! once per `poll_interval`, a busy one once per call.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! use locoslam_middleware::{SimRobot, call_queue};
//! use locoslam_runtime::service::{SlamService, SlamSettings};
//! use locoslam_runtime::service_loop::{DefaultRefresh, ServiceLoop};
//!
//! # async fn run() -> Result<(), locoslam_types::SlamError> {
//! let service = SlamService::new(Box::new(SimRobot::demo()), SlamSettings::default()).await?;
//! let (_queue, calls) = call_queue(64);
//! let hook = DefaultRefresh::new(Arc::new(AtomicBool::new(false)), 5);
//! ServiceLoop::new(service, calls, hook, Duration::from_secs(2)).run().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use locoslam_middleware::RemoteCall;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::refresh_guard::RefreshGuard;
use crate::service::{RefreshReport, SlamService};

/// Default wait for a pending call before refreshing anyway.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// What the loop does after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Runs once per loop iteration, after the call (if any) was served.
#[async_trait]
pub trait RefreshHook: Send {
    async fn refresh(&mut self, service: &mut SlamService) -> LoopControl;
}

// ─────────────────────────────────────────────────────────────────────────────
// DefaultRefresh
// ─────────────────────────────────────────────────────────────────────────────

/// Refreshes the map every iteration until `shutdown` is raised.
///
/// Failed refreshes are logged at `warn`; once `escalate_after` refreshes
/// in a row have failed they are logged at `error`.
pub struct DefaultRefresh {
    shutdown: Arc<AtomicBool>,
    guard: RefreshGuard,
}

impl DefaultRefresh {
    pub fn new(shutdown: Arc<AtomicBool>, escalate_after: usize) -> Self {
        Self {
            shutdown,
            guard: RefreshGuard::new(escalate_after),
        }
    }

    /// Consecutive failed refreshes so far.
    pub fn failure_streak(&self) -> usize {
        self.guard.streak()
    }
}

#[async_trait]
impl RefreshHook for DefaultRefresh {
    async fn refresh(&mut self, service: &mut SlamService) -> LoopControl {
        if self.shutdown.load(Ordering::Acquire) {
            return LoopControl::Stop;
        }
        match service.refresh().await {
            RefreshReport::Updated { points } => {
                self.guard.record_success();
                debug!(points, "refresh complete");
            }
            RefreshReport::Degraded(e) => {
                if self.guard.record_failure() {
                    error!(
                        streak = self.guard.streak(),
                        threshold = self.guard.threshold(),
                        error = %e,
                        "map is going stale: refreshes keep failing"
                    );
                } else {
                    warn!(error = %e, "refresh failed; serving previous map");
                }
            }
        }
        LoopControl::Continue
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServiceLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ServiceLoop<H> {
    service: SlamService,
    calls: mpsc::Receiver<RemoteCall>,
    calls_open: bool,
    hook: H,
    poll_interval: Duration,
}

impl<H: RefreshHook> ServiceLoop<H> {
    pub fn new(
        service: SlamService,
        calls: mpsc::Receiver<RemoteCall>,
        hook: H,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            calls,
            calls_open: true,
            hook,
            poll_interval,
        }
    }

    pub fn service(&self) -> &SlamService {
        &self.service
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// Run iterations until the hook returns [`LoopControl::Stop`], then hand
    /// the service back.
    pub async fn run(mut self) -> SlamService {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "service loop started");
        while self.step().await == LoopControl::Continue {}
        info!("service loop stopped");
        self.service
    }

    /// One iteration: serve at most one call, then refresh.
    pub async fn step(&mut self) -> LoopControl {
        if let Some(call) = self.next_call().await {
            self.serve(call).await;
        }
        self.hook
            .refresh(&mut self.service)
            .instrument(info_span!("refresh"))
            .await
    }

    async fn next_call(&mut self) -> Option<RemoteCall> {
        if !self.calls_open {
            tokio::time::sleep(self.poll_interval).await;
            return None;
        }
        match tokio::time::timeout(self.poll_interval, self.calls.recv()).await {
            Ok(Some(call)) => Some(call),
            Ok(None) => {
                warn!("call queue closed; continuing with refreshes only");
                self.calls_open = false;
                None
            }
            Err(_) => None,
        }
    }

    async fn serve(&mut self, call: RemoteCall) {
        let method = call.request.method();
        let outcome = self
            .service
            .dispatch(call.request.clone())
            .instrument(info_span!("remote_call", method))
            .await;
        if let Err(e) = &outcome {
            debug!(method, error = %e, "remote call failed");
        }
        call.respond(outcome);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::SlamSettings;
    use locoslam_middleware::{RpcClient, RpcServer, SimRobot, call_queue};
    use locoslam_types::{
        MapCell, MapConfig, ObstacleLocation, RealPoint, SlamError, SlamReply, SlamRequest,
    };
    use serde_json::json;

    const FAST: Duration = Duration::from_millis(10);

    /// Counts refreshes and stops after `limit` of them.
    struct CountingHook {
        refreshes: usize,
        limit: usize,
    }

    #[async_trait]
    impl RefreshHook for CountingHook {
        async fn refresh(&mut self, _service: &mut SlamService) -> LoopControl {
            self.refreshes += 1;
            if self.refreshes >= self.limit {
                LoopControl::Stop
            } else {
                LoopControl::Continue
            }
        }
    }

    fn counting(limit: usize) -> CountingHook {
        CountingHook { refreshes: 0, limit }
    }

    async fn small_service(sim: Arc<SimRobot>) -> SlamService {
        let settings = SlamSettings {
            map: MapConfig {
                map_size_cm: 100,
                ..MapConfig::default()
            },
            ..SlamSettings::default()
        };
        SlamService::new(Box::new(sim), settings).await.unwrap()
    }

    #[tokio::test]
    async fn idle_step_still_refreshes() {
        let (_tx, rx) = mpsc::channel(4);
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let mut lp = ServiceLoop::new(service, rx, counting(10), FAST);

        assert_eq!(lp.step().await, LoopControl::Continue);
        assert_eq!(lp.hook().refreshes, 1);
    }

    #[tokio::test]
    async fn step_serves_one_call_then_refreshes() {
        let (tx, rx) = mpsc::channel(4);
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let mut lp = ServiceLoop::new(service, rx, counting(10), FAST);

        let (first, first_rx) = RemoteCall::new(SlamRequest::GetMapResolution);
        let (second, mut second_rx) = RemoteCall::new(SlamRequest::GetMap);
        tx.send(first).await.unwrap();
        tx.send(second).await.unwrap();

        lp.step().await;
        assert_eq!(first_rx.await.unwrap().unwrap(), SlamReply::Resolution(5));
        assert!(second_rx.try_recv().is_err(), "one call per iteration");
        assert_eq!(lp.hook().refreshes, 1);

        lp.step().await;
        assert_eq!(second_rx.await.unwrap().unwrap(), SlamReply::Obstacles(vec![]));
    }

    #[tokio::test]
    async fn calls_are_served_in_arrival_order() {
        let (tx, rx) = mpsc::channel(4);
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let mut lp = ServiceLoop::new(service, rx, counting(10), FAST);

        let cell = MapCell::new(4, 4);
        let (add, add_rx) = RemoteCall::new(SlamRequest::AddObstacle(ObstacleLocation::Map(cell)));
        let (get, get_rx) = RemoteCall::new(SlamRequest::GetMap);
        tx.send(add).await.unwrap();
        tx.send(get).await.unwrap();
        lp.step().await;
        lp.step().await;

        assert_eq!(add_rx.await.unwrap().unwrap(), SlamReply::Done);
        let SlamReply::Obstacles(points) = get_rx.await.unwrap().unwrap() else {
            panic!("expected an obstacle list");
        };
        assert_eq!(points.len(), 1);
    }

    #[tokio::test]
    async fn failing_call_does_not_stop_the_loop() {
        let (tx, rx) = mpsc::channel(4);
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let mut lp = ServiceLoop::new(service, rx, counting(10), FAST);

        let (bad, bad_rx) = RemoteCall::new(SlamRequest::AddObstacle(ObstacleLocation::Real(
            RealPoint::new(50.0, 0.0),
        )));
        tx.send(bad).await.unwrap();
        assert_eq!(lp.step().await, LoopControl::Continue);
        assert!(matches!(
            bad_rx.await.unwrap(),
            Err(SlamError::OutOfBounds { .. })
        ));
        assert!(lp.service().obstacle_list().is_empty());
    }

    #[tokio::test]
    async fn closed_queue_degrades_to_refresh_only() {
        let (tx, rx) = mpsc::channel::<RemoteCall>(1);
        drop(tx);
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let lp = ServiceLoop::new(service, rx, counting(3), FAST);

        let service = lp.run().await;
        assert_eq!(service.map_resolution(), 5);
    }

    #[tokio::test]
    async fn default_hook_stops_on_shutdown_flag() {
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let service = small_service(Arc::new(SimRobot::floor(2, 2))).await;
        let mut lp = ServiceLoop::new(service, rx, DefaultRefresh::new(Arc::clone(&shutdown), 3), FAST);

        assert_eq!(lp.step().await, LoopControl::Continue);
        shutdown.store(true, Ordering::Release);
        assert_eq!(lp.step().await, LoopControl::Stop);
    }

    #[tokio::test]
    async fn default_hook_keeps_going_through_failures() {
        let (_tx, rx) = mpsc::channel(1);
        let sim = Arc::new(SimRobot::floor(2, 2));
        let service = small_service(Arc::clone(&sim)).await;
        let hook = DefaultRefresh::new(Arc::new(AtomicBool::new(false)), 2);
        let mut lp = ServiceLoop::new(service, rx, hook, FAST);

        sim.set_failing(true).await;
        for _ in 0..5 {
            assert_eq!(lp.step().await, LoopControl::Continue);
        }
        // Counts on past the escalation threshold.
        assert_eq!(lp.hook().failure_streak(), 5);

        sim.set_failing(false).await;
        lp.step().await;
        assert_eq!(lp.hook().failure_streak(), 0);
    }

    #[tokio::test]
    async fn remote_callers_reach_the_loop_over_the_wire() {
        let (queue, rx) = call_queue(16);
        let service = small_service(Arc::new(SimRobot::floor(4, 4))).await;
        let shutdown = Arc::new(AtomicBool::new(false));
        let lp = ServiceLoop::new(service, rx, DefaultRefresh::new(Arc::clone(&shutdown), 3), FAST);
        let loop_task = tokio::spawn(lp.run());

        let bound = RpcServer::new(queue)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = bound.url();
        bound.spawn();

        let client = RpcClient::connect(&url).await.unwrap();
        assert_eq!(client.call("getMapResolution", json!(null)).await.unwrap(), json!(5));
        assert_eq!(
            client.call("real2map", json!({"x": 0.0, "y": 0.0})).await.unwrap(),
            json!({"row": 10, "col": 10})
        );
        assert_eq!(client.call("getMap", json!(null)).await.unwrap(), json!([]));

        client
            .call("addObstacle", json!({"location": [3, 4], "in_map": true}))
            .await
            .unwrap();
        let obstacles = client.call("getMap", json!(null)).await.unwrap();
        assert_eq!(obstacles.as_array().map(Vec::len), Some(1));

        let map = client.call("getTraversableMap", json!(null)).await.unwrap();
        assert_eq!(map["rows"], json!(20));
        assert_eq!(map["cells"].as_array().map(Vec::len), Some(400));

        let err = client
            .call("addObstacle", json!({"location": [99, 0], "in_map": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, SlamError::OutOfBounds { .. }));

        let err = client
            .call("real2map", json!({"x": 1.0e30, "y": 0.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, SlamError::OutOfRange(_)));
        let err = client
            .call("map2real", json!({"row": i64::MIN, "col": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, SlamError::OutOfRange(_)));
        let err = client
            .call("resetMap", json!({"map_size_cm": u32::MAX}))
            .await
            .unwrap_err();
        assert!(matches!(err, SlamError::InvalidConfig(_)));

        client.call("resetMap", json!({"map_size_cm": 200})).await.unwrap();
        let map = client.call("getTraversableMap", json!(null)).await.unwrap();
        assert_eq!(map["rows"], json!(40));

        shutdown.store(true, Ordering::Release);
        let service = loop_task.await.unwrap();
        assert!(service.obstacle_list().is_empty());
    }
}
