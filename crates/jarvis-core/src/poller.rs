//! Periodic backend health and metrics polling

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::api::JarvisClient;
use crate::state::{BackendStatus, SystemMetrics};

/// The two backend reads the pollers need
pub trait Probe: Send + Sync + 'static {
    fn check_health(&self) -> impl Future<Output = BackendStatus> + Send;
    fn fetch_metrics(&self) -> impl Future<Output = Result<SystemMetrics>> + Send;
}

impl Probe for JarvisClient {
    fn check_health(&self) -> impl Future<Output = BackendStatus> + Send {
        JarvisClient::check_health(self)
    }

    fn fetch_metrics(&self) -> impl Future<Output = Result<SystemMetrics>> + Send {
        self.system_metrics()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Status(BackendStatus),
    Metrics(SystemMetrics),
}

/// Health and metrics loops. Dropping the value stops both.
pub struct Pollers {
    health: JoinHandle<()>,
    metrics: JoinHandle<()>,
    status: watch::Receiver<BackendStatus>,
}

impl Pollers {
    pub fn spawn<P, F>(probe: P, health_every: Duration, metrics_every: Duration, emit: F) -> Self
    where
        P: Probe,
        F: Fn(PollEvent) + Send + Sync + 'static,
    {
        let probe = Arc::new(probe);
        let emit = Arc::new(emit);
        let (status_tx, status_rx) = watch::channel(BackendStatus::Checking);

        let health = {
            let probe = probe.clone();
            let emit = emit.clone();
            tokio::spawn(async move {
                let mut ticker = interval(health_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let status = probe.check_health().await;
                    let changed = status_tx.send_if_modified(|current| {
                        if *current == status {
                            false
                        } else {
                            *current = status;
                            true
                        }
                    });
                    if changed {
                        info!(status = status.label(), "backend status changed");
                    }
                    emit(PollEvent::Status(status));
                }
            })
        };

        let metrics = {
            let mut status_rx = status_rx.clone();
            tokio::spawn(async move {
                let mut ticker = interval(metrics_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut online = false;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        changed = status_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let now_online = *status_rx.borrow_and_update() == BackendStatus::Online;
                            let came_online = now_online && !online;
                            online = now_online;
                            if !came_online {
                                continue;
                            }
                            // Poll right away, then keep the regular cadence from here
                            ticker.reset();
                        }
                    }

                    if !online {
                        continue;
                    }
                    match probe.fetch_metrics().await {
                        Ok(metrics) => emit(PollEvent::Metrics(metrics)),
                        Err(e) => debug!("metrics poll failed: {e}"),
                    }
                }
            })
        };

        Self {
            health,
            metrics,
            status: status_rx,
        }
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.borrow()
    }
}

impl Drop for Pollers {
    fn drop(&mut self) {
        self.health.abort();
        self.metrics.abort();
    }
}
