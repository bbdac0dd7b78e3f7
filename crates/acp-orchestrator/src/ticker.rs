//! Periodic, single-flight tick driver

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acp_storage::Result;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::tick::{process_control_plane_tick, TickOptions, TickStore, TickSummary};

/// Clears the in-flight flag when a tick ends, including on error or panic
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs ticks one at a time.
///
/// A tick requested while another is running is skipped, not queued, so a
/// slow tick never causes a backlog of ticks behind it.
pub struct TickRunner<S: TickStore + ?Sized> {
    store: Arc<S>,
    options: TickOptions,
    in_flight: AtomicBool,
    last: RwLock<Option<TickSummary>>,
}

impl<S: TickStore + ?Sized> TickRunner<S> {
    pub fn new(store: Arc<S>, options: TickOptions) -> Self {
        Self {
            store,
            options,
            in_flight: AtomicBool::new(false),
            last: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &TickOptions {
        &self.options
    }

    /// True while a tick is running
    pub fn is_ticking(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Summary of the most recent successful tick
    pub async fn last_summary(&self) -> Option<TickSummary> {
        self.last.read().await.clone()
    }

    /// Run one tick unless one is already in flight.
    ///
    /// Returns `Ok(None)` when skipped.
    pub async fn try_tick(&self) -> Result<Option<TickSummary>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Tick already in flight, skipping");
            return Ok(None);
        }
        let _guard = InFlight(&self.in_flight);

        let summary = process_control_plane_tick(self.store.as_ref(), &self.options).await?;
        *self.last.write().await = Some(summary.clone());
        Ok(Some(summary))
    }

    /// Tick every `period` until `shutdown` fires or its sender is dropped.
    ///
    /// A failed tick is logged and the loop carries on.
    pub async fn run_until(&self, period: Duration, mut shutdown: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Tick loop started (every {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.try_tick().await {
                        error!("Control plane tick failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }
    }
}
