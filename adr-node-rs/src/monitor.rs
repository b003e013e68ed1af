//! Display poller
//!
//! Periodically reads the stored series of the most recently registered
//! resource and logs its length and latest point.

use adr_core::{ResourceId, Store, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the display would render on one poll
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub resource_id: ResourceId,
    pub points: usize,
    pub latest: Option<(DateTime<Utc>, f64)>,
}

pub struct Monitor {
    store: Arc<dyn Store>,
    current: watch::Receiver<Option<ResourceId>>,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn Store>,
        current: watch::Receiver<Option<ResourceId>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            current,
            poll_interval,
        }
    }

    /// Read the series of the current resource, `None` before any registration
    pub async fn poll(&self) -> Result<Option<Snapshot>, StoreError> {
        let resource_id = match self.current.borrow().clone() {
            Some(id) => id,
            None => return Ok(None),
        };

        let samples = self.store.query_by_resource(&resource_id).await?;
        Ok(Some(Snapshot {
            points: samples.len(),
            latest: samples.last().map(|s| (s.timestamp, s.value)),
            resource_id,
        }))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut last_points = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll().await {
                        Ok(Some(snapshot)) => {
                            if last_points == Some(snapshot.points) {
                                continue;
                            }
                            last_points = Some(snapshot.points);
                            match snapshot.latest {
                                Some((time, value)) => info!(
                                    "Monitor: {} has {} point(s), latest {} at {}",
                                    snapshot.resource_id, snapshot.points, value, time
                                ),
                                None => info!("Monitor: {} has no points yet", snapshot.resource_id),
                            }
                        }
                        Ok(None) => debug!("Monitor: No resource registered yet"),
                        Err(e) => warn!("Monitor: Store read failed: {}", e),
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Monitor: Stopped");
                        return;
                    }
                }
            }
        }
    }
}
