//! Report subscriptions
//!
//! Tracks which resource reports which measurement and how often. Each
//! subscription gets an opaque [`ReportHandle`]; later update batches only
//! carry the handle. Subscriptions live for the process lifetime.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::DrError;
use crate::registry::Registry;
use crate::types::{ReportGrant, ReportHandle, ReportRequest, ReportSubscription};

/// Sampling interval the coordinator asks for: always the fastest cadence
/// the requester offered.
pub fn negotiate_interval(min: Duration, max: Duration) -> Result<Duration, DrError> {
    if min > max {
        return Err(DrError::InvalidSamplingWindow { min, max });
    }
    Ok(min)
}

/// Subscription plus the lock serializing its update batches
pub(crate) struct SubscriptionEntry {
    pub(crate) subscription: ReportSubscription,
    pub(crate) ingest: Mutex<()>,
}

/// Subscription table
pub struct SubscriptionManager {
    registry: Arc<Registry>,
    next_handle: AtomicU64,
    subscriptions: RwLock<HashMap<ReportHandle, Arc<SubscriptionEntry>>>,
}

impl SubscriptionManager {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            next_handle: AtomicU64::new(1),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Accept a report registration.
    ///
    /// The resource must be registered and `min_interval <= max_interval`.
    pub async fn subscribe(&self, request: &ReportRequest) -> Result<ReportGrant, DrError> {
        let sampling_interval = negotiate_interval(request.min_interval, request.max_interval)?;

        if self.registry.resolve(&request.resource_id).await?.is_none() {
            return Err(DrError::UnknownResource(request.resource_id.clone()));
        }

        let handle = ReportHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let subscription = ReportSubscription {
            handle,
            resource_id: request.resource_id.clone(),
            report_resource_id: request.report_resource_id.clone(),
            measurement: request.measurement.clone(),
            unit: request.unit.clone(),
            scale: request.scale.clone(),
            sampling_interval,
            subscribed_at: Utc::now(),
        };

        info!(
            "Subscriptions: {} reports {} ({}) on {} every {:?} [{}]",
            subscription.resource_id,
            subscription.measurement,
            subscription.unit,
            subscription.report_resource_id,
            sampling_interval,
            handle
        );

        self.subscriptions.write().insert(
            handle,
            Arc::new(SubscriptionEntry {
                subscription,
                ingest: Mutex::new(()),
            }),
        );

        Ok(ReportGrant {
            handle,
            sampling_interval,
        })
    }

    /// Subscription behind a handle
    pub fn get(&self, handle: ReportHandle) -> Option<ReportSubscription> {
        self.subscriptions
            .read()
            .get(&handle)
            .map(|e| e.subscription.clone())
    }

    pub(crate) fn entry(&self, handle: ReportHandle) -> Option<Arc<SubscriptionEntry>> {
        self.subscriptions.read().get(&handle).cloned()
    }

    /// All subscriptions ordered by handle
    pub fn list(&self) -> Vec<ReportSubscription> {
        let mut subs: Vec<_> = self
            .subscriptions
            .read()
            .values()
            .map(|e| e.subscription.clone())
            .collect();
        subs.sort_by_key(|s| s.handle);
        subs
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
