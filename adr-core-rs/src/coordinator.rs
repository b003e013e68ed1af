//! Coordinator (VTN) facade
//!
//! Entry points invoked by the protocol layer:
//!
//! | Callback             | Effect                                            |
//! |----------------------|---------------------------------------------------|
//! | `on_register`        | issue ids, publish the current resource           |
//! | `on_report_register` | record subscription, return handle + interval     |
//! | `on_update_report`   | persist each sample, evaluate, raise events       |
//! | `on_event_decision`  | record the first decision for an event            |
//!
//! Inputs are validated here, before any component is touched, so a rejected
//! call leaves no partial state behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::VtnConfig;
use crate::dispatcher::{EventDispatcher, EventSink, IdSource};
use crate::error::DrError;
use crate::registry::Registry;
use crate::reports::SubscriptionManager;
use crate::store::Store;
use crate::threshold::ThresholdEvaluator;
use crate::types::{
    DecisionOutcome, DrEvent, Evaluation, RegistrationReply, ReportGrant, ReportHandle,
    ReportRequest, ReportSubscription, ResourceId, Sample, UpdateSummary, OptType,
};

/// Longest accepted resource name
const MAX_NAME_LEN: usize = 256;

/// Inbound protocol callbacks handled by the coordinator
#[async_trait]
pub trait VtnHandler: Send + Sync {
    /// Registration request; a known name yields [`RegistrationReply::Rejected`]
    async fn on_register(&self, name: &str) -> Result<RegistrationReply, DrError>;

    /// Report registration request
    async fn on_report_register(&self, request: ReportRequest) -> Result<ReportGrant, DrError>;

    /// Report update batch for a subscription, processed in order
    async fn on_update_report(
        &self,
        handle: ReportHandle,
        samples: &[(DateTime<Utc>, f64)],
    ) -> Result<UpdateSummary, DrError>;

    /// Opt decision for an event
    async fn on_event_decision(
        &self,
        resource_id: &str,
        event_id: &str,
        decision: OptType,
    ) -> Result<DecisionOutcome, DrError>;
}

/// VTN-side orchestration of registry, subscriptions, evaluator and dispatcher
pub struct Coordinator {
    config: VtnConfig,
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    reports: SubscriptionManager,
    evaluator: ThresholdEvaluator,
    dispatcher: EventDispatcher,
    current: watch::Sender<Option<ResourceId>>,
}

impl Coordinator {
    pub fn new(config: VtnConfig, store: Arc<dyn Store>, sink: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(Registry::new(store.clone()));
        let reports = SubscriptionManager::new(registry.clone());
        let evaluator = ThresholdEvaluator::new(config.trigger_threshold);
        let dispatcher = EventDispatcher::new(sink);
        let (current, _) = watch::channel(None);

        Self {
            config,
            store,
            registry,
            reports,
            evaluator,
            dispatcher,
            current,
        }
    }

    /// Replace the event id generator
    pub fn with_event_ids(mut self, source: IdSource) -> Self {
        self.dispatcher = self.dispatcher.with_id_source(source);
        self
    }

    pub fn config(&self) -> &VtnConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Backing store, shared with read-only consumers
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Follow the most recently registered resource
    pub fn current_resource(&self) -> watch::Receiver<Option<ResourceId>> {
        self.current.subscribe()
    }

    /// All subscriptions
    pub fn subscriptions(&self) -> Vec<ReportSubscription> {
        self.reports.list()
    }

    /// All events in creation order
    pub fn events(&self) -> Vec<DrEvent> {
        self.dispatcher.events()
    }

    pub fn event(&self, event_id: &str) -> Option<DrEvent> {
        self.dispatcher.get(event_id)
    }
}

fn validate_name(name: &str) -> Result<(), DrError> {
    if name.trim().is_empty() {
        return Err(DrError::InvalidInput("resource name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DrError::InvalidInput(format!(
            "resource name longer than {} bytes",
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(DrError::InvalidInput(
            "resource name contains control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_report_request(request: &ReportRequest) -> Result<(), DrError> {
    if request.resource_id.is_empty() {
        return Err(DrError::InvalidInput("report without resource id".to_string()));
    }
    if request.report_resource_id.is_empty() || request.measurement.is_empty() {
        return Err(DrError::InvalidInput(
            "report without device or measurement".to_string(),
        ));
    }
    if request.min_interval.is_zero() {
        return Err(DrError::InvalidInput("zero sampling interval".to_string()));
    }
    Ok(())
}

fn validate_samples(samples: &[(DateTime<Utc>, f64)]) -> Result<(), DrError> {
    if let Some((time, value)) = samples.iter().find(|(_, v)| !v.is_finite()) {
        return Err(DrError::InvalidInput(format!(
            "non-finite value {} at {}",
            value, time
        )));
    }
    Ok(())
}

#[async_trait]
impl VtnHandler for Coordinator {
    async fn on_register(&self, name: &str) -> Result<RegistrationReply, DrError> {
        validate_name(name)?;

        match self.registry.register(name).await {
            Ok(identity) => {
                self.current.send_replace(Some(identity.resource_id.clone()));
                Ok(RegistrationReply::Accepted {
                    resource_id: identity.resource_id,
                    registration_id: identity.registration_id,
                })
            }
            Err(DrError::AlreadyRegistered(_)) => Ok(RegistrationReply::Rejected),
            Err(e) => Err(e),
        }
    }

    async fn on_report_register(&self, request: ReportRequest) -> Result<ReportGrant, DrError> {
        validate_report_request(&request)?;
        self.reports.subscribe(&request).await
    }

    async fn on_update_report(
        &self,
        handle: ReportHandle,
        samples: &[(DateTime<Utc>, f64)],
    ) -> Result<UpdateSummary, DrError> {
        validate_samples(samples)?;

        let entry = self
            .reports
            .entry(handle)
            .ok_or(DrError::UnknownSubscription(handle))?;

        // One batch at a time per subscription
        let _ingest = entry.ingest.lock().await;
        let sub = &entry.subscription;
        let mut summary = UpdateSummary::default();

        for (timestamp, value) in samples {
            debug!(
                "VEN {} reported {} = {} at {} for resource {}",
                sub.resource_id, sub.measurement, value, timestamp, sub.report_resource_id
            );

            let sample = Sample {
                resource_id: sub.resource_id.clone(),
                report_resource_id: sub.report_resource_id.clone(),
                timestamp: *timestamp,
                value: *value,
            };
            self.store.append_sample(&sample).await.map_err(|e| {
                warn!("Coordinator: Failed to store sample for {}: {}", sub.resource_id, e);
                DrError::StorageUnavailable(e)
            })?;
            summary.stored += 1;

            if self.evaluator.evaluate(*value) == Evaluation::Trigger {
                info!(
                    "Coordinator: {} {} = {} below {}, raising event",
                    sub.resource_id,
                    sub.measurement,
                    value,
                    self.evaluator.threshold()
                );
                let event_id = self
                    .dispatcher
                    .raise_event(
                        &sub.resource_id,
                        Utc::now(),
                        self.config.event_duration,
                        self.config.event_payload,
                    )
                    .await?;
                summary.events.push(event_id);
            }
        }

        Ok(summary)
    }

    async fn on_event_decision(
        &self,
        resource_id: &str,
        event_id: &str,
        decision: OptType,
    ) -> Result<DecisionOutcome, DrError> {
        self.dispatcher.record_decision(event_id, resource_id, decision)
    }
}
