//! In-process VTN/VEN link
//!
//! Stands in for the wire protocol: calls the coordinator's inbound
//! callbacks on behalf of the VEN and feeds event notices from the
//! coordinator's sink back into the agent.

use adr_core::{
    Coordinator, DecisionOutcome, DrError, EventNotice, RegistrationReply, ReportGrant,
    ResourceId, UpdateSummary, VenAgent, VenHandler, VtnHandler,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// VEN state once registration and report registration went through
#[derive(Debug, Clone)]
pub struct Session {
    pub resource_id: ResourceId,
    pub grant: ReportGrant,
}

/// Loopback link between one coordinator and one VEN agent
pub struct LoopbackLink {
    coordinator: Arc<Coordinator>,
    agent: Arc<VenAgent>,
    notices: mpsc::Receiver<EventNotice>,
}

impl LoopbackLink {
    pub fn new(
        coordinator: Arc<Coordinator>,
        agent: Arc<VenAgent>,
        notices: mpsc::Receiver<EventNotice>,
    ) -> Self {
        Self {
            coordinator,
            agent,
            notices,
        }
    }

    /// Register the VEN and its report.
    ///
    /// A rejected registration means the name is already known (e.g. from a
    /// previous run on the same database); the stored identity is reused.
    pub async fn connect(&self) -> Result<Session, DrError> {
        let name = self.agent.name();

        let resource_id = match self.coordinator.on_register(name).await? {
            RegistrationReply::Accepted { resource_id, registration_id } => {
                info!(
                    "Link: {} registered (resource={}, registration={})",
                    name, resource_id, registration_id
                );
                resource_id
            }
            RegistrationReply::Rejected => {
                let existing = self
                    .coordinator
                    .registry()
                    .lookup(name)
                    .await?
                    .ok_or_else(|| DrError::UnknownResource(name.to_string()))?;
                warn!(
                    "Link: {} already registered, resuming as {}",
                    name, existing.resource_id
                );
                existing.resource_id
            }
        };

        let grant = self
            .coordinator
            .on_report_register(self.agent.report_request(&resource_id))
            .await?;
        info!(
            "Link: Report {} granted, sampling every {:?}",
            grant.handle, grant.sampling_interval
        );

        Ok(Session { resource_id, grant })
    }

    /// Collect one value and deliver it as a single-sample batch.
    ///
    /// Returns `Ok(None)` when collection exceeds the agent's timeout.
    pub async fn tick(&self, session: &Session) -> Result<Option<UpdateSummary>, DrError> {
        let limit = self.agent.config().collect_timeout;
        let value = match timeout(limit, self.agent.on_collect_report()).await {
            Ok(value) => value,
            Err(_) => {
                warn!("Link: Collection timed out after {:?}, skipping tick", limit);
                return Ok(None);
            }
        };

        let summary = self
            .coordinator
            .on_update_report(session.grant.handle, &[(Utc::now(), value)])
            .await?;
        Ok(Some(summary))
    }

    /// Ask the agent about a notice and return its decision to the coordinator
    pub async fn answer(
        &self,
        session: &Session,
        notice: &EventNotice,
    ) -> Result<Option<DecisionOutcome>, DrError> {
        if !notice.targets.contains(&session.resource_id) {
            debug!("Link: Event {} not targeted at us, ignoring", notice.event_id);
            return Ok(None);
        }

        let decision = self.agent.on_event(notice);
        let outcome = self
            .coordinator
            .on_event_decision(&session.resource_id, &notice.event_id, decision)
            .await?;
        Ok(Some(outcome))
    }

    /// Drive the exchange until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DrError> {
        let session = self.connect().await?;
        let mut ticker = tokio::time::interval(session.grant.sampling_interval);

        info!("Link: Main loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(&session).await {
                        Ok(Some(summary)) if !summary.events.is_empty() => {
                            info!("Link: Batch raised {} event(s)", summary.events.len());
                        }
                        Ok(_) => {}
                        Err(e @ DrError::UnknownSubscription(_)) => return Err(e),
                        Err(e) => warn!("Link: Report update failed: {}", e),
                    }
                }

                Some(notice) = self.notices.recv() => {
                    match self.answer(&session, &notice).await {
                        Ok(Some(outcome)) => debug!("Link: Event {} -> {:?}", notice.event_id, outcome),
                        Ok(None) => {}
                        Err(e) => warn!("Link: Decision for {} failed: {}", notice.event_id, e),
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Link: Shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
