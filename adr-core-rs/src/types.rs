//! Core types for the demand-response node

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DrError;

/// Coordinator-assigned resource (VEN) identifier
pub type ResourceId = String;

/// Coordinator-assigned registration identifier
pub type RegistrationId = String;

/// Coordinator-assigned event identifier
pub type EventId = String;

/// Signal name carried by every raised event
pub const SIGNAL_NAME_SIMPLE: &str = "simple";

/// Signal type carried by every raised event
pub const SIGNAL_TYPE_LEVEL: &str = "level";

/// One registered resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub name: String,
    pub resource_id: ResourceId,
    pub registration_id: RegistrationId,
}

impl ResourceIdentity {
    pub fn new(
        name: impl Into<String>,
        resource_id: impl Into<ResourceId>,
        registration_id: impl Into<RegistrationId>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_id: resource_id.into(),
            registration_id: registration_id.into(),
        }
    }
}

/// Answer to a registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RegistrationReply {
    Accepted {
        resource_id: ResourceId,
        registration_id: RegistrationId,
    },
    Rejected,
}

impl RegistrationReply {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RegistrationReply::Accepted { .. })
    }
}

/// One telemetry sample, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub resource_id: ResourceId,
    pub report_resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Report registration request as offered by a VEN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub resource_id: ResourceId,
    /// Device identifier within the resource, e.g. `device001`
    pub report_resource_id: String,
    pub measurement: String,
    pub unit: String,
    pub scale: String,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

/// Opaque handle correlating report updates with their subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportHandle(pub u64);

impl std::fmt::Display for ReportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpt-{}", self.0)
    }
}

/// Accepted report subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSubscription {
    pub handle: ReportHandle,
    pub resource_id: ResourceId,
    pub report_resource_id: String,
    pub measurement: String,
    pub unit: String,
    pub scale: String,
    pub sampling_interval: Duration,
    pub subscribed_at: DateTime<Utc>,
}

/// Answer to a report registration: where to send updates and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportGrant {
    pub handle: ReportHandle,
    pub sampling_interval: Duration,
}

/// Result of evaluating one reported value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Trigger,
    NoTrigger,
}

/// Decision a VEN sends back for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptType {
    #[serde(rename = "optIn")]
    OptIn,
    #[serde(rename = "optOut")]
    OptOut,
}

impl std::fmt::Display for OptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptType::OptIn => write!(f, "optIn"),
            OptType::OptOut => write!(f, "optOut"),
        }
    }
}

impl std::str::FromStr for OptType {
    type Err = DrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optIn" => Ok(OptType::OptIn),
            "optOut" => Ok(OptType::OptOut),
            _ => Err(DrError::InvalidInput(format!("unknown opt type: {}", s))),
        }
    }
}

/// Stored decision of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventDecision {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "optIn")]
    OptIn,
    #[serde(rename = "optOut")]
    OptOut,
}

impl EventDecision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventDecision::Pending)
    }

    /// Terminal decision as an opt type, `None` while pending
    pub fn opt(&self) -> Option<OptType> {
        match self {
            EventDecision::Pending => None,
            EventDecision::OptIn => Some(OptType::OptIn),
            EventDecision::OptOut => Some(OptType::OptOut),
        }
    }
}

impl From<OptType> for EventDecision {
    fn from(opt: OptType) -> Self {
        match opt {
            OptType::OptIn => EventDecision::OptIn,
            OptType::OptOut => EventDecision::OptOut,
        }
    }
}

impl std::fmt::Display for EventDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDecision::Pending => write!(f, "pending"),
            EventDecision::OptIn => write!(f, "optIn"),
            EventDecision::OptOut => write!(f, "optOut"),
        }
    }
}

/// Outcome of recording a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// First decision for the event, now stored
    Recorded(OptType),
    /// Event was already terminal; carries the stored decision
    AlreadyDecided(OptType),
}

impl DecisionOutcome {
    /// Decision stored on the event after the call
    pub fn stored(&self) -> OptType {
        match self {
            DecisionOutcome::Recorded(opt) | DecisionOutcome::AlreadyDecided(opt) => *opt,
        }
    }
}

/// Active interval of an event signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInterval {
    pub dtstart: DateTime<Utc>,
    pub duration: Duration,
    pub signal_payload: f64,
}

impl EventInterval {
    pub fn end(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.dtstart.checked_add_signed(d))
            .unwrap_or(self.dtstart)
    }
}

/// Demand-response event record, retained for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrEvent {
    pub event_id: EventId,
    /// Target resource
    pub resource_id: ResourceId,
    pub signal_name: String,
    pub signal_type: String,
    pub intervals: Vec<EventInterval>,
    pub created_at: DateTime<Utc>,
    pub decision: EventDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// Outbound create-event call succeeded
    pub delivered: bool,
}

impl DrEvent {
    /// Notice sent to the target VEN
    pub fn notice(&self) -> EventNotice {
        EventNotice {
            event_id: self.event_id.clone(),
            created_at: self.created_at,
            signal_name: self.signal_name.clone(),
            signal_type: self.signal_type.clone(),
            intervals: self.intervals.clone(),
            targets: vec![self.resource_id.clone()],
        }
    }

    /// Payload of the first interval
    pub fn payload(&self) -> Option<f64> {
        self.intervals.first().map(|i| i.signal_payload)
    }
}

/// Event as seen by a VEN: descriptor, signals, active period and targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotice {
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
    pub signal_name: String,
    pub signal_type: String,
    pub intervals: Vec<EventInterval>,
    pub targets: Vec<ResourceId>,
}

impl EventNotice {
    /// Span covered by all intervals, `None` if there are none
    pub fn active_period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.intervals.iter().map(|i| i.dtstart).min()?;
        let end = self.intervals.iter().map(|i| i.end()).max()?;
        Some((start, end))
    }
}

/// Result of ingesting one report-update batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Samples persisted
    pub stored: usize,
    /// Events raised, in sample order
    pub events: Vec<EventId>,
}
