//! # ADR Core
//!
//! Registration, reporting and event-dispatch core for an OpenADR-style
//! demand-response node.
//!
//! The coordinator side (VTN) accepts resource registrations and report
//! subscriptions, ingests telemetry batches and raises demand-response events
//! when a reported value falls below the trigger threshold. The client side
//! (VEN) supplies telemetry and answers every event with an opt decision.
//!
//! ## Architecture
//!
//! ```text
//!   protocol layer (external)
//!       │ on_register / on_report_register / on_update_report / on_event_decision
//!       ▼
//! ┌──────────────────────────────────────────────┐
//! │              Coordinator (VTN)               │
//! │  ┌──────────┐ ┌───────────────┐ ┌──────────┐ │
//! │  │ Registry │ │ Subscriptions │ │Threshold │ │
//! │  └────┬─────┘ └───────────────┘ └────┬─────┘ │
//! │       │        ┌────────────────┐    │       │
//! │       │        │EventDispatcher │◄───┘       │
//! │       │        └───────┬────────┘            │
//! └───────┼────────────────┼─────────────────────┘
//!         ▼                ▼ create_event
//!   Store (memory/SQLite)  EventSink ──► VenAgent (VEN)
//! ```
//!
//! ## Event lifecycle
//!
//! | From      | To        | Trigger                          |
//! |-----------|-----------|----------------------------------|
//! | (none)    | `pending` | sample value below threshold     |
//! | `pending` | `optIn`   | first decision from the target   |
//! | `pending` | `optOut`  | first decision from the target   |
//!
//! Terminal decisions never change; later decisions are acknowledged as
//! [`DecisionOutcome::AlreadyDecided`].
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use adr_core::{ChannelSink, Coordinator, MemoryStore, VtnConfig, VtnHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, _notices) = ChannelSink::new(16);
//!     let coordinator = Coordinator::new(
//!         VtnConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(sink),
//!     );
//!
//!     let reply = coordinator.on_register("ven123").await?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod sqlite;
pub mod registry;
pub mod reports;
pub mod threshold;
pub mod dispatcher;
pub mod coordinator;
pub mod agent;

pub use types::*;
pub use error::{DrError, StoreError};
pub use config::{MonitorConfig, NodeConfig, StoreConfig, VenConfig, VtnConfig};
pub use store::{MemoryStore, Store};
pub use sqlite::SqliteStore;
pub use registry::Registry;
pub use reports::SubscriptionManager;
pub use threshold::{evaluate, ThresholdEvaluator, DEFAULT_TRIGGER_THRESHOLD};
pub use dispatcher::{ChannelSink, EventDispatcher, EventSink};
pub use coordinator::{Coordinator, VtnHandler};
pub use agent::{FixedMeasurement, MeasurementProvider, RandomMeasurement, VenAgent, VenHandler};
