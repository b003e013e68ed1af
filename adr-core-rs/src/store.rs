//! Persistence interface for identities and telemetry.
//!
//! The core only talks to storage through [`Store`]. Two backends exist:
//! - [`MemoryStore`] for tests and throwaway runs
//! - [`crate::SqliteStore`] for durable operation
//!
//! Samples of one resource are returned in the order they were appended.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StoreError;
use crate::types::{ResourceIdentity, Sample};

/// Record store shared by the coordinator and the display poller
#[async_trait]
pub trait Store: Send + Sync {
    /// Identity stored under `name`
    async fn get(&self, name: &str) -> Result<Option<ResourceIdentity>, StoreError>;

    /// Identity carrying `resource_id`
    async fn get_by_resource(&self, resource_id: &str)
        -> Result<Option<ResourceIdentity>, StoreError>;

    /// Insert a new identity; [`StoreError::Duplicate`] if the name is taken
    async fn put(&self, identity: &ResourceIdentity) -> Result<(), StoreError>;

    /// All identities in insertion order
    async fn list_identities(&self) -> Result<Vec<ResourceIdentity>, StoreError>;

    /// Append one sample
    async fn append_sample(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Samples of a resource in append order
    async fn query_by_resource(&self, resource_id: &str) -> Result<Vec<Sample>, StoreError>;
}

/// In-memory store
pub struct MemoryStore {
    identities: RwLock<Vec<ResourceIdentity>>,
    samples: RwLock<HashMap<String, Vec<Sample>>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(Vec::new()),
            samples: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Fault injection: while offline every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceIdentity>, StoreError> {
        self.check_online()?;
        Ok(self
            .identities
            .read()
            .iter()
            .find(|i| i.name == name)
            .cloned())
    }

    async fn get_by_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceIdentity>, StoreError> {
        self.check_online()?;
        Ok(self
            .identities
            .read()
            .iter()
            .find(|i| i.resource_id == resource_id)
            .cloned())
    }

    async fn put(&self, identity: &ResourceIdentity) -> Result<(), StoreError> {
        self.check_online()?;
        let mut identities = self.identities.write();
        if identities.iter().any(|i| i.name == identity.name) {
            return Err(StoreError::Duplicate(identity.name.clone()));
        }
        identities.push(identity.clone());
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<ResourceIdentity>, StoreError> {
        self.check_online()?;
        Ok(self.identities.read().clone())
    }

    async fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        self.check_online()?;
        self.samples
            .write()
            .entry(sample.resource_id.clone())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn query_by_resource(&self, resource_id: &str) -> Result<Vec<Sample>, StoreError> {
        self.check_online()?;
        Ok(self
            .samples
            .read()
            .get(resource_id)
            .cloned()
            .unwrap_or_default())
    }
}
