//! Resource registry
//!
//! Maps a VEN name to the identifiers the coordinator issued for it. A name is
//! registered at most once; the lookup and the write happen under one lock so
//! two concurrent registrations of the same name cannot both succeed.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DrError, StoreError};
use crate::store::Store;
use crate::types::ResourceIdentity;

/// Registry of resource identities backed by a [`Store`]
pub struct Registry {
    store: Arc<dyn Store>,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Register a new name and issue its identifiers.
    ///
    /// Fails with [`DrError::AlreadyRegistered`] if the name is already known.
    pub async fn register(&self, name: &str) -> Result<ResourceIdentity, DrError> {
        if name.is_empty() {
            return Err(DrError::InvalidInput("resource name is empty".to_string()));
        }

        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.store.get(name).await.map_err(storage_fault)? {
            info!(
                "Registry: {} already registered as {}",
                name, existing.resource_id
            );
            return Err(DrError::AlreadyRegistered(name.to_string()));
        }

        let identity = ResourceIdentity::new(name, generate_id(), generate_id());

        match self.store.put(&identity).await {
            Ok(()) => {
                info!(
                    "Registry: Registered {} (resource={}, registration={})",
                    name, identity.resource_id, identity.registration_id
                );
                Ok(identity)
            }
            // Another writer sharing the store got there first
            Err(StoreError::Duplicate(_)) => {
                info!("Registry: {} claimed concurrently in store", name);
                Err(DrError::AlreadyRegistered(name.to_string()))
            }
            Err(e) => Err(storage_fault(e)),
        }
    }

    /// Identity stored under `name`
    pub async fn lookup(&self, name: &str) -> Result<Option<ResourceIdentity>, DrError> {
        self.store.get(name).await.map_err(storage_fault)
    }

    /// Identity carrying the coordinator-issued `resource_id`
    pub async fn resolve(&self, resource_id: &str) -> Result<Option<ResourceIdentity>, DrError> {
        self.store.get_by_resource(resource_id).await.map_err(storage_fault)
    }

    /// All registered identities
    pub async fn identities(&self) -> Result<Vec<ResourceIdentity>, DrError> {
        self.store.list_identities().await.map_err(storage_fault)
    }
}

fn storage_fault(e: StoreError) -> DrError {
    warn!("Registry: Store failure: {}", e);
    DrError::StorageUnavailable(e)
}

/// Fresh opaque identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
