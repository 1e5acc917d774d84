use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::rpc::StorageClient;
use crate::{CallContext, DfsError, RetryPolicy};

/// Lazily dialled, never evicted storage node handles keyed by address.
///
/// The map lock is only held to find an address slot. Dialling happens on the
/// slot itself, so a slow or failing node only delays callers that want that
/// same node. A failed dial leaves the slot empty and the next lookup dials
/// again; a cached handle is never health-checked afterwards.
pub struct ConnectionPool {
    http: Client,
    dial_policy: RetryPolicy,
    slots: Mutex<HashMap<String, Arc<OnceCell<StorageClient>>>>,
}

impl ConnectionPool {
    pub fn new(http: Client, dial_policy: RetryPolicy) -> Self {
        Self {
            http,
            dial_policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dial_policy(&self) -> RetryPolicy {
        self.dial_policy
    }

    pub async fn get_connection(
        &self,
        address: &str,
        ctx: &CallContext,
    ) -> Result<StorageClient, DfsError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(address.to_string()).or_default())
        };

        let client = slot
            .get_or_try_init(|| self.dial(address, ctx))
            .await?;
        Ok(client.clone())
    }

    /// Addresses with an established handle.
    pub async fn connected_addresses(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut addresses: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    async fn dial(&self, address: &str, ctx: &CallContext) -> Result<StorageClient, DfsError> {
        let result = self
            .dial_policy
            .run(ctx, |attempt| {
                if attempt > 1 {
                    info!(%address, attempt, "retrying connection to storage node");
                }
                StorageClient::dial(self.http.clone(), address)
            })
            .await;

        match result {
            Ok(client) => Ok(client),
            Err(failure) => match failure.error {
                DfsError::Cancelled | DfsError::DeadlineExceeded | DfsError::InvalidArgument(_) => {
                    Err(failure.error)
                }
                error => {
                    warn!(%address, attempts = failure.attempts, error = %error, "storage node unreachable");
                    Err(DfsError::ConnectionFailure {
                        address: address.to_string(),
                        attempts: failure.attempts,
                        last_error: error.to_string(),
                    })
                }
            },
        }
    }
}
