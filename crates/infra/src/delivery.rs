//! Out-of-band handoff of generated credentials.
//!
//! The workflow never stores or returns plaintext. On accept the secret is
//! staged with the delivery channel; on send the channel is told to release
//! it to the account holder. Both calls happen after the state change is
//! committed, and their failures never undo it.
//!
//! Before send applies the held hash to the live account, the workflow asks
//! the channel whether the plaintext is still staged. A channel that lost it
//! (restart, another replica) makes the send fail instead of locking the
//! account holder out.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use rolegate_auth::{Email, Secret};
use rolegate_core::ResetRequestId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),

    #[error("no staged credential for reset request {0}")]
    NotStaged(ResetRequestId),
}

#[async_trait::async_trait]
pub trait CredentialDelivery: Send + Sync {
    async fn stage(
        &self,
        request_id: ResetRequestId,
        recipient: &Email,
        secret: Secret,
    ) -> Result<(), DeliveryError>;

    async fn release(&self, request_id: ResetRequestId) -> Result<(), DeliveryError>;

    /// Whether a credential for `request_id` is staged and can be released.
    async fn is_staged(&self, request_id: ResetRequestId) -> Result<bool, DeliveryError>;
}

#[async_trait::async_trait]
impl<T> CredentialDelivery for std::sync::Arc<T>
where
    T: CredentialDelivery + ?Sized,
{
    async fn stage(
        &self,
        request_id: ResetRequestId,
        recipient: &Email,
        secret: Secret,
    ) -> Result<(), DeliveryError> {
        (**self).stage(request_id, recipient, secret).await
    }

    async fn release(&self, request_id: ResetRequestId) -> Result<(), DeliveryError> {
        (**self).release(request_id).await
    }

    async fn is_staged(&self, request_id: ResetRequestId) -> Result<bool, DeliveryError> {
        (**self).is_staged(request_id).await
    }
}

/// Result of an operation whose side notifications may have failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<T> {
    pub value: T,
    pub warnings: Vec<DeliveryError>,
}

impl<T> Completed<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(value: T, warning: Option<DeliveryError>) -> Self {
        Self {
            value,
            warnings: warning.into_iter().collect(),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// A credential handed over to its recipient.
#[derive(Debug, Clone)]
pub struct ReleasedCredential {
    pub request_id: ResetRequestId,
    pub recipient: Email,
    pub secret: Secret,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Outbox {
    staged: HashMap<ResetRequestId, (Email, Secret)>,
    released: VecDeque<ReleasedCredential>,
}

/// In-memory outbox for tests and single-process development.
///
/// Staged credentials live only as long as the process, so it must not back
/// a deployment where accept and send can run in different processes. The
/// most recent releases stay readable through [`InMemoryDelivery::released_to`];
/// older ones are dropped.
#[derive(Debug)]
pub struct InMemoryDelivery {
    outbox: RwLock<Outbox>,
    retained: usize,
}

impl Default for InMemoryDelivery {
    fn default() -> Self {
        Self::with_retention(Self::DEFAULT_RETAINED)
    }
}

impl InMemoryDelivery {
    pub const DEFAULT_RETAINED: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` released credentials.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            outbox: RwLock::new(Outbox::default()),
            retained,
        }
    }

    pub fn staged_count(&self) -> usize {
        self.outbox.read().map(|o| o.staged.len()).unwrap_or(0)
    }

    /// Credentials released to `recipient`, oldest first.
    pub fn released_to(&self, recipient: &Email) -> Vec<ReleasedCredential> {
        self.outbox
            .read()
            .map(|o| {
                o.released
                    .iter()
                    .filter(|c| &c.recipient == recipient)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CredentialDelivery for InMemoryDelivery {
    async fn stage(
        &self,
        request_id: ResetRequestId,
        recipient: &Email,
        secret: Secret,
    ) -> Result<(), DeliveryError> {
        let mut outbox = self
            .outbox
            .write()
            .map_err(|_| DeliveryError::Unavailable("lock poisoned".to_string()))?;
        outbox.staged.insert(request_id, (recipient.clone(), secret));
        Ok(())
    }

    async fn release(&self, request_id: ResetRequestId) -> Result<(), DeliveryError> {
        let mut outbox = self
            .outbox
            .write()
            .map_err(|_| DeliveryError::Unavailable("lock poisoned".to_string()))?;
        let (recipient, secret) = outbox
            .staged
            .remove(&request_id)
            .ok_or(DeliveryError::NotStaged(request_id))?;
        outbox.released.push_back(ReleasedCredential {
            request_id,
            recipient,
            secret,
            released_at: Utc::now(),
        });
        while outbox.released.len() > self.retained {
            outbox.released.pop_front();
        }
        Ok(())
    }

    async fn is_staged(&self, request_id: ResetRequestId) -> Result<bool, DeliveryError> {
        let outbox = self
            .outbox
            .read()
            .map_err(|_| DeliveryError::Unavailable("lock poisoned".to_string()))?;
        Ok(outbox.staged.contains_key(&request_id))
    }
}
