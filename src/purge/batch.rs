//! Concurrent deletion of one batch

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::client::MailboxGateway;
use crate::error::OutlookError;
use crate::models::MessageRef;

/// Result of one delete attempt
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted(String),
    Failed { id: String, error: OutlookError },
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted(_))
    }
}

/// Settled outcomes of a batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<DeleteOutcome>,
}

impl BatchOutcome {
    pub fn deleted(&self) -> u64 {
        self.outcomes.iter().filter(|o| o.is_deleted()).count() as u64
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &OutlookError)> {
        self.outcomes.iter().filter_map(|o| match o {
            DeleteOutcome::Failed { id, error } => Some((id.as_str(), error)),
            DeleteOutcome::Deleted(_) => None,
        })
    }

    /// First failure that makes any further mailbox call pointless
    pub fn into_fatal_error(self) -> Option<OutlookError> {
        self.outcomes.into_iter().find_map(|o| match o {
            DeleteOutcome::Failed { error, .. } if error.is_fatal() => Some(error),
            _ => None,
        })
    }
}

/// Issues the deletes of a batch with bounded concurrency
///
/// Every reference gets exactly one attempt. A failed delete never aborts the others;
/// the call returns once all of them have settled.
pub struct BatchDeleter<'a> {
    gateway: &'a dyn MailboxGateway,
    max_concurrency: usize,
}

impl<'a> BatchDeleter<'a> {
    pub fn new(gateway: &'a dyn MailboxGateway, max_concurrency: usize) -> Self {
        Self {
            gateway,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn delete_all(&self, batch: &[MessageRef]) -> BatchOutcome {
        let gateway = self.gateway;
        let outcomes: Vec<DeleteOutcome> = stream::iter(batch)
            .map(|message| async move {
                match gateway.delete_message(&message.id).await {
                    Ok(()) => {
                        debug!("Deleted {}", message.id);
                        DeleteOutcome::Deleted(message.id.clone())
                    }
                    Err(error) => {
                        warn!("Failed to delete {}: {}", message.id, error);
                        DeleteOutcome::Failed {
                            id: message.id.clone(),
                            error,
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        BatchOutcome { outcomes }
    }
}
