//! The purge loop: page oldest first, select by cutoff, delete in batches

use async_stream::stream;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::batch::BatchDeleter;
use super::cancel::CancellationFlag;
use super::report::{ProgressEvent, PurgeAction, PurgeEvent, PurgeReporter, PurgeSummary};
use crate::client::{MailboxGateway, PageRequest};
use crate::error::{OutlookError, Result};
use crate::models::MessageRef;

/// Parameters of one purge run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeConfig {
    pub folder_id: String,
    /// Messages received strictly before this instant are purged
    pub cutoff: DateTime<FixedOffset>,
    pub batch_size: usize,
    pub dry_run: bool,
    pub max_concurrency: usize,
    pub page_size: usize,
}

impl PurgeConfig {
    pub fn new(folder_id: impl Into<String>, cutoff: DateTime<FixedOffset>) -> Self {
        Self {
            folder_id: folder_id.into(),
            cutoff,
            batch_size: 50,
            dry_run: false,
            max_concurrency: 10,
            page_size: 100,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.folder_id.trim().is_empty() {
            return Err(OutlookError::ConfigError("Folder must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(OutlookError::ConfigError(
                "Batch size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(OutlookError::ConfigError(
                "Concurrency must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(OutlookError::ConfigError(
                "Page size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Running counters, owned by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeProgress {
    pub examined: u64,
    /// Deleted, or counted as deletable in a dry run
    pub deleted: u64,
    pub batches_completed: u64,
    pub total_discovered: u64,
}

impl PurgeProgress {
    fn snapshot(&self, batch_size: usize) -> ProgressEvent {
        ProgressEvent {
            examined: self.examined,
            deleted_so_far: self.deleted,
            total_discovered: self.total_discovered,
            batch_number: self.batches_completed,
            batch_size,
        }
    }
}

/// How the loop ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exhausted,
    Cancelled,
}

type PageStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<MessageRef>>> + Send + 'a>>;

/// Runs purges against a mailbox gateway
pub struct PurgeWorker {
    gateway: Arc<dyn MailboxGateway>,
}

impl PurgeWorker {
    pub fn new(gateway: Arc<dyn MailboxGateway>) -> Self {
        Self { gateway }
    }

    /// Run one purge to completion, cancellation, or failure
    ///
    /// Exactly one [`PurgeEvent::Summary`] is reported for every run that starts, including
    /// failed ones; the error is returned after it.
    pub async fn run(
        &self,
        config: &PurgeConfig,
        cancel: &CancellationFlag,
        reporter: &dyn PurgeReporter,
    ) -> Result<PurgeSummary> {
        config.validate()?;

        let run_id = Uuid::new_v4();
        let span = info_span!("purge", run_id = %run_id, folder = %config.folder_id);

        async move {
            info!(
                "Starting purge of '{}' before {} (batch size {}, dry run {})",
                config.folder_id, config.cutoff, config.batch_size, config.dry_run
            );

            let mut progress = PurgeProgress::default();
            let outcome = self.drive(config, cancel, reporter, &mut progress).await;

            let (cancelled, result) = match outcome {
                Ok(stop) => (stop == Stop::Cancelled, Ok(())),
                Err(e) => (false, Err(e)),
            };
            let summary = PurgeSummary {
                action: PurgeAction::for_dry_run(config.dry_run),
                total_affected: progress.deleted,
                folder_id: config.folder_id.clone(),
                cutoff: config.cutoff,
                cancelled,
                failure: result.as_ref().err().map(|e| e.to_string()),
            };
            reporter.report(PurgeEvent::Summary(summary.clone()));

            match result {
                Ok(()) => {
                    info!(
                        "Purge finished: {} affected in {} batches, {} examined, cancelled={}",
                        progress.deleted, progress.batches_completed, progress.examined, cancelled
                    );
                    Ok(summary)
                }
                Err(e) => {
                    warn!("Purge stopped after {} batches: {}", progress.batches_completed, e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Batch matching messages page by page; on cancellation a partially filled batch is dropped
    async fn drive(
        &self,
        config: &PurgeConfig,
        cancel: &CancellationFlag,
        reporter: &dyn PurgeReporter,
        progress: &mut PurgeProgress,
    ) -> Result<Stop> {
        let cutoff = config.cutoff.with_timezone(&Utc);
        let mut pages = self.pages(config, cutoff);
        let mut batch: Vec<MessageRef> = Vec::with_capacity(config.batch_size);

        while let Some(page) = pages.next().await {
            let page = page?;
            let mut reached_cutoff = false;

            for message in page {
                progress.examined += 1;
                if message.received >= cutoff {
                    reached_cutoff = true;
                    continue;
                }

                progress.total_discovered += 1;
                batch.push(message);
                if batch.len() >= config.batch_size {
                    if cancel.is_set() {
                        return Ok(Stop::Cancelled);
                    }
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(config.batch_size));
                    self.execute_batch(config, full, reporter, progress).await?;
                    if cancel.is_set() {
                        return Ok(Stop::Cancelled);
                    }
                }
            }

            // Oldest first: nothing after a message at or past the cutoff can qualify
            if reached_cutoff {
                debug!("Reached cutoff, no further pages needed");
                break;
            }
            if cancel.is_set() {
                return Ok(Stop::Cancelled);
            }
        }

        if !batch.is_empty() {
            if cancel.is_set() {
                return Ok(Stop::Cancelled);
            }
            self.execute_batch(config, batch, reporter, progress).await?;
        }

        Ok(Stop::Exhausted)
    }

    /// Page through the folder until the gateway runs out of pages
    fn pages<'a>(&'a self, config: &'a PurgeConfig, cutoff: DateTime<Utc>) -> PageStream<'a> {
        Box::pin(stream! {
            let mut request = PageRequest {
                received_before: Some(cutoff),
                page_size: config.page_size,
                page_token: None,
            };

            loop {
                match self.gateway.list_page(&config.folder_id, &request).await {
                    Ok(page) => {
                        debug!("Fetched page of {} messages", page.items.len());
                        let next = page.next_page_token;
                        yield Ok(page.items);
                        match next {
                            Some(token) => request.page_token = Some(token),
                            None => break,
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    async fn execute_batch(
        &self,
        config: &PurgeConfig,
        batch: Vec<MessageRef>,
        reporter: &dyn PurgeReporter,
        progress: &mut PurgeProgress,
    ) -> Result<()> {
        let action = PurgeAction::for_dry_run(config.dry_run);
        let batch_size = batch.len();

        for message in &batch {
            reporter.report(PurgeEvent::Candidate {
                action,
                message: message.clone(),
            });
        }

        let mut fatal = None;
        if config.dry_run {
            progress.deleted += batch_size as u64;
        } else {
            let outcome = BatchDeleter::new(self.gateway.as_ref(), config.max_concurrency)
                .delete_all(&batch)
                .await;
            progress.deleted += outcome.deleted();
            for (id, error) in outcome.failures() {
                reporter.report(PurgeEvent::DeleteFailed {
                    id: id.to_string(),
                    reason: error.to_string(),
                });
            }
            fatal = outcome.into_fatal_error();
        }

        progress.batches_completed += 1;
        debug!(
            "Batch {} done: {} messages, {} affected so far",
            progress.batches_completed, batch_size, progress.deleted
        );
        reporter.report(PurgeEvent::Progress(progress.snapshot(batch_size)));

        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cutoff() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .fixed_offset()
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = PurgeConfig::new("inbox", cutoff())
            .batch_size(5)
            .dry_run(true)
            .max_concurrency(2)
            .page_size(20);
        assert_eq!(config.batch_size, 5);
        assert!(config.dry_run);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.page_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(PurgeConfig::new("inbox", cutoff()).batch_size(0).validate().is_err());
        assert!(PurgeConfig::new("inbox", cutoff()).max_concurrency(0).validate().is_err());
        assert!(PurgeConfig::new("inbox", cutoff()).page_size(0).validate().is_err());
        assert!(PurgeConfig::new(" ", cutoff()).validate().is_err());
    }

    #[test]
    fn test_progress_snapshot() {
        let progress = PurgeProgress {
            examined: 7,
            deleted: 4,
            batches_completed: 2,
            total_discovered: 5,
        };
        let event = progress.snapshot(2);
        assert_eq!(event.batch_number, 2);
        assert_eq!(event.deleted_so_far, 4);
        assert_eq!(event.total_discovered, 5);
        assert_eq!(event.examined, 7);
    }
}
