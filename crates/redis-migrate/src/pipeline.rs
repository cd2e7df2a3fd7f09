//! Migration orchestration.

use futures::future;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MigrationMode, MigrationRequest, UnsupportedTypePolicy};
use crate::error::{Error, Result};
use crate::scanner::{enumerate, KeyspaceScanner};
use crate::store::{open_store, KeyValueStore};
use crate::transfer::{TransferEngine, TransferOutcome};

/// Migration statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationResult {
    /// Keys returned by enumeration, duplicates included.
    pub scanned: u64,
    /// Keys whose value reached the destination.
    pub transferred: u64,
    /// Keys left untouched.
    pub skipped: u64,
    /// Keys skipped because of their type.
    pub unsupported: u64,
    /// Source keys deleted after transfer.
    pub source_deleted: u64,
    /// Hash fields written.
    pub hash_fields_written: u64,
    /// Pages processed.
    pub pages: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationResult {
    /// Calculate throughput (keys per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.transferred as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    fn record(&mut self, outcome: &TransferOutcome) {
        if outcome.moved() {
            self.transferred += 1;
        } else {
            self.skipped += 1;
        }
        if outcome.source_deleted {
            self.source_deleted += 1;
        }
        self.hash_fields_written += outcome.fields_written.unwrap_or(0);
    }
}

/// Runs a copy or move between two connected stores.
///
/// Both stores are closed when the run finishes, whether it succeeded,
/// failed or was cancelled.
pub struct Migrator {
    request: MigrationRequest,
    source: Box<dyn KeyValueStore>,
    destination: Box<dyn KeyValueStore>,
    cancel: CancellationToken,
}

impl Migrator {
    /// Validates the request and connects to both endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or either store is
    /// unreachable.
    pub async fn connect(request: MigrationRequest) -> Result<Self> {
        request.validate()?;
        let timeout = request.options.command_timeout();
        let (source, destination) = tokio::try_join!(
            open_store(&request.source, timeout),
            open_store(&request.destination, timeout)
        )?;
        Ok(Self {
            request,
            source,
            destination,
            cancel: CancellationToken::new(),
        })
    }

    /// Builds a migrator over stores that are already connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid.
    pub fn with_stores(
        request: MigrationRequest,
        source: Box<dyn KeyValueStore>,
        destination: Box<dyn KeyValueStore>,
    ) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            request,
            source,
            destination,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that aborts the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Moves matching keys: pages through the source with `SCAN` and
    /// deletes each source key once it was written.
    ///
    /// # Errors
    ///
    /// Returns the first error of any key; keys already processed stay
    /// migrated.
    pub async fn run_move(self) -> Result<MigrationResult> {
        self.run(MigrationMode::Move).await
    }

    /// Copies matching keys, enumerated once with `KEYS`.
    ///
    /// # Errors
    ///
    /// Returns the first error of any key.
    pub async fn run_copy(self) -> Result<MigrationResult> {
        self.run(MigrationMode::Copy).await
    }

    /// Runs in the given mode and closes both stores.
    ///
    /// # Errors
    ///
    /// Returns the first error of the run, or a close error if the run
    /// itself succeeded.
    pub async fn run(mut self, mode: MigrationMode) -> Result<MigrationResult> {
        info!(
            "Starting {} from {} ({}) to {} ({}) with pattern '{}'",
            mode,
            self.request.source,
            self.source.backend(),
            self.request.destination,
            self.destination.backend(),
            self.request.pattern
        );

        let outcome = self.execute(mode).await;

        let closed_source = self.source.close().await;
        let closed_destination = self.destination.close().await;

        let result = outcome?;
        closed_source?;
        closed_destination?;
        Ok(result)
    }

    async fn execute(&self, mode: MigrationMode) -> Result<MigrationResult> {
        let start = Instant::now();
        let mut result = MigrationResult::default();
        let engine = TransferEngine::new(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.request,
            mode == MigrationMode::Move,
            self.cancel.clone(),
        );
        let progress = create_progress_bar(self.request.options.progress);

        match mode {
            MigrationMode::Move => {
                let mut scanner = KeyspaceScanner::new(
                    self.source.as_ref(),
                    &self.request.pattern,
                    self.request.page_size,
                );
                while let Some(page) = self.guarded(scanner.next_page()).await? {
                    if page.keys.is_empty() {
                        debug!("Empty page, cursor {}", page.cursor);
                        continue;
                    }
                    info!("Trying to move {} keys", page.keys.len());
                    self.process_page(&engine, page.keys, &mut result, &progress)
                        .await?;
                }
            }
            MigrationMode::Copy => {
                let keys = self
                    .guarded(enumerate(self.source.as_ref(), &self.request.pattern))
                    .await?;
                info!("Found {} keys matching '{}'", keys.len(), self.request.pattern);
                progress.set_length(keys.len() as u64);
                for chunk in keys.chunks(self.request.page_size) {
                    self.process_page(&engine, chunk.to_vec(), &mut result, &progress)
                        .await?;
                }
            }
        }

        progress.finish_and_clear();
        result.duration_secs = start.elapsed().as_secs_f64();

        info!(
            "{} complete: {} of {} keys transferred, {} skipped, {} unsupported in {:.2}s ({:.0} keys/sec)",
            mode,
            result.transferred,
            result.scanned,
            result.skipped,
            result.unsupported,
            result.duration_secs,
            result.throughput()
        );

        Ok(result)
    }

    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Transfers one page of keys with bounded concurrency. After the first
    /// fatal error no new key is started, but transfers already in flight
    /// run to completion before the error is returned.
    async fn process_page(
        &self,
        engine: &TransferEngine<'_>,
        keys: Vec<String>,
        result: &mut MigrationResult,
        progress: &ProgressBar,
    ) -> Result<()> {
        result.pages += 1;
        result.scanned += keys.len() as u64;

        let stopped = AtomicBool::new(false);
        let mut transfers = stream::iter(keys)
            .take_while(|_| future::ready(!stopped.load(Ordering::Acquire)))
            .map(|key| async move {
                let outcome = engine.transfer(&key).await;
                (key, outcome)
            })
            .buffer_unordered(self.request.options.concurrency);

        let mut failure = None;
        while let Some((key, outcome)) = transfers.next().await {
            match outcome {
                Ok(outcome) => result.record(&outcome),
                Err(err)
                    if !err.is_fatal()
                        && self.request.options.unsupported_type
                            == UnsupportedTypePolicy::Skip =>
                {
                    warn!("Skipping key {}: {}", key, err);
                    result.unsupported += 1;
                }
                Err(err) if failure.is_none() => {
                    stopped.store(true, Ordering::Release);
                    failure = Some(err);
                }
                Err(err) => warn!("Key {} also failed: {}", key, err),
            }
            progress.inc(1);
        }

        match failure {
            Some(err) => {
                progress.abandon();
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn create_progress_bar(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} keys ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(action: crate::transfer::TransferAction, deleted: bool) -> TransferOutcome {
        TransferOutcome {
            key: "k".to_string(),
            action,
            fields_written: None,
            source_deleted: deleted,
        }
    }

    #[test]
    fn test_migration_result_throughput() {
        let result = MigrationResult {
            transferred: 1000,
            duration_secs: 2.0,
            ..Default::default()
        };
        assert!((result.throughput() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_migration_result_zero_duration() {
        let result = MigrationResult {
            transferred: 1000,
            ..Default::default()
        };
        assert!(result.throughput().abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_outcomes() {
        use crate::transfer::{SkipReason, TransferAction};

        let mut result = MigrationResult::default();
        result.record(&outcome(TransferAction::Written, true));
        result.record(&outcome(
            TransferAction::Skipped(SkipReason::ExistsAtDestination),
            false,
        ));
        let mut hash = outcome(TransferAction::Written, false);
        hash.fields_written = Some(3);
        result.record(&hash);

        assert_eq!(result.transferred, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.source_deleted, 1);
        assert_eq!(result.hash_fields_written, 3);
    }

    #[test]
    fn test_hidden_progress_bar() {
        let pb = create_progress_bar(false);
        pb.inc(5);
        assert!(pb.is_hidden());
    }
}
