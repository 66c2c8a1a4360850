use review_sync::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub(crate) struct LoggingReporter;

impl LoggingReporter {
    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::PhaseStarted { phase } => {
                tracing::info!(phase = %phase, "Phase started");
            }

            SyncProgress::FetchedPage {
                resource,
                offset,
                count,
                total_so_far,
                reported_total,
            } => {
                tracing::debug!(
                    resource = %resource,
                    offset,
                    count,
                    total_so_far,
                    reported_total = ?reported_total,
                    "Fetched page"
                );
            }

            SyncProgress::FetchComplete { resource, total } => {
                tracing::info!(resource = %resource, total, "Fetch complete");
            }

            SyncProgress::FetchingDetails { count, concurrency } => {
                tracing::info!(count, concurrency, "Fetching review details");
            }

            SyncProgress::DetailFetched { review_id } => {
                tracing::debug!(review_id = %review_id, "Fetched review details");
            }

            SyncProgress::DetailError { review_id, error } => {
                tracing::warn!(review_id = %review_id, error = %error, "Skipping review");
            }

            SyncProgress::Persisted {
                entity,
                inserted,
                updated,
            } => {
                tracing::debug!(entity, inserted, updated, "Persisted batch");
            }

            SyncProgress::CacheWarmed { count } => {
                tracing::debug!(count, "Cache warmed");
            }

            SyncProgress::ChunkComplete {
                chunk,
                chunks,
                processed,
            } => {
                tracing::info!(chunk, chunks, processed, "Chunk complete");
            }

            SyncProgress::RetryBackoff {
                label,
                retry_after_ms,
                attempt,
                error,
            } => {
                tracing::warn!(
                    label = %label,
                    retry_after_ms,
                    attempt,
                    error = %error,
                    "Retrying after backoff"
                );
            }

            SyncProgress::CircuitOpen { dependency } => {
                tracing::warn!(dependency = %dependency, "Circuit open, call rejected");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            SyncProgress::Cancelled { phase } => {
                tracing::warn!(phase = %phase, "Sync cancelled");
            }

            SyncProgress::SyncComplete {
                duration_ms,
                items,
                errors,
            } => {
                tracing::info!(duration_ms, items, errors, "Sync complete");
            }

            _ => {}
        }
    }
}
