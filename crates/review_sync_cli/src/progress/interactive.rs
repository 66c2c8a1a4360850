use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use review_sync::ResourceKind;
use review_sync::sync::{SyncPhase, SyncProgress};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// All mutable bar state, kept under one lock.
#[derive(Default)]
struct ProgressState {
    /// Paging bars keyed by resource name.
    fetch_bars: HashMap<String, ProgressBar>,
    /// Per-review detail fan-out.
    detail_bar: Option<ProgressBar>,
    /// Written chunks.
    save_bar: Option<ProgressBar>,
    detail_errors: usize,
}

/// Interactive progress reporter using indicatif.
///
/// - Fetch bars: one per list resource (workflows, reviews)
/// - Detail bar: versions/progress/workflow fetches for every review
/// - Save bar: review chunks written to the store
pub(crate) struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state();

        match event {
            SyncProgress::PhaseStarted { phase } => {
                if phase == SyncPhase::SchemaReset {
                    self.multi.println("Dropping and recreating schema...").ok();
                }
            }

            SyncProgress::FetchedPage {
                resource,
                total_so_far,
                reported_total,
                ..
            } => {
                let bar = state
                    .fetch_bars
                    .entry(resource.clone())
                    .or_insert_with(|| self.fetch_bar(&resource, reported_total));
                if let Some(total) = reported_total {
                    bar.set_length(total.max(total_so_far) as u64);
                }
                bar.set_position(total_so_far as u64);
                bar.set_message(format!("{} {}", total_so_far, resource));
            }

            SyncProgress::FetchComplete { resource, total } => {
                if let Some(bar) = state.fetch_bars.get(&resource) {
                    bar.set_length(total as u64);
                    bar.finish_with_message(format!("Fetched {} {}", total, resource));
                }
                if resource == ResourceKind::Reviews.as_str() && total > 0 {
                    let detail = self.multi.add(ProgressBar::new(total as u64));
                    detail.set_style(Self::bar_style());
                    detail.set_prefix(format!("{:12}", "details"));
                    state.detail_bar = Some(detail);
                }
            }

            SyncProgress::FetchingDetails { count, concurrency } => {
                if let Some(bar) = &state.detail_bar {
                    bar.set_message(format!("{} reviews, {} at a time", count, concurrency));
                }
            }

            SyncProgress::DetailFetched { .. } => {
                if let Some(bar) = &state.detail_bar {
                    bar.inc(1);
                }
            }

            SyncProgress::DetailError { review_id, error } => {
                state.detail_errors += 1;
                if let Some(bar) = &state.detail_bar {
                    bar.inc(1);
                    bar.set_message(format!("{} failed", state.detail_errors));
                }
                self.multi
                    .println(format!("  ✗ {}: {}", review_id, error))
                    .ok();
            }

            SyncProgress::ChunkComplete {
                chunk,
                chunks,
                processed,
            } => {
                let bar = state.save_bar.get_or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new(chunks as u64));
                    bar.set_style(Self::bar_style());
                    bar.set_prefix(format!("{:12}", "saving"));
                    bar
                });
                bar.set_position(chunk as u64);
                bar.set_message(format!("{} reviews written", processed));
                if chunk >= chunks {
                    bar.finish();
                }
            }

            SyncProgress::RetryBackoff {
                label,
                retry_after_ms,
                attempt,
                ..
            } => {
                if let Some(bar) = &state.detail_bar {
                    bar.set_message(format!(
                        "retrying {} (attempt {}) in {}ms",
                        label, attempt, retry_after_ms
                    ));
                }
            }

            SyncProgress::CircuitOpen { dependency } => {
                self.multi
                    .println(format!("  ⚠ circuit open for {}", dependency))
                    .ok();
            }

            SyncProgress::Warning { message } => {
                self.multi.println(format!("  ⚠ {}", message)).ok();
            }

            SyncProgress::Cancelled { phase } => {
                self.multi
                    .println(format!("Cancelled during {}", phase))
                    .ok();
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub fn finish(&self) {
        let state = self.state();
        for bar in state.fetch_bars.values() {
            if !bar.is_finished() {
                bar.finish();
            }
        }
        if let Some(ref pb) = state.detail_bar
            && !pb.is_finished()
        {
            pb.finish();
        }
        if let Some(ref pb) = state.save_bar
            && !pb.is_finished()
        {
            pb.finish();
        }
    }

    fn fetch_bar(&self, resource: &str, reported_total: Option<usize>) -> ProgressBar {
        let bar = match reported_total {
            Some(total) => {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                bar.set_style(Self::bar_style());
                bar
            }
            None => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_prefix(format!("{:12}", resource));
        bar
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS)
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>4}/{len:4} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
