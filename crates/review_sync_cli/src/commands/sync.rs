//! The `sync` command: pull one project's workflows and reviews into the store.

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use console::style;
use tabled::{Table, Tabled, settings::Style};
use uuid::Uuid;

use review_sync::http::reqwest_transport::ReqwestTransport;
use review_sync::source::{HttpSource, RateLimitedSource, StaticTokenProvider};
use review_sync::sync::{EntityCounts, SyncReport};
use review_sync::{Preset, SyncConfig, SyncOrchestrator, SyncScope, db};

use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown;

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display the full report as JSON
    Json,
}

/// Options for one sync run.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct SyncArgs {
    /// Project to sync (default from config)
    #[arg(short, long)]
    project: Option<String>,

    /// Drop and recreate the schema before syncing
    #[arg(long)]
    full: bool,

    /// Configuration preset (development, production, testing)
    #[arg(long)]
    preset: Option<Preset>,

    /// Reviews whose details are fetched concurrently
    #[arg(short = 'c', long)]
    max_concurrent: Option<usize>,

    /// Reviews written per chunk
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Disable the workflow cache
    #[arg(long)]
    no_cache: bool,

    /// Disable proactive rate limiting (may cause API throttling)
    #[arg(short = 'R', long)]
    no_rate_limit: bool,

    /// Filter passed to the reviews list, as key=value (repeatable)
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

impl SyncArgs {
    fn sync_config(&self, config: &Config) -> Result<SyncConfig, String> {
        let mut sync = config.sync_config(self.preset)?;
        if let Some(n) = self.max_concurrent {
            sync.max_concurrent = n;
        }
        if let Some(n) = self.batch_size {
            sync.batch_size = n;
        }
        if self.no_cache {
            sync.enable_cache = false;
        }
        Ok(sync)
    }

    fn scope(&self, config: &Config) -> Result<SyncScope, String> {
        let project = self
            .project
            .clone()
            .or_else(|| config.api.project_id.clone())
            .ok_or("No project given. Pass --project or set REVIEW_SYNC_PROJECT_ID.")?;

        let mut scope = SyncScope::project(project);
        if self.full {
            scope = scope.full();
        }
        for (key, value) in &self.filters {
            scope = scope.with_filter(key, value);
        }
        Ok(scope)
    }
}

/// Handle the sync command.
pub(crate) async fn handle_sync(
    args: SyncArgs,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let sync_config = args.sync_config(config)?;
    let scope = args.scope(config)?;

    let base_url = config
        .api
        .base_url
        .as_deref()
        .ok_or("No API base URL configured. Set REVIEW_SYNC_BASE_URL or [api] base_url.")?;
    let token = config.api.token.clone().unwrap_or_default();
    let tokens = Arc::new(StaticTokenProvider::new(token));

    let transport = ReqwestTransport::with_timeout(Duration::from_secs(
        sync_config.call_timeout_secs.saturating_mul(2).max(1),
    ))?;
    let source = HttpSource::new(
        Arc::new(transport),
        base_url,
        scope.project_id.clone(),
        tokens.clone(),
    )?;
    let source: Arc<dyn review_sync::PagedSource> = if args.no_rate_limit {
        Arc::new(source)
    } else {
        Arc::new(RateLimitedSource::new(
            source,
            config.api.requests_per_second,
        ))
    };

    let db = db::connect(database_url).await?;
    let orchestrator = Arc::new(SyncOrchestrator::new(source, tokens, db, sync_config));

    let task_id = Uuid::new_v4().to_string();
    {
        let orchestrator = Arc::clone(&orchestrator);
        let task_id = task_id.clone();
        shutdown::setup_shutdown_handler(move || {
            orchestrator.cancel(&task_id);
        });
    }

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();

    tracing::info!(
        project = %scope.project_id,
        full_resync = scope.full_resync,
        task_id = %task_id,
        "Starting sync"
    );
    let report = orchestrator.run(&scope, &task_id, Some(&callback)).await;
    reporter.finish();

    match args.output {
        OutputFormat::Table => print_summary(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if report.is_success() {
        Ok(())
    } else if shutdown::is_shutdown_requested() {
        Err("Sync cancelled".into())
    } else {
        Err(report
            .error
            .unwrap_or_else(|| format!("Sync {}", report.outcome))
            .into())
    }
}

#[derive(Tabled)]
struct CountsRow {
    #[tabled(rename = "Entity")]
    entity: &'static str,
    #[tabled(rename = "Seen")]
    total: usize,
    #[tabled(rename = "Inserted")]
    inserted: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
}

impl CountsRow {
    fn new(entity: &'static str, counts: &EntityCounts) -> Self {
        Self {
            entity,
            total: counts.total,
            inserted: counts.inserted,
            updated: counts.updated,
            skipped: counts.skipped,
        }
    }
}

fn print_summary(report: &SyncReport) {
    let stats = &report.stats;
    let rows = vec![
        CountsRow::new("workflows", &stats.workflows),
        CountsRow::new("reviews", &stats.reviews),
        CountsRow::new("file versions", &stats.file_versions),
        CountsRow::new("progress steps", &stats.progress_steps),
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    let outcome = if report.is_success() {
        style(report.outcome.to_string()).green().bold()
    } else {
        style(report.outcome.to_string()).red().bold()
    };
    println!(
        "\n{} in {:.1}s ({:.1} items/s, API success {:.1}%)",
        outcome,
        report.duration.as_secs_f64(),
        report.performance.items_per_second,
        report.performance.api_success_rate * 100.0,
    );
    if let Some(cache) = &report.cache {
        println!(
            "Cache: {} hits, {} misses ({:.1}% hit rate)",
            cache.hits,
            cache.misses,
            cache.hit_rate() * 100.0
        );
    }

    if report.source_empty {
        println!("{}", style("The source reported no reviews.").yellow());
    }
    if stats.dangling_workflow_refs > 0 || stats.orphan_step_refs > 0 {
        println!(
            "{} {} dangling workflow refs, {} orphan step refs",
            style("⚠").yellow(),
            stats.dangling_workflow_refs,
            stats.orphan_step_refs
        );
    }
    if stats.circuit_open_rejections > 0 {
        println!(
            "{} {} calls rejected by an open circuit",
            style("⚠").yellow(),
            stats.circuit_open_rejections
        );
    }
    for breaker in &report.circuit_breakers {
        tracing::debug!(
            dependency = %breaker.dependency,
            state = %breaker.state,
            consecutive_failures = breaker.consecutive_failures,
            "Circuit breaker"
        );
    }

    for bottleneck in &report.bottlenecks {
        println!(
            "{} {} ({})",
            style("Bottleneck:").yellow().bold(),
            bottleneck.message,
            bottleneck.suggestion
        );
    }

    if report.errors_total > 0 {
        println!(
            "\n{} ({} total, first {} shown):",
            style("Errors").red().bold(),
            report.errors_total,
            stats.errors.len()
        );
        for error in &stats.errors {
            println!("  {}", error);
        }
    }
    if let Some(error) = &report.error {
        println!("\n{} {}", style("Error:").red().bold(), error);
    }
}
