// Bulkline demo driver
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Synthetic data end to end so the pipeline can be
// exercised (including retries and quarantine) without any backing service.

mod fake;
mod hash_task;

use std::time::Duration;

use bulkline_core::prelude::*;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bulkline")]
#[command(about = "Augment a synthetic record stream in batches on a worker pool")]
#[command(version)]
struct Cli {
    /// Number of synthetic records to generate
    #[arg(long, default_value = "1000")]
    records: u64,

    /// Records per batch
    #[arg(long, default_value = "100")]
    chunk_size: usize,

    /// Maximum concurrent workers
    #[arg(long, short, default_value = "8")]
    workers: usize,

    /// Retry ceiling for recoverable failures (0 disables rework)
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Fixed delay before rerunning a retried batch, in milliseconds
    #[arg(long, default_value = "5000")]
    retry_delay_ms: u64,

    /// Probability that hashing a record fails recoverably (0.0 - 1.0)
    #[arg(long, default_value = "0.01")]
    error_rate: f64,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "bulkline=debug,bulkline_core=debug"
    } else {
        "bulkline=info,bulkline_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunConfig::new()
        .with_chunk_size(cli.chunk_size)
        .with_max_workers(cli.workers)
        .with_max_retries((cli.max_retries > 0).then_some(cli.max_retries))
        .with_retry_delay(Duration::from_millis(cli.retry_delay_ms));

    let progress = Progress::new();
    progress.add_listener(|p| {
        tracing::debug!(percent = format!("{:.1}", p.percentage()), "progress");
    });

    let source = fake::FakeSource::new(cli.records);
    let error_rate = cli.error_rate;

    let report = Orchestrator::new(
        source,
        move || hash_task::HashColumnExecutor::new(error_rate),
        config,
    )
    .with_irreparable_predicate(|failure| failure.message.contains("[irreparable]"))
    .with_progress(progress)
    .run()
    .await?;

    print_report(&report);

    if report.error_count() > 0 {
        anyhow::bail!("{} record(s) failed to augment", report.error_count());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("=============== Augmentation report ===============");
    if !report.irreparable.is_empty() {
        println!(
            "{} record(s) had irreparable failures:",
            report.irreparable.len()
        );
        for failed in &report.irreparable {
            println!("  {}: {}", failed.record.describe(), failed.message);
        }
    }
    if !report.exhausted.is_empty() {
        println!(
            "{} record(s) failed every configured retry:",
            report.exhausted.len()
        );
        for failed in &report.exhausted {
            println!("  {}: {}", failed.record.describe(), failed.message);
        }
    }
    println!(
        "Tried {} record(s), augmented {}, {} error(s), took {}ms",
        report.total_records,
        report.augmented,
        report.error_count(),
        (report.finished_at - report.started_at).num_milliseconds()
    );
}
