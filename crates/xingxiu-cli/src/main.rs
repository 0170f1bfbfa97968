use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xingxiu_sync::{resolve_target_date, SyncConfig, SyncPipeline};

#[derive(Debug, Parser)]
#[command(name = "xingxiu-sync")]
#[command(about = "Pull one day of equipment telemetry from the AI-export API into MySQL")]
struct Cli {
    /// Target date (YYYY-MM-DD); defaults to yesterday in Asia/Jakarta
    date: Option<String>,
    /// Inclusive end date; with DATE, syncs the whole range day by day
    end_date: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::new(config)?;

    let summaries = if let (Some(start), Some(end)) = (&cli.date, &cli.end_date) {
        pipeline.run_range(start, end).await?
    } else {
        let target = resolve_target_date(cli.date.as_deref(), Utc::now());
        vec![pipeline.run_for_date(&target).await?]
    };

    for summary in &summaries {
        println!(
            "sync complete: date={} fetched={} skipped={} written={}",
            summary.date, summary.fetched, summary.skipped, summary.written
        );
    }

    Ok(())
}
