use anyhow::Result;
use clap::Parser;
use multiquery::app::{self, RunOutcome};
use multiquery::config::CliArgs;
use multiquery::services::ssh::{PassphraseCache, TerminalPrompt};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logs go to stderr so stdout carries only result rows.
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(&args.log_level);

    let passphrases = PassphraseCache::new(TerminalPrompt);
    match app::run(&args, &passphrases).await? {
        RunOutcome::Listed(targets) => {
            tracing::info!("Listed {} databases", targets.len());
        }
        RunOutcome::Dispatched(report) => {
            if !report.scan_failures.is_empty() {
                tracing::warn!(
                    "Rows cut short on {} database(s): {}",
                    report.scan_failures.len(),
                    report.scan_failures.join(", ")
                );
            }
            tracing::info!(
                "Done: {} rows from {} databases",
                report.rows,
                report.completed.len()
            );
        }
    }

    Ok(())
}
