use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use nightly_summary::config::Config;
use nightly_summary::notify::slack::SlackClient;
use nightly_summary::tracking::wandb::WandbClient;

#[derive(Parser)]
#[command(
    name = "nightly-summary",
    about = "Summarizes the latest nightly training runs",
    version,
    long_about = None
)]
struct Cli {
    /// Post the summary to Slack instead of printing it
    #[arg(long)]
    slack: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    if cli.slack {
        tracing::info!(entity = %config.entity, channel = %config.slack.channel, "posting nightly summary");
        let backend = Arc::new(WandbClient::new(&config.wandb)?);
        let slack = SlackClient::new(&config.slack.api_url)?;
        nightly_summary::deliver_summary(&config, backend, &slack).await?;
    } else {
        tracing::info!(entity = %config.entity, "printing nightly summary");
        let backend = Arc::new(WandbClient::new(&config.wandb)?);
        let text = nightly_summary::summarize(&config, backend).await?;
        println!("\n{}", text);
    }

    Ok(())
}
