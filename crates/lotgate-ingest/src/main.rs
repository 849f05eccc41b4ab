//! Lotgate Ingest - lot verification and delivery tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lotgate_common::logging::{init_logging, LogLevel};
use lotgate_ingest::config::IngestConfig;
use lotgate_ingest::index::DocumentIndexExtractor;
use lotgate_ingest::run::{verify_staging, IngestRun};
use lotgate_ingest::staging::StagingSnapshot;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lotgate-ingest")]
#[command(author, version, about = "Verify, reassemble and deliver document lots")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every lot in the staging directory
    Run {
        /// YAML configuration file
        #[arg(short, long, env = "LOTGATE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Classify and verify staged lots without processing them
    Verify {
        /// YAML configuration file
        #[arg(short, long, env = "LOTGATE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the document records of an XML index as JSON
    Extract {
        /// Path to the XML index
        #[arg(short, long)]
        index: PathBuf,

        /// Date-scoped lot token, e.g. 2024_03_07_0042
        #[arg(short, long)]
        lot_token: String,

        /// Prefix of every file_relative_url
        #[arg(short, long, default_value = "documents")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Command::Run { config } | Command::Verify { config } => config.clone(),
        Command::Extract { .. } => None,
    };
    let config = IngestConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { .. } => {
            config.validate_delivery()?;
            info!(staging = %config.staging.staging_dir.display(), "Starting ingest run");
            let report = IngestRun::new(config)?.execute().await?;
            for lot in &report.lots {
                println!("{}\t{}", lot.id, lot.state);
            }
            info!(
                delivered = report.delivered,
                rejected = report.rejected,
                errored = report.errored,
                "Ingest run complete"
            );
        },
        Command::Verify { .. } => {
            let snapshot = StagingSnapshot::read(&config.staging.staging_dir)?;
            let verified = verify_staging(&config.staging, &snapshot);
            for lot in &verified.lots {
                println!("{}\t{}", lot.id, lot.state);
            }
            for file in &verified.unclassified {
                println!("-\tunclassified: {}", file);
            }
            if !snapshot.is_empty() && verified.valid_count() == 0 {
                anyhow::bail!("No lot passed verification");
            }
        },
        Command::Extract {
            index,
            lot_token,
            prefix,
        } => {
            let records = DocumentIndexExtractor::new(prefix).extract_file(&index, &lot_token)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        },
    }

    Ok(())
}
