use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::Settings;

#[derive(Parser, Debug)]
#[command(name = "billflow", version, about = "Post emailed vendor invoices to QuickBooks")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "BILLFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process unlabelled mail once
    Run {
        /// Messages fetched per run
        #[arg(long)]
        max_results: Option<usize>,
        /// Post receipts as purchases instead of skipping them
        #[arg(long)]
        post_receipts: bool,
    },
    /// List bills and purchases that look like duplicates of each other
    Audit,
    /// Show the expense account a category routes to
    Route { category: String },
    /// Report which required settings are present
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { max_results, post_receipts } => {
            if let Some(max) = max_results {
                settings.pipeline.max_results = max;
            }
            settings.pipeline.post_receipts |= post_receipts;
            commands::run(&settings).await
        }
        Command::Audit => commands::audit(&settings).await,
        Command::Route { category } => {
            commands::route(&settings, &category);
            Ok(())
        }
        Command::CheckConfig => commands::check_config(&settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli =
            Cli::try_parse_from(["billflow", "run", "--max-results", "25", "--post-receipts"])
                .unwrap();
        match cli.command {
            Command::Run { max_results, post_receipts } => {
                assert_eq!(max_results, Some(25));
                assert!(post_receipts);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let args = ["billflow", "route", "materials", "--config", "/etc/billflow.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/billflow.toml")));
        assert!(matches!(cli.command, Command::Route { category } if category == "materials"));
    }

    #[test]
    fn check_config_subcommand_is_kebab_case() {
        let cli = Cli::try_parse_from(["billflow", "check-config"]).unwrap();
        assert!(matches!(cli.command, Command::CheckConfig));
    }
}
