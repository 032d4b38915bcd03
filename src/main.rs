//! HuntWatch - rule-driven polling of external intelligence sources.
//!
//! Runs a saved rule against its source, diffs the result against the
//! rule's recorded history, and prints the alert when anything new turned
//! up. "Nothing new" is a successful, quiet outcome.

use anyhow::{Context, Result};
use clap::Parser;
use huntwatch::{
    app::App,
    cli::{Cli, Command},
    config::Config,
    rule::Rule,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment,
    // and CLI args.
    let config = Config::load(&cli.config.display().to_string(), cli.clone())
        .context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("HuntWatch starting up");
    info!(database = %config.database.path.display(), "configuration loaded");

    let app = App::new(config)?;

    match &cli.command {
        Command::Run { rule } => {
            let raw = std::fs::read_to_string(rule)
                .with_context(|| format!("failed to read rule file {}", rule.display()))?;
            let rule: Rule = serde_json::from_str(&raw)
                .with_context(|| "rule file is not a well-formed rule document")?;

            match app.run_rule(&rule).await {
                Ok(Some(alert)) => {
                    println!("{}", serde_json::to_string_pretty(&alert)?);
                }
                Ok(None) => {
                    info!("there is no new alert created in the database");
                }
                Err(e) => {
                    error!(error = %e, "rule run failed");
                    return Err(e);
                }
            }
        }
        Command::Alerts { rule_id } => {
            for alert_id in app.database().list_alerts(rule_id)? {
                let alert = app.database().get_alert(alert_id)?;
                println!("{}", serde_json::to_string_pretty(&alert)?);
            }
        }
        Command::DeleteRule { rule_id } => {
            app.database().delete_rule(rule_id)?;
            info!(%rule_id, "rule deleted");
        }
    }

    Ok(())
}
