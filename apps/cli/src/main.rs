//! pharmaquery - compile and run pharma data provider queries
//!
//! ```text
//! pharmaquery sources
//! pharmaquery compile fda-adverse-events --params '{"country": "US", "serious_only": true}'
//! pharmaquery query clinicaltrials --params '{"condition": "asthma", "page_size": 5}'
//! ```

mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pharmaquery_adapters::Source;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "pharmaquery", version)]
#[command(about = "Query openFDA, ClinicalTrials.gov, PatentsView, ChEMBL and NCBI Entrez")]
struct Cli {
    /// Settings file (defaults to ./pharmaquery.toml when present)
    #[arg(short, long, global = true, env = "PHARMAQUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging for the pharmaquery crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON on a single line
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available sources
    Sources,
    /// Compile parameters into a provider request without sending it
    Compile(SourceArgs),
    /// Run a query and print the projected result with its metadata
    Query(SourceArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Source name, see `pharmaquery sources`
    source: String,

    /// Parameters as a JSON object
    #[arg(short, long, default_value = "{}", conflicts_with = "params_file")]
    params: String,

    /// Read parameters from a JSON file
    #[arg(long)]
    params_file: Option<PathBuf>,
}

impl SourceArgs {
    fn params(&self) -> anyhow::Result<Value> {
        let text = match &self.params_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => self.params.clone(),
        };
        let params: Value = serde_json::from_str(&text).context("Parameters are not valid JSON")?;
        if !params.is_object() {
            anyhow::bail!("Parameters must be a JSON object");
        }
        Ok(params)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard = logging::init_logging(&settings.logging, cli.verbose)
        .context("Failed to initialize logging")?;

    match &cli.command {
        Command::Sources => {
            for name in Source::NAMES {
                println!("{name}");
            }
        }
        Command::Compile(args) => {
            let source = Source::from_name(&args.source, &settings.providers)?;
            let plan = source.plan(args.params()?)?;
            print_json(
                &json!({
                    "provider": plan.request.provider,
                    "method": plan.request.method,
                    "url": plan.url(),
                    "params": plan.request.params,
                    "mode": plan.request.mode,
                    "projection": plan.request.projection,
                    "expression": plan.request.expression,
                    "query": plan.query,
                }),
                cli.compact,
            )?;
        }
        Command::Query(args) => {
            let source = Source::from_name(&args.source, &settings.providers)?;
            let params = args.params()?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling request");
                    on_interrupt.cancel();
                }
            });

            let response = source
                .search(params, Some(&cancel))
                .await
                .with_context(|| format!("{} query failed", args.source))?;
            print_json(&response, cli.compact)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> anyhow::Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "pharmaquery",
            "query",
            "chembl",
            "--params",
            r#"{"chembl_id": "CHEMBL25"}"#,
            "--compact",
        ])
        .unwrap();
        assert!(cli.compact);
        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.source, "chembl");
                assert_eq!(args.params().unwrap()["chembl_id"], "CHEMBL25");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_params_must_be_object() {
        let args = SourceArgs {
            source: "fda-ndc".into(),
            params: "[1, 2]".into(),
            params_file: None,
        };
        assert!(args.params().is_err());
    }
}
