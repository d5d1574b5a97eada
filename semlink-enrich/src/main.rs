//! semlink-enrich - batch enrichment runner
//!
//! Reads one JSON request `{"text": ..., "settings": {...}, "candidates": [...]}`
//! from a file or stdin, runs the enrichment pipeline and prints the
//! enriched candidates as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use semlink_common::config::{load_config, resolve_config_path};
use semlink_common::logging::init_tracing;
use semlink_enrich::transport::HttpTransport;
use semlink_enrich::{build_pipeline, Candidate, Settings};

#[derive(Debug, Parser)]
#[command(name = "semlink-enrich", version, about = "Enrich and score entity-link candidates")]
struct Cli {
    /// Configuration file (falls back to SEMLINK_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request file; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,

    /// Print the pipeline description instead of running a request
    #[arg(long)]
    inspect: bool,
}

#[derive(Debug, Deserialize)]
struct EnrichRequest {
    #[serde(default)]
    text: String,
    settings: Settings,
    #[serde(default)]
    candidates: Vec<Candidate>,
}

fn read_request(input: Option<&PathBuf>) -> Result<EnrichRequest> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read request from stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("Request is not valid JSON")
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.logging)?;

    info!("Starting semlink-enrich {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }
    info!("Cache directory: {}", config.cache_dir.display());

    let transport = Arc::new(HttpTransport::new(&config.http)?);
    let mut pipeline = build_pipeline(&config, transport).await?;

    if cli.inspect {
        print_json(&pipeline.inspect(), cli.pretty)?;
        pipeline.shutdown().await?;
        return Ok(());
    }

    let mut request = read_request(cli.input.as_ref())?;
    let outcome = pipeline
        .run(&mut request.candidates, &request.text, &mut request.settings)
        .await;

    pipeline.shutdown().await?;
    outcome?;

    print_json(&request.candidates, cli.pretty)
}
