//! `pipeline-cli <operation> [json-params]`: one acquisition, printed as JSON.

use clap::Parser;

use trend_pipeline::cli::{self, Cli};
use trend_pipeline::{init_tracing, PipelineConfig, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Cli::parse();
    let config = PipelineConfig::load_default()?;
    let service = Service::bootstrap(config).await?;

    let out = cli::dispatch(&service.orchestrator, &args).await;
    println!("{}", serde_json::to_string(&out)?);

    service.shutdown().await
}
