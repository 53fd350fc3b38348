//! Catalog / incident demo host.
//!
//! ```bash
//! cargo run --package catalog-incident
//! cargo run --package catalog-incident -- --serve
//! cargo run --package catalog-incident -- --without-catalog   # exits non-zero
//! ```

use std::path::PathBuf;

use catalog_incident::{exit_status, plugin_source, walkthrough};
use clap::Parser;
use tracing::{error, info};
use trellis::framework::NoopMigrator;
use trellis::prelude::*;
use trellis::runtime::RuntimeResult;

#[derive(Parser, Debug)]
#[command(name = "catalog-incident", about = "Boots the catalog, incident and search plugins")]
struct Args {
    /// Leave the catalog plugin out; boot then fails because incident has no provider
    #[arg(long)]
    without_catalog: bool,

    /// Keep running until Ctrl+C instead of exiting after the walkthrough
    #[arg(long)]
    serve: bool,

    /// Configuration file (defaults to trellis.toml in the usual locations)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(long)]
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match boot(&args).await {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("catalog-incident: {err}");
            return err.exit_code();
        }
    };

    let walkthrough_failed = match walkthrough(&runtime).await {
        Ok(summary) => {
            for incident in &summary.incidents {
                info!(
                    entity = %incident.entity,
                    owner = %incident.owner,
                    revision = incident.revision,
                    "Open incident"
                );
            }
            for hit in &summary.hits {
                info!(provider = %hit.provider, title = %hit.title, "Search hit");
            }
            info!(rebuilds = summary.rebuilds, "Walkthrough finished");
            false
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Walkthrough failed");
            true
        }
    };

    let stopped = if args.serve {
        runtime.run().await
    } else {
        runtime.shutdown().await
    };

    if let Err(err) = &stopped {
        eprintln!("catalog-incident: {err}");
    }
    ExitCode::from(exit_status(walkthrough_failed, &stopped))
}

async fn boot(args: &Args) -> RuntimeResult<TrellisRuntime> {
    let mut builder = TrellisRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }

    let mut runtime = builder.build().await?;
    let report = runtime
        .boot(&plugin_source(!args.without_catalog), &NoopMigrator)
        .await?;
    for (n, tier) in report.tiers.iter().enumerate() {
        info!(tier = n, plugins = ?tier, "Boot tier");
    }
    Ok(runtime)
}
