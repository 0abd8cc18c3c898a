//! raw-import - pull raw disk images into the local image store
//!
//! Thin wrapper wiring the import manager to the reqwest transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plfm_raw_import::{ImportConfig, ImportManager, ImportReport, ReqwestTransport};

/// Import raw disk images by URL.
#[derive(Debug, Parser)]
#[command(name = "raw-import")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image store directory.
    #[arg(long, global = true, env = "GHOST_IMAGE_ROOT")]
    image_root: Option<PathBuf>,

    /// Emit JSON logs and JSON reports.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download an image, optionally creating a writable copy.
    Pull {
        /// http(s) URL of the image (.raw or .raw.xz).
        url: String,

        /// Name of the writable copy (<image-root>/<LOCAL>.raw).
        local: Option<String>,

        /// Replace an existing writable copy.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(config: &ImportConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_report(report: &ImportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    match &report.path {
        Some(path) => println!("{:?} {} -> {}", report.outcome, report.url, path.display()),
        None => println!("{:?} {}", report.outcome, report.url),
    }
    if let Some(local) = &report.local_path {
        println!("local copy: {}", local.display());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ImportConfig::from_env()?;
    if let Some(root) = cli.image_root {
        config.image_root = root;
    }
    config.log_json |= cli.json;
    init_tracing(&config);

    info!(
        image_root = %config.image_root.display(),
        max_size = config.max_size,
        "Configuration loaded"
    );

    let transport = Arc::new(ReqwestTransport::new()?);
    let mut manager = ImportManager::new(transport, &config).on_finished(|code| {
        if code != 0 {
            warn!(code = code, "Import finished with error");
        }
    });

    match cli.command {
        Commands::Pull { url, local, force } => {
            manager
                .pull(&url, local.as_deref(), force)
                .with_context(|| format!("failed to start import of {url}"))?;
        }
    }

    let reports = tokio::select! {
        result = manager.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, canceling imports");
            manager.shutdown();
            anyhow::bail!("import canceled");
        }
    };

    for report in &reports {
        print_report(report, cli.json)?;
    }
    Ok(())
}
