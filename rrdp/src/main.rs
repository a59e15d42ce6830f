/// Load-average plugin built on the rrdp reporter.
///
/// Reads its configuration, sets up the transport the config targets and
/// reports until SIGINT or SIGTERM.
mod loadavg;

use anyhow::{Context, Result};
use clap::Parser;
use loadavg::LoadAvg;
use rrdp::{
    collector::HttpCollector,
    config::{Config, RunMode},
    logger,
    reporter::{self, Backends, Interrupt, Producer, Target, interrupt_channel},
    store::{DomainContext, FsStore},
    writer::FilePages,
};
use std::{path::PathBuf, sync::Arc};
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Define command line arguments using clap
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "RRDP_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match Config::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:?}", e);
            std::process::exit(1);
        }
    };

    let _logger = match logger::init(config.log.file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:?}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!("Config path: {:?}", cli.config);

    if let Err(e) = run(config).await {
        tracing::error!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let backends = backends(&config)?;
    let options = config.report_options();
    let producer: Arc<dyn Producer> = Arc::new(LoadAvg::default());
    let mut signals = ShutdownSignals::install()?;

    match config.plugin.mode {
        RunMode::Sync => {
            let (trigger, interrupt) = interrupt_channel();
            tokio::spawn(async move {
                signals.recv().await;
                trigger.raise();
            });
            reporter::start(&options, &backends, producer, interrupt).await
        }
        RunMode::Async => {
            let reporter =
                reporter::start_async(&options, &backends, producer, Interrupt::never()).await?;
            signals.recv().await;
            reporter.cancel().await;
            Ok(())
        }
    }
}

// Builds only the collaborators the configured target needs.
fn backends(config: &Config) -> Result<Backends> {
    let backends = match config.target {
        Target::Local => {
            let collector = HttpCollector::new(&config.collector.url, config.collector.timeout)?;
            Backends {
                collector: Some(Arc::new(collector)),
                ..Backends::default()
            }
        }
        Target::Interdomain { .. } => Backends {
            pages: Some(Arc::new(FilePages::new(&config.interdomain.page_dir))),
            store: Some(Arc::new(FsStore::new(&config.interdomain.store_root))),
            domain: Some(DomainContext::new(config.interdomain.domid)),
            ..Backends::default()
        },
    };
    Ok(backends)
}

struct ShutdownSignals {
    sigint: Signal,
    sigterm: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt()).context("watch SIGINT failed")?,
            sigterm: signal(SignalKind::terminate()).context("watch SIGTERM failed")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => tracing::info!("SIGINT received, shutdown initiated..."),
            _ = self.sigterm.recv() => tracing::info!("SIGTERM received, shutdown initiated..."),
        }
    }
}
