//! Periodic reporting of producer samples to a collector.
//!
//! A reporter sets up one transport (`Local` or `Interdomain`), then drives
//! it in a loop until it is cancelled through its [`ReporterHandle`] or the
//! [`Interrupt`] it was started with fires. Setup failures are returned to
//! the caller; everything that goes wrong afterwards is logged and retried.
mod driver;
mod interdomain;
mod interrupt;
mod local;
mod state;
#[cfg(test)]
mod testing;

pub use interdomain::Interdomain;
pub use interrupt::{Interrupt, InterruptTrigger, Interrupted, interrupt_channel};
pub use local::{Local, MIN_INTERVAL, Wait, wait_for_reading};
pub use state::{ReporterHandle, State};

use crate::{
    collector::Collector,
    payload::{Datasource, Payload, ProtocolVersion},
    store::{ControlStore, DomainContext},
    writer::{PageAllocator, Writer},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

/// Supplies the current datasource readings on every tick.
pub trait Producer: Send + Sync {
    fn snapshot(&self) -> Result<Vec<Datasource>>;
}

impl<F> Producer for F
where
    F: Fn() -> Result<Vec<Datasource>> + Send + Sync,
{
    fn snapshot(&self) -> Result<Vec<Datasource>> {
        self()
    }
}

/// Where samples are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    /// A file polled by the collector on this host.
    #[default]
    Local,
    /// Pages shared with the collector's domain.
    Interdomain {
        backend_domid: u32,
        page_count: usize,
    },
}

/// One set-up transport: reports one cycle at a time and is torn down once.
#[async_trait]
pub trait Transport: Send {
    fn name(&self) -> &str;

    /// Runs one full report cycle, including the transport's own pacing.
    async fn report(&mut self, interrupt: &mut Interrupt) -> Result<()>;

    /// Releases the sink. Failures are logged, never returned.
    async fn cleanup(self: Box<Self>);
}

/// Per-plugin reporting parameters.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub uid: String,
    pub protocol: ProtocolVersion,
    pub target: Target,
    /// Base interval the plugin registers with the collector.
    pub interval: Duration,
    /// How far ahead of the collector's read a local sample is written.
    pub neg_shift: Duration,
}

/// Process-scoped collaborators, built once at startup.
///
/// A local target needs `collector`; an interdomain target needs `pages`,
/// `store` and `domain`.
#[derive(Clone, Default)]
pub struct Backends {
    pub collector: Option<Arc<dyn Collector>>,
    pub pages: Option<Arc<dyn PageAllocator>>,
    pub store: Option<Arc<dyn ControlStore>>,
    pub domain: Option<DomainContext>,
}

async fn setup(
    options: &ReportOptions,
    backends: &Backends,
    producer: Arc<dyn Producer>,
) -> Result<Box<dyn Transport>> {
    match options.target {
        Target::Local => {
            let collector = backends
                .collector
                .clone()
                .context("A local target requires a collector")?;
            let transport = Local::setup(options, collector, producer).await?;
            Ok(Box::new(transport))
        }
        Target::Interdomain {
            backend_domid,
            page_count,
        } => {
            let pages = backends
                .pages
                .clone()
                .context("An interdomain target requires a page allocator")?;
            let store = backends
                .store
                .clone()
                .context("An interdomain target requires a control store")?;
            let domain = backends
                .domain
                .context("An interdomain target requires the local domain id")?;
            let transport = Interdomain::setup(
                options,
                backend_domid,
                page_count,
                pages,
                store,
                domain,
                producer,
            )
            .await?;
            Ok(Box::new(transport))
        }
    }
}

/// Sets up the transport and runs the reporting loop on the calling task.
///
/// Only `interrupt` can stop the loop. Returns once cleanup has finished, or
/// early with the error if setup fails.
pub async fn start(
    options: &ReportOptions,
    backends: &Backends,
    producer: Arc<dyn Producer>,
    interrupt: Interrupt,
) -> Result<()> {
    let transport = setup(options, backends, producer)
        .await
        .with_context(|| format!("Failed to set up reporter {}", options.uid))?;
    driver::run(transport, None, interrupt).await;
    Ok(())
}

/// Sets up the transport and runs the reporting loop on a background task.
///
/// The returned handle cancels the loop cooperatively. `interrupt` still
/// aborts it at the next suspension point.
pub async fn start_async(
    options: &ReportOptions,
    backends: &Backends,
    producer: Arc<dyn Producer>,
    interrupt: Interrupt,
) -> Result<ReporterHandle> {
    let transport = setup(options, backends, producer)
        .await
        .with_context(|| format!("Failed to set up reporter {}", options.uid))?;
    let reporter = ReporterHandle::make();
    tokio::spawn(driver::run(transport, Some(reporter.clone()), interrupt));
    Ok(reporter)
}

async fn write_sample(producer: &dyn Producer, writer: &mut dyn Writer) -> Result<()> {
    let datasources = producer
        .snapshot()
        .context("Failed to take datasource snapshot")?;
    writer.write_payload(&Payload::new(datasources)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Value;
    use pretty_assertions::assert_eq;

    fn options(target: Target) -> ReportOptions {
        ReportOptions {
            uid: "test".to_string(),
            protocol: ProtocolVersion::V2,
            target,
            interval: Duration::from_secs(5),
            neg_shift: Duration::from_millis(500),
        }
    }

    fn producer() -> Arc<dyn Producer> {
        Arc::new(|| -> Result<Vec<Datasource>> {
            Ok(vec![Datasource::gauge("x", Value::Int64(1))])
        })
    }

    #[tokio::test]
    async fn test_local_without_collector_fails_setup() {
        let result = start(
            &options(Target::Local),
            &Backends::default(),
            producer(),
            Interrupt::never(),
        )
        .await;
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("requires a collector"));
    }

    #[tokio::test]
    async fn test_interdomain_without_backends_fails_setup() {
        let target = Target::Interdomain {
            backend_domid: 0,
            page_count: 1,
        };
        let result = start_async(
            &options(target),
            &Backends::default(),
            producer(),
            Interrupt::never(),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_target_deserializes_from_tagged_table() {
        let target: Target = toml::from_str(
            r#"
kind = "interdomain"
backend_domid = 0
page_count = 2
"#,
        )
        .unwrap();
        assert_eq!(
            target,
            Target::Interdomain {
                backend_domid: 0,
                page_count: 2
            }
        );
        let target: Target = toml::from_str(r#"kind = "local""#).unwrap();
        assert_eq!(target, Target::Local);
    }
}
