use super::{Interrupt, Producer, ReportOptions, Transport, write_sample};
use crate::{
    protocol,
    store::{ControlStore, DomainContext},
    writer::{PageAllocator, Writer},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Pause between two interdomain samples.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Publishes samples into pages shared with a backend domain.
///
/// The backend learns about the pages through the control store: setup
/// writes the grant references and protocol under the plugin path and flags
/// them ready, cleanup flags a shutdown before the pages go away.
pub struct Interdomain {
    name: String,
    path: String,
    store: Arc<dyn ControlStore>,
    producer: Arc<dyn Producer>,
    writer: Box<dyn Writer>,
}

impl Interdomain {
    pub async fn setup(
        options: &ReportOptions,
        backend_domid: u32,
        page_count: usize,
        pages: Arc<dyn PageAllocator>,
        store: Arc<dyn ControlStore>,
        domain: DomainContext,
        producer: Arc<dyn Producer>,
    ) -> Result<Self> {
        let (grants, mut writer) = pages
            .allocate(backend_domid, page_count, protocol::select(options.protocol))
            .await
            .with_context(|| {
                format!(
                    "Failed to share {} page(s) with domain {}",
                    page_count, backend_domid
                )
            })?;

        let path = domain.plugin_path(&options.uid);
        let grantrefs = grants
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let handshake = vec![
            (format!("{}/grantrefs", path), grantrefs),
            (format!("{}/protocol", path), options.protocol.to_string()),
            (format!("{}/ready", path), "true".to_string()),
        ];
        if let Err(e) = store.transaction(handshake).await {
            if let Err(release) = writer.cleanup().await {
                tracing::warn!("{}: failed to release pages: {:#}", options.uid, release);
            }
            return Err(e.context(format!("Failed to publish {} to the store", path)));
        }
        tracing::debug!("{}: shared pages {:?} at {}", options.uid, grants, path);

        Ok(Self {
            name: format!("interdomain:{}", options.uid),
            path,
            store,
            producer,
            writer,
        })
    }
}

#[async_trait]
impl Transport for Interdomain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report(&mut self, interrupt: &mut Interrupt) -> Result<()> {
        write_sample(&*self.producer, &mut *self.writer).await?;
        interrupt.sleep(REPORT_INTERVAL).await
    }

    async fn cleanup(mut self: Box<Self>) {
        let key = format!("{}/shutdown", self.path);
        tracing::info!("{}: writing {}", self.name, key);
        if let Err(e) = self.store.write_immediate(&key, "true").await {
            tracing::warn!("{}: failed to signal shutdown: {:#}", self.name, e);
        }
        if let Err(e) = self.writer.cleanup().await {
            tracing::warn!("{}: failed to release pages: {:#}", self.name, e);
        }
    }
}
