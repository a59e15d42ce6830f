use super::{Interrupt, Producer, ReportOptions, Transport, write_sample};
use crate::{
    collector::Collector,
    payload::ProtocolVersion,
    protocol,
    writer::{FileWriter, Writer},
};
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Waits shorter than this are pushed back by `WAIT_BUMP`.
const MIN_WAIT: f64 = 0.1;
const WAIT_BUMP: f64 = 0.5;
/// Pause after every write.
const WRITE_YIELD: Duration = Duration::from_millis(3);
/// The collector schedules in whole seconds.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of the scheduling handshake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    Sleep(Duration),
    /// The collector's read is already this many seconds overdue.
    Overdue(f64),
}

/// Computes how long to wait before writing, given the collector's
/// `next_reading` and the lead time `neg_shift`, both in seconds.
///
/// A wait that is negative or nearly zero gets half a second added, so a
/// sample that just missed a read waits for the next one instead of spinning
/// against the collector.
pub fn wait_for_reading(next_reading: f64, neg_shift: f64) -> Wait {
    let mut wait = next_reading - neg_shift;
    if wait < MIN_WAIT {
        wait += WAIT_BUMP;
    }
    if wait <= 0.0 {
        Wait::Overdue(-wait)
    } else {
        Wait::Sleep(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
    }
}

/// Publishes samples to a file the collector on this host polls.
///
/// Every cycle re-registers with the collector, which answers with the time
/// of its next read; the sample is written just ahead of it.
pub struct Local {
    name: String,
    uid: String,
    protocol: ProtocolVersion,
    interval: Duration,
    neg_shift: f64,
    collector: Arc<dyn Collector>,
    producer: Arc<dyn Producer>,
    writer: Box<dyn Writer>,
}

impl Local {
    /// Resolves the sample path through the collector and creates the file
    /// writer for it.
    pub async fn setup(
        options: &ReportOptions,
        collector: Arc<dyn Collector>,
        producer: Arc<dyn Producer>,
    ) -> Result<Self> {
        ensure!(
            options.interval >= MIN_INTERVAL,
            "Reporting interval must be at least {:?}, got {:?}",
            MIN_INTERVAL,
            options.interval
        );
        let path = collector.get_path(&options.uid).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let writer = FileWriter::create(&path, protocol::select(options.protocol)).await?;
        tracing::debug!("{}: publishing samples to {}", options.uid, path.display());
        Ok(Self::new(options, collector, producer, Box::new(writer)))
    }

    fn new(
        options: &ReportOptions,
        collector: Arc<dyn Collector>,
        producer: Arc<dyn Producer>,
        writer: Box<dyn Writer>,
    ) -> Self {
        Self {
            name: format!("local:{}", options.uid),
            uid: options.uid.clone(),
            protocol: options.protocol,
            interval: options.interval,
            neg_shift: options.neg_shift.as_secs_f64(),
            collector,
            producer,
            writer,
        }
    }
}

#[async_trait]
impl Transport for Local {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report(&mut self, interrupt: &mut Interrupt) -> Result<()> {
        let next_reading = interrupt
            .guard(
                self.collector
                    .register(&self.uid, self.interval, self.protocol),
            )
            .await??;
        ensure!(
            next_reading.is_finite(),
            "Collector returned an invalid next reading: {}",
            next_reading
        );

        match wait_for_reading(next_reading, self.neg_shift) {
            Wait::Sleep(wait) => interrupt.sleep(wait).await?,
            Wait::Overdue(secs) => {
                tracing::info!("{}: reading is overdue by {:.3}s", self.name, secs)
            }
        }

        write_sample(&*self.producer, &mut *self.writer).await?;
        interrupt.sleep(WRITE_YIELD).await
    }

    async fn cleanup(mut self: Box<Self>) {
        tracing::info!("{}: deregistering from collector", self.name);
        if let Err(e) = self.collector.deregister(&self.uid).await {
            tracing::warn!("{}: failed to deregister: {:#}", self.name, e);
        }
        if let Err(e) = self.writer.cleanup().await {
            tracing::warn!("{}: failed to release sample file: {:#}", self.name, e);
        }
    }
}
