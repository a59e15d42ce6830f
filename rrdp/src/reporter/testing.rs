// Recording collaborators shared by the transport tests.
use super::Producer;
use crate::{
    payload::{Datasource, Payload, Value},
    protocol::Codec,
    store::ControlStore,
    writer::{GrantRef, PageAllocator, Writer},
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, Ordering},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write { sequence: i64, timestamp: i64 },
    WriterCleanup,
    Transaction(Vec<(String, String)>),
    Immediate(String, String),
}

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<Event>>>);

impl Events {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Sequence numbers of the written samples, in write order.
    pub fn writes(&self) -> Vec<i64> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect()
    }

    /// Payload timestamps of the written samples, in write order.
    pub fn timestamps(&self) -> Vec<i64> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { timestamp, .. } => Some(timestamp),
                _ => None,
            })
            .collect()
    }

    pub fn assert_timestamps_non_decreasing(&self) {
        let timestamps = self.timestamps();
        assert!(
            timestamps.windows(2).all(|pair| pair[0] <= pair[1]),
            "timestamps went backwards: {:?}",
            timestamps
        );
    }
}

/// Records every write by the first datasource's value and the payload
/// timestamp.
pub struct RecordingWriter {
    pub events: Events,
    pub released: bool,
}

#[async_trait]
impl Writer for RecordingWriter {
    async fn write_payload(&mut self, payload: &Payload) -> Result<()> {
        if self.released {
            bail!("write after cleanup");
        }
        let sequence = match payload.datasources().first().map(|ds| ds.value) {
            Some(Value::Int64(v)) => v,
            _ => -1,
        };
        self.events.push(Event::Write {
            sequence,
            timestamp: payload.timestamp(),
        });
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.released = true;
        self.events.push(Event::WriterCleanup);
        Ok(())
    }
}

/// Producer whose single datasource counts up from 1.
pub fn counting_producer() -> Arc<dyn Producer> {
    let next = AtomicI64::new(1);
    Arc::new(move || -> Result<Vec<Datasource>> {
        let value = next.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Datasource::gauge("sequence", Value::Int64(value))])
    })
}

pub struct FakePages {
    pub events: Events,
    pub grants: Vec<GrantRef>,
}

#[async_trait]
impl PageAllocator for FakePages {
    async fn allocate(
        &self,
        _backend_domid: u32,
        _page_count: usize,
        _codec: Arc<dyn Codec>,
    ) -> Result<(Vec<GrantRef>, Box<dyn Writer>)> {
        let writer = RecordingWriter {
            events: self.events.clone(),
            released: false,
        };
        Ok((self.grants.clone(), Box::new(writer)))
    }
}

pub struct RecordingStore {
    pub events: Events,
    pub fail_transactions: bool,
}

#[async_trait]
impl ControlStore for RecordingStore {
    async fn transaction(&self, writes: Vec<(String, String)>) -> Result<()> {
        if self.fail_transactions {
            bail!("store unavailable");
        }
        self.events.push(Event::Transaction(writes));
        Ok(())
    }

    async fn write_immediate(&self, key: &str, value: &str) -> Result<()> {
        self.events
            .push(Event::Immediate(key.to_string(), value.to_string()));
        Ok(())
    }
}
