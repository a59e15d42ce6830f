//! Wire codecs for samples.
//!
//! Both protocol versions start with the same `DATASOURCES` magic so a reader
//! can tell an empty or half-written sink apart from a valid one.
mod v1;
mod v2;

pub use v1::V1Codec;
pub use v2::V2Codec;

use crate::payload::{Datasource, Payload, ProtocolVersion};
use anyhow::Result;
use std::sync::Arc;

pub const MAGIC: &[u8] = b"DATASOURCES";

/// Serializes payloads into the bytes written to a sink.
pub trait Codec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>>;
}

/// Maps a protocol version to its codec.
pub fn select(version: ProtocolVersion) -> Arc<dyn Codec> {
    match version {
        ProtocolVersion::V1 => Arc::new(V1Codec),
        ProtocolVersion::V2 => Arc::new(V2Codec),
    }
}

// Datasource description shared by both versions. V1 embeds the value, V2
// carries values separately in the binary section.
fn describe(ds: &Datasource, with_value: bool) -> serde_json::Value {
    let mut entry = serde_json::json!({
        "name": ds.name,
        "description": ds.description,
        "type": ds.kind,
        "units": ds.units,
        "min": ds.min.to_string(),
        "max": ds.max.to_string(),
        "default": ds.default,
        "value_type": ds.value.type_name(),
    });
    if with_value {
        entry["value"] = serde_json::to_value(ds.value).unwrap_or(serde_json::Value::Null);
    }
    entry
}
