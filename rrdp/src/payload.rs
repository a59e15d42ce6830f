//! Sample envelope passed from the producer to a transport.
//!
//! A `Payload` is built fresh on every reporting tick from the producer's
//! snapshot and handed to the writer by reference; nothing keeps it afterwards.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire protocol used to encode samples. Fixed for the lifetime of a reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

/// How the collector should interpret consecutive readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DsKind {
    Gauge,
    Absolute,
    Derive,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Int64(i64),
    Float(f64),
}

impl Value {
    /// Big-endian 8-byte representation used by the binary protocol.
    pub fn to_be_bytes(self) -> [u8; 8] {
        match self {
            Value::Int64(v) => v.to_be_bytes(),
            Value::Float(v) => v.to_bits().to_be_bytes(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
        }
    }
}

/// A single named metric reading captured at report time.
///
/// # Fields
/// * `name` - Unique name of the datasource within the plugin
/// * `description` - Human readable description shown by the collector
/// * `value` - The reading itself
/// * `kind` - Gauge, absolute counter or derived rate
/// * `units` - Unit label, e.g. `"(fraction)"` or `"B/s"`
/// * `min`/`max` - Range the collector should clamp readings to
/// * `default` - Whether the collector archives this datasource by default
#[derive(Debug, Clone, PartialEq)]
pub struct Datasource {
    pub name: String,
    pub description: String,
    pub value: Value,
    pub kind: DsKind,
    pub units: String,
    pub min: f64,
    pub max: f64,
    pub default: bool,
}

impl Datasource {
    pub fn gauge(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            value,
            kind: DsKind::Gauge,
            units: String::new(),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            default: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// A timestamped snapshot of datasource readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    timestamp: i64,
    datasources: Vec<Datasource>,
}

impl Payload {
    /// Stamps the snapshot with the current unix time in seconds.
    pub fn new(datasources: Vec<Datasource>) -> Self {
        Self::at(chrono::Utc::now().timestamp(), datasources)
    }

    pub fn at(timestamp: i64, datasources: Vec<Datasource>) -> Self {
        Self {
            timestamp,
            datasources,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn datasources(&self) -> &[Datasource] {
        &self.datasources
    }
}
