//! Metrics plugin runtime: periodic reporting of datasource samples to a
//! collector on the same host or in another domain.
pub mod collector;
pub mod config;
pub mod logger;
pub mod payload;
pub mod protocol;
pub mod reporter;
pub mod store;
pub mod writer;
