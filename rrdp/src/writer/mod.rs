mod file;
mod pages;

pub use file::FileWriter;
pub use pages::{FilePages, GrantRef, PAGE_SIZE, PageAllocator};

use crate::payload::Payload;
use anyhow::Result;
use async_trait::async_trait;

/// A sink that samples are written into.
///
/// A writer is owned by exactly one transport. `cleanup` releases whatever
/// backs the sink and is called once, after which the writer is dropped.
#[async_trait]
pub trait Writer: Send {
    async fn write_payload(&mut self, payload: &Payload) -> Result<()>;

    async fn cleanup(&mut self) -> Result<()>;
}
