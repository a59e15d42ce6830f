use super::Writer;
use crate::{payload::Payload, protocol::Codec};
use anyhow::{Context, Result, anyhow, bail, ensure};
use async_trait::async_trait;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::{
    fs,
    io::{AsyncSeekExt, AsyncWriteExt},
};

pub const PAGE_SIZE: usize = 4096;

/// Identifier of a page shared with another domain.
pub type GrantRef = u32;

/// Allocates page sets shared with a backend domain and returns a writer
/// over them, together with the grant references the backend needs to map
/// the same pages.
#[async_trait]
pub trait PageAllocator: Send + Sync {
    async fn allocate(
        &self,
        backend_domid: u32,
        page_count: usize,
        codec: Arc<dyn Codec>,
    ) -> Result<(Vec<GrantRef>, Box<dyn Writer>)>;
}

/// Page allocator backed by regular files.
///
/// Each allocation is one file of `page_count * PAGE_SIZE` bytes named after
/// the backend domain and its first grant reference. Useful on hosts without
/// a grant device and for exercising the interdomain path end to end.
pub struct FilePages {
    dir: PathBuf,
    next_ref: AtomicU32,
}

impl FilePages {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_ref: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl PageAllocator for FilePages {
    async fn allocate(
        &self,
        backend_domid: u32,
        page_count: usize,
        codec: Arc<dyn Codec>,
    ) -> Result<(Vec<GrantRef>, Box<dyn Writer>)> {
        ensure!(page_count > 0, "Cannot share zero pages");
        let count = u32::try_from(page_count).context("Page count out of range")?;
        let first = self
            .next_ref
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(count)
            })
            .map_err(|next| {
                anyhow!(
                    "Grant references exhausted: {} page(s) requested at {}",
                    page_count,
                    next
                )
            })?;
        let grants: Vec<GrantRef> = (first..first + count).collect();

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create page directory: {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}-{}", backend_domid, first));
        let file = fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to allocate pages: {}", path.display()))?;
        let capacity = page_count
            .checked_mul(PAGE_SIZE)
            .context("Page count out of range")?;
        file.set_len(capacity as u64)
            .await
            .with_context(|| format!("Failed to size pages: {}", path.display()))?;

        tracing::debug!(
            "Shared {} page(s) with domain {} as {:?}",
            page_count,
            backend_domid,
            grants
        );
        let writer = PageWriter {
            path,
            file: Some(file),
            capacity,
            codec,
        };
        Ok((grants, Box::new(writer)))
    }
}

struct PageWriter {
    path: PathBuf,
    file: Option<fs::File>,
    capacity: usize,
    codec: Arc<dyn Codec>,
}

#[async_trait]
impl Writer for PageWriter {
    async fn write_payload(&mut self, payload: &Payload) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            bail!("Pages at {} were already released", self.path.display());
        };
        let mut bytes = self.codec.encode(payload)?;
        ensure!(
            bytes.len() <= self.capacity,
            "Sample of {} bytes does not fit {} shared bytes",
            bytes.len(),
            self.capacity
        );
        // Zero the tail so a shorter sample never leaves stale bytes behind.
        bytes.resize(self.capacity, 0);

        file.seek(std::io::SeekFrom::Start(0)).await?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("Failed to write pages: {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            fs::remove_file(&self.path)
                .await
                .with_context(|| format!("Failed to release pages: {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Datasource, ProtocolVersion, Value};
    use crate::protocol;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_allocations_get_distinct_grants() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages::new(dir.path());
        let codec = protocol::select(ProtocolVersion::V2);

        let (first, _w1) = pages.allocate(0, 2, codec.clone()).await.unwrap();
        let (second, _w2) = pages.allocate(0, 1, codec).await.unwrap();

        assert_eq!(first, vec![1, 2]);
        assert_eq!(second, vec![3]);
        let len = std::fs::metadata(dir.path().join("0-1")).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
    }

    #[tokio::test]
    async fn test_exhausted_grant_refs_fail_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages {
            dir: dir.path().to_path_buf(),
            next_ref: AtomicU32::new(u32::MAX - 1),
        };
        let codec = protocol::select(ProtocolVersion::V2);

        let err = pages.allocate(0, 2, codec.clone()).await.err().unwrap();
        assert!(err.to_string().contains("Grant references exhausted"));

        // A failed allocation does not consume references.
        let (grants, _writer) = pages.allocate(0, 1, codec.clone()).await.unwrap();
        assert_eq!(grants, vec![u32::MAX - 1]);
        assert!(pages.allocate(0, u32::MAX as usize, codec).await.is_err());
    }

    #[tokio::test]
    async fn test_write_pads_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages::new(dir.path());
        let codec = protocol::select(ProtocolVersion::V2);
        let (_, mut writer) = pages.allocate(5, 1, codec.clone()).await.unwrap();

        let payload = Payload::at(10, vec![Datasource::gauge("x", Value::Float(1.5))]);
        writer.write_payload(&payload).await.unwrap();

        let raw = std::fs::read(dir.path().join("5-1")).unwrap();
        let encoded = codec.encode(&payload).unwrap();
        assert_eq!(raw.len(), PAGE_SIZE);
        assert_eq!(&raw[..encoded.len()], encoded.as_slice());
        assert!(raw[encoded.len()..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_oversized_sample_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages::new(dir.path());
        let (_, mut writer) = pages
            .allocate(0, 1, protocol::select(ProtocolVersion::V1))
            .await
            .unwrap();

        let datasources = (0..200)
            .map(|i| Datasource::gauge(format!("datasource_{i}"), Value::Int64(i)))
            .collect();
        assert!(writer.write_payload(&Payload::at(0, datasources)).await.is_err());
    }

    #[tokio::test]
    async fn test_no_write_after_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages::new(dir.path());
        let (_, mut writer) = pages
            .allocate(0, 1, protocol::select(ProtocolVersion::V2))
            .await
            .unwrap();

        writer.cleanup().await.unwrap();
        assert!(!dir.path().join("0-1").exists());
        assert!(writer.write_payload(&Payload::at(0, vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_pages_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pages = FilePages::new(dir.path());
        let result = pages.allocate(0, 0, protocol::select(ProtocolVersion::V2)).await;
        assert!(result.is_err());
    }
}
