use super::Writer;
use crate::{payload::Payload, protocol::Codec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncWriteExt};

/// Writer that keeps the latest encoded sample in a file the collector polls.
///
/// Each write goes to a temporary sibling that is renamed over the target, so
/// the collector never observes a half-written sample.
pub struct FileWriter {
    path: PathBuf,
    staging: PathBuf,
    codec: Arc<dyn Codec>,
}

impl FileWriter {
    /// Creates the writer and an empty sink file.
    ///
    /// # Arguments
    /// * `path` - File the collector reads samples from
    /// * `codec` - Codec used to encode every sample
    pub async fn create(path: impl Into<PathBuf>, codec: Arc<dyn Codec>) -> Result<Self> {
        let path = path.into();
        let staging = staging_path(&path);
        fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create sample file: {}", path.display()))?;
        Ok(Self {
            path,
            staging,
            codec,
        })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl Writer for FileWriter {
    async fn write_payload(&mut self, payload: &Payload) -> Result<()> {
        let bytes = self.codec.encode(payload)?;

        let mut file = fs::File::create(&self.staging)
            .await
            .with_context(|| format!("Failed to open staging file: {}", self.staging.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| "Failed to write sample")?;
        file.flush().await.with_context(|| "Failed to flush sample")?;
        drop(file);

        fs::rename(&self.staging, &self.path)
            .await
            .with_context(|| format!("Failed to publish sample to {}", self.path.display()))
    }

    async fn cleanup(&mut self) -> Result<()> {
        if let Err(e) = fs::remove_file(&self.staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    "Failed to remove staging file {}: {}",
                    self.staging.display(),
                    e
                );
            }
        }
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e)
                .with_context(|| format!("Failed to remove sample file: {}", self.path.display())),
            _ => Ok(()),
        }
    }
}
