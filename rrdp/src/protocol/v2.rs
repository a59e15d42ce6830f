use super::{Codec, MAGIC, describe};
use crate::payload::Payload;
use anyhow::{Context, Result};

/// Binary framing. All integers are big-endian.
///
/// ```text
/// magic | data crc32 | metadata crc32 | count u32 | timestamp i64
///       | values [8 bytes; count] | metadata length u32 | metadata json
/// ```
///
/// The data checksum covers the timestamp and value bytes, so a reader that
/// has already parsed the metadata can poll values cheaply and only re-read
/// the metadata when its checksum changes.
pub struct V2Codec;

impl Codec for V2Codec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        let datasources = payload.datasources();
        let count = u32::try_from(datasources.len()).context("Too many datasources for v2")?;

        let mut data = Vec::with_capacity(8 + 8 * datasources.len());
        data.extend_from_slice(&payload.timestamp().to_be_bytes());
        for ds in datasources {
            data.extend_from_slice(&ds.value.to_be_bytes());
        }

        let metadata = serde_json::json!({
            "datasources": datasources.iter().map(|ds| describe(ds, false)).collect::<Vec<_>>(),
        });
        let metadata = serde_json::to_vec(&metadata).context("Failed to serialize v2 metadata")?;
        let metadata_len =
            u32::try_from(metadata.len()).context("v2 metadata does not fit a 32-bit length")?;

        let mut out = Vec::with_capacity(MAGIC.len() + 16 + data.len() + metadata.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&crc32fast::hash(&data).to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(&metadata).to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&data);
        out.extend_from_slice(&metadata_len.to_be_bytes());
        out.extend_from_slice(&metadata);
        Ok(out)
    }
}
