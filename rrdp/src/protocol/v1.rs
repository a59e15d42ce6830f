use super::{Codec, MAGIC, describe};
use crate::payload::Payload;
use anyhow::{Context, Result};

/// Text framing: magic, body length and body CRC32 as 8 hex digits each on
/// their own line, followed by a JSON body carrying values and metadata.
pub struct V1Codec;

impl Codec for V1Codec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "timestamp": payload.timestamp(),
            "datasources": payload
                .datasources()
                .iter()
                .map(|ds| describe(ds, true))
                .collect::<Vec<_>>(),
        });
        let body = serde_json::to_vec(&body).context("Failed to serialize v1 body")?;
        let len = u32::try_from(body.len()).context("v1 body does not fit a 32-bit length")?;

        let mut out = Vec::with_capacity(MAGIC.len() + 19 + body.len());
        out.extend_from_slice(MAGIC);
        out.push(b'\n');
        out.extend_from_slice(format!("{:08x}\n", len).as_bytes());
        out.extend_from_slice(format!("{:08x}\n", crc32fast::hash(&body)).as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Datasource, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_describes_body() {
        let payload = Payload::at(
            42,
            vec![Datasource::gauge("mem_free", Value::Int64(1024)).with_units("B")],
        );
        let bytes = V1Codec.encode(&payload).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.splitn(4, '\n');

        assert_eq!(lines.next(), Some("DATASOURCES"));
        let len = u32::from_str_radix(lines.next().unwrap(), 16).unwrap();
        let crc = u32::from_str_radix(lines.next().unwrap(), 16).unwrap();
        let body = lines.next().unwrap();
        assert_eq!(len as usize, body.len());
        assert_eq!(crc, crc32fast::hash(body.as_bytes()));

        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["datasources"][0]["name"], "mem_free");
        assert_eq!(json["datasources"][0]["units"], "B");
        assert_eq!(json["datasources"][0]["value"]["value"], 1024);
    }
}
