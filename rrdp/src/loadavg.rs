use anyhow::{Context, Result};
use rrdp::{
    payload::{Datasource, Value},
    reporter::Producer,
};
use std::path::PathBuf;

/// Samples the 1, 5 and 15 minute load averages.
pub struct LoadAvg {
    path: PathBuf,
}

impl Default for LoadAvg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/loadavg"),
        }
    }
}

impl Producer for LoadAvg {
    fn snapshot(&self) -> Result<Vec<Datasource>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        parse(&content)
    }
}

fn parse(content: &str) -> Result<Vec<Datasource>> {
    let mut fields = content.split_whitespace();
    ["1", "5", "15"]
        .into_iter()
        .map(|minutes| -> Result<Datasource> {
            let field = fields.next().context("Truncated load average")?;
            let value: f64 = field
                .parse()
                .with_context(|| format!("Invalid load average: {}", field))?;
            Ok(Datasource::gauge(format!("load{}", minutes), Value::Float(value))
                .with_description(format!("Load average over {} minute(s)", minutes))
                .with_units("(runnable tasks)")
                .with_range(0.0, f64::INFINITY))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_loadavg() {
        let datasources = parse("0.52 0.58 0.59 1/467 12345\n").unwrap();
        let names: Vec<&str> = datasources.iter().map(|ds| ds.name.as_str()).collect();
        assert_eq!(names, vec!["load1", "load5", "load15"]);
        assert_eq!(datasources[2].value, Value::Float(0.59));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("0.52 nope").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_snapshot_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"1.00 2.00 3.00 2/100 42\n").unwrap();
        let producer = LoadAvg {
            path: file.path().to_path_buf(),
        };

        let datasources = producer.snapshot().unwrap();
        assert_eq!(datasources[0].value, Value::Float(1.0));
    }
}
