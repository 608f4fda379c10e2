//! Final summary sink: stdout or a CSV file.

use crate::metrics::stats::Summary;
use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub enum OutputWriter {
    Stdout,
    Csv { path: String, file: File },
}

impl OutputWriter {
    pub fn new_stdout() -> Self {
        OutputWriter::Stdout
    }

    /// Create (truncate) `path` and write the CSV header.
    pub async fn new_csv(path: String) -> Result<Self> {
        let mut file = File::create(&path)
            .await
            .with_context(|| format!("create csv output {}", path))?;
        file.write_all(format!("{}\n", Summary::csv_header()).as_bytes())
            .await?;
        Ok(OutputWriter::Csv { path, file })
    }

    pub async fn write_summary(&mut self, summary: &Summary) -> Result<()> {
        match self {
            OutputWriter::Stdout => {
                println!("{}", summary);
            }
            OutputWriter::Csv { path, file } => {
                file.write_all(format!("{}\n", summary.to_csv_row()).as_bytes())
                    .await
                    .with_context(|| format!("write csv output {}", path))?;
                file.flush().await?;
            }
        }
        Ok(())
    }
}
