//! Snapshot output: CSV rows to a file or to stdout.

use anyhow::Result;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::metrics::stats::StatsSnapshot;

pub struct OutputWriter {
    sink: Sink,
    wrote_header: bool,
}

enum Sink {
    Stdout,
    Csv(BufWriter<File>),
}

impl OutputWriter {
    /// Create (truncating) a CSV file for snapshot rows.
    pub async fn new_csv(path: String) -> Result<Self> {
        let file = File::create(&path).await?;
        Ok(Self {
            sink: Sink::Csv(BufWriter::new(file)),
            wrote_header: false,
        })
    }

    pub fn new_stdout() -> Self {
        Self {
            sink: Sink::Stdout,
            wrote_header: false,
        }
    }

    /// Write one snapshot row, emitting the header line first on the initial
    /// call.
    pub async fn write_snapshot(&mut self, snapshot: &StatsSnapshot) -> Result<()> {
        let mut line = String::new();
        if !self.wrote_header {
            line.push_str(StatsSnapshot::csv_header());
            line.push('\n');
            self.wrote_header = true;
        }
        line.push_str(&snapshot.to_csv_row());
        line.push('\n');
        match &mut self.sink {
            Sink::Stdout => {
                print!("{line}");
            }
            Sink::Csv(file) => {
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
            }
        }
        Ok(())
    }
}
