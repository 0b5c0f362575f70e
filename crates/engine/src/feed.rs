use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{Bar, BarFeed, Result};

/// Replays bars from a file holding one JSON `Bar` per line.
///
/// Every subscription opens its own reader and forwards only the lines for
/// the requested instrument. Malformed lines are logged and skipped. The
/// receiver closes once the file is exhausted.
pub struct JsonLinesFeed {
    path: PathBuf,
    buffer: usize,
}

impl JsonLinesFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: 256,
        }
    }
}

#[async_trait]
impl BarFeed for JsonLinesFeed {
    async fn subscribe(&self, instrument: &str, timeframe: &str) -> Result<mpsc::Receiver<Bar>> {
        let file = File::open(&self.path).await?;
        let (tx, rx) = mpsc::channel(self.buffer);
        let instrument = instrument.to_string();
        let path = self.path.display().to_string();

        info!(%instrument, %timeframe, %path, "Replaying bars from JSON lines");

        tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0usize;
            let mut sent = 0usize;
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%path, error = %e, "Bar file read failed");
                        break;
                    }
                };
                line_no += 1;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let bar: Bar = match serde_json::from_str(trimmed) {
                    Ok(bar) => bar,
                    Err(e) => {
                        warn!(%path, line = line_no, error = %e, "Skipping malformed bar");
                        continue;
                    }
                };
                if bar.instrument != instrument {
                    continue;
                }
                if tx.send(bar).await.is_err() {
                    debug!(%instrument, "Bar subscriber dropped");
                    return;
                }
                sent += 1;
            }
            info!(%instrument, bars = sent, "Bar file exhausted");
        });

        Ok(rx)
    }
}
