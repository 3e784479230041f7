use log::{debug, error, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, WriterError};
use crate::sample::Sample;

/// Trait for sources that push samples to the writer
#[async_trait::async_trait]
pub trait SampleSource: Send + Sync + 'static {
    /// Start producing samples
    async fn start(&self) -> Result<mpsc::Receiver<Sample>>;

    /// Stop producing samples
    async fn stop(&self) -> Result<()>;

    /// Get the source name
    fn name(&self) -> &str;
}

/// Reads collectd JSON records, one record or array of records per line
pub struct JsonLinesSource<R> {
    name: String,
    reader: Mutex<Option<R>>,
    buffer_size: usize,
    running: Arc<AtomicBool>,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, reader: R, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            buffer_size: buffer_size.max(1),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait::async_trait]
impl<R> SampleSource for JsonLinesSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn start(&self) -> Result<mpsc::Receiver<Sample>> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| WriterError::Other(format!("source {} already started", self.name)))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let name = self.name.clone();
        let (tx, rx) = mpsc::channel(self.buffer_size);

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut line_no = 0usize;

            while running.load(Ordering::SeqCst) {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading from {}: {}", name, e);
                        break;
                    }
                };
                line_no += 1;

                if line.trim().is_empty() {
                    continue;
                }

                let samples = match Sample::batch_from_json(&line) {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!("{} line {}: skipping record: {}", name, line_no, e);
                        continue;
                    }
                };

                for sample in samples {
                    if tx.send(sample).await.is_err() {
                        // Channel closed, exit loop
                        return;
                    }
                }
            }

            debug!("Source {} finished after {} lines", name, line_no);
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
