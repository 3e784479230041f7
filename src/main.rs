use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::AsyncRead;

use write_oml::config::{load_config, ConfigSource, LogLevel};
use write_oml::plugin::{spawn_writers, Plugin, WriteCounters};
use write_oml::sink::open_sink;
use write_oml::source::{JsonLinesSource, SampleSource};
use write_oml::util::logging;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "write-oml", version, about = "Forward collectd samples to an OML collection service")]
struct Args {
    /// Configuration file (TOML, JSON or YAML) with ServerURL, ContextName, NodeName, StartupDelay
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File of collectd JSON records; standard input when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Number of concurrent dispatch workers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Logging level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::try_init(&args.log_level)?;

    let mut sources = Vec::new();
    if let Some(path) = &args.config {
        sources.push(ConfigSource::File(path.clone()));
    }
    sources.push(ConfigSource::Environment("WRITE_OML".to_string()));
    let config = load_config(sources).context("loading configuration")?;

    let mut plugin = Plugin::new();
    plugin.set_config(config)?;
    let sink = open_sink(plugin.writer_config().server_url())?;
    plugin.init(sink).context("initialising sink")?;
    let plugin = Arc::new(plugin);

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let source = JsonLinesSource::new("collectd-json", reader, 1024);
    let rx = source.start().await?;
    let counters = Arc::new(WriteCounters::default());
    let handles = spawn_writers(plugin, rx, args.workers, Arc::clone(&counters));

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Dispatch worker failed: {}", e);
        }
    }
    source.stop().await?;

    info!(
        "Input exhausted: {} delivered, {} dropped during warm-up, {} failed",
        counters.delivered.load(Ordering::Relaxed),
        counters.dropped.load(Ordering::Relaxed),
        counters.failed.load(Ordering::Relaxed)
    );
    Ok(())
}
