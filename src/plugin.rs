//! Host-facing lifecycle of the writer plugin
//!
//! The host registers the plugin once at load time, feeds it configuration
//! entries, initialises it, then calls `write` for every sample from any
//! number of worker threads.
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::{WriterConfig, CONFIG_KEYS};
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{Result, WriterError};
use crate::sample::Sample;
use crate::sink::Sink;

/// Plugin name reported to the host
pub const PLUGIN_NAME: &str = "write_oml";

/// Application name handed to the sink
pub const APP_NAME: &str = "collectd";

/// The writer plugin
pub struct Plugin {
    config: WriterConfig,
    clock: Arc<dyn Clock>,
    start_time: i64,
    dispatcher: OnceLock<Dispatcher>,
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin {
    /// Register the plugin; the warm-up window starts now
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Register the plugin against a specific clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let start_time = clock.now();
        debug!("Registered {} at {}", PLUGIN_NAME, start_time);
        Self {
            config: WriterConfig::default(),
            clock,
            start_time,
            dispatcher: OnceLock::new(),
        }
    }

    /// Configuration keys this plugin understands
    pub fn config_keys(&self) -> &'static [&'static str] {
        &CONFIG_KEYS
    }

    /// Apply one configuration entry
    pub fn config(&mut self, key: &str, value: &str) -> Result<()> {
        if self.dispatcher.get().is_some() {
            return Err(WriterError::Config(format!(
                "{} cannot be changed after initialisation",
                key
            )));
        }
        self.config.apply(key, value)
    }

    /// Replace the whole configuration, e.g. after loading it from a file
    pub fn set_config(&mut self, config: WriterConfig) -> Result<()> {
        if self.dispatcher.get().is_some() {
            return Err(WriterError::Config("already initialised".to_string()));
        }
        self.config = config;
        Ok(())
    }

    pub fn writer_config(&self) -> &WriterConfig {
        &self.config
    }

    /// Connect the sink and get ready to receive samples
    pub fn init(&self, sink: Arc<dyn Sink>) -> Result<()> {
        if self.dispatcher.get().is_some() {
            return Err(WriterError::Config("already initialised".to_string()));
        }

        sink.initialize(
            APP_NAME,
            self.config.server_url(),
            &self.config.node_name,
            &self.config.context_name,
        )?;

        let dispatcher = Dispatcher::with_start_time(
            sink,
            Arc::clone(&self.clock),
            self.start_time,
            self.config.startup_delay,
        );
        self.dispatcher
            .set(dispatcher)
            .map_err(|_| WriterError::Config("already initialised".to_string()))?;

        info!(
            "{} initialised: url={} node={} context={} startup_delay={}s",
            PLUGIN_NAME,
            self.config.server_url(),
            self.config.node_name,
            self.config.context_name,
            self.config.startup_delay
        );
        Ok(())
    }

    /// Handle one sample from the host
    pub fn write(&self, sample: &Sample) -> Result<Dispatch> {
        self.dispatcher
            .get()
            .ok_or(WriterError::NotInitialized)?
            .dispatch(sample)
    }

    /// The dispatcher, once initialised
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.get()
    }
}

/// Outcome totals across all write workers
#[derive(Debug, Default)]
pub struct WriteCounters {
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
}

impl WriteCounters {
    fn record(&self, outcome: &Result<Dispatch>) {
        let counter = match outcome {
            Ok(Dispatch::Delivered) => &self.delivered,
            Ok(Dispatch::Dropped) => &self.dropped,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drain `rx` through `plugin.write` on `workers` blocking threads.
///
/// Sink writes are blocking file or socket I/O, so the workers run on
/// tokio's blocking pool rather than as async tasks. They finish once the
/// channel is closed and empty.
pub fn spawn_writers(
    plugin: Arc<Plugin>,
    rx: mpsc::Receiver<Sample>,
    workers: usize,
    counters: Arc<WriteCounters>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..workers.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let plugin = Arc::clone(&plugin);
            let counters = Arc::clone(&counters);

            tokio::task::spawn_blocking(move || {
                loop {
                    let next = match rx.lock() {
                        Ok(mut rx) => rx.blocking_recv(),
                        Err(_) => {
                            error!("Worker {}: sample channel lock poisoned", worker);
                            break;
                        }
                    };
                    let Some(sample) = next else { break };

                    let outcome = plugin.write(&sample);
                    if let Err(e) = &outcome {
                        debug!("Worker {}: '{}' not written: {}", worker, sample.type_name, e);
                    }
                    counters.record(&outcome);
                }
            })
        })
        .collect()
}
