//! A schema-discovering writer that forwards collectd samples to an OML
//! measurement-collection service.
//!
//! Measurement-point schemas are discovered from the first sample of each
//! type and declared to the sink straight away, but rows only start flowing
//! once a configurable warm-up window has passed and the schema set has been
//! committed.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod plugin;
pub mod sample;
pub mod schema;
pub mod sink;
pub mod source;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{WriterConfig, load_config, load_config_file};
    pub use crate::dispatcher::{Dispatch, Dispatcher};
    pub use crate::error::{Result, WriterError};
    pub use crate::gate::{GateState, StartupGate};
    pub use crate::plugin::Plugin;
    pub use crate::sample::{DataSource, Sample, Value, ValueKind};
    pub use crate::schema::{FieldDef, FieldKind, MetricType, SchemaRegistry};
    pub use crate::sink::{FieldValue, MemorySink, PointHandle, Sink, open_sink};
    pub use crate::source::{JsonLinesSource, SampleSource};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
