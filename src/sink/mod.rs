//! Boundary to the external measurement-collection transport
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, WriterError};
use crate::schema::FieldDef;

/// In-memory sink for testing
pub mod memory;

/// OML text-protocol writer
#[cfg(feature = "text-sink")]
pub mod text;

pub use memory::MemorySink;
#[cfg(feature = "text-sink")]
pub use text::TextSink;

/// Opaque handle for a declared measurement point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointHandle(pub usize);

/// One encoded field of an injected row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer64(i64),
    Float64(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer64(v) => write!(f, "{}", v),
            FieldValue::Float64(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

/// Parameters the sink was initialised with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkParams {
    pub app_name: String,
    pub server_url: String,
    pub node_id: String,
    pub context_name: String,
}

/// A transport that accepts schema declarations and typed rows.
///
/// Calls never block for long and are never retried by the caller.
pub trait Sink: Send + Sync + 'static {
    /// Connect to the collection service
    fn initialize(&self, app_name: &str, server_url: &str, node_id: &str, context_name: &str) -> Result<()>;

    /// Declare a measurement point
    fn declare_point(&self, name: &str, fields: &[FieldDef]) -> Result<PointHandle>;

    /// Commit the declared schemas and start streaming rows
    fn begin_streaming(&self) -> Result<()>;

    /// Send one row for a declared point
    fn inject(&self, handle: PointHandle, values: &[FieldValue]) -> Result<()>;

    /// Name of this sink, for logging
    fn name(&self) -> &str;
}

/// Pick a sink implementation from the configured server URL.
///
/// `file:` and `tcp:` destinations speak the OML text protocol. The
/// destination itself is opened by `initialize`.
pub fn open_sink(server_url: &str) -> Result<Arc<dyn Sink>> {
    let scheme = server_url.split(':').next().unwrap_or_default();
    match scheme {
        #[cfg(feature = "text-sink")]
        "file" | "tcp" => Ok(Arc::new(TextSink::new())),
        _ => Err(WriterError::Config(format!("Unsupported server URL: {}", server_url))),
    }
}
