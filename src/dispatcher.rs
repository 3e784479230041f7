//! Per-sample dispatch: resolve the schema, consult the gate, encode, inject
use log::{error, trace};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, WriterError};
use crate::gate::StartupGate;
use crate::sample::{Sample, Value};
use crate::schema::{MetricType, SchemaRegistry, MAX_FIELDS, MAX_VALUES, PROVENANCE_FIELDS};
use crate::sink::{FieldValue, Sink};

/// Outcome of a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The row was handed to the sink
    Delivered,
    /// Still warming up; the sample was discarded
    Dropped,
}

/// Owns the registry, the gate and the sink for one writer session
pub struct Dispatcher {
    registry: SchemaRegistry,
    gate: StartupGate,
    sink: Arc<dyn Sink>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher whose warm-up window starts now
    pub fn new(sink: Arc<dyn Sink>, clock: Arc<dyn Clock>, startup_delay: u64) -> Self {
        let start_time = clock.now();
        Self::with_start_time(sink, clock, start_time, startup_delay)
    }

    /// Create a dispatcher with an explicit warm-up start
    pub fn with_start_time(sink: Arc<dyn Sink>, clock: Arc<dyn Clock>, start_time: i64, startup_delay: u64) -> Self {
        Self {
            registry: SchemaRegistry::new(Arc::clone(&sink)),
            gate: StartupGate::new(start_time, startup_delay, Arc::clone(&sink)),
            sink,
            clock,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &StartupGate {
        &self.gate
    }

    /// Forward one sample, or drop it while the gate is still warming up.
    ///
    /// Every error is local to this sample.
    pub fn dispatch(&self, sample: &Sample) -> Result<Dispatch> {
        let metric_type = self.resolve(sample)?;

        if !self.gate.try_commit(self.clock.now())? {
            trace!("Dropping '{}' sample during warm-up", sample.type_name);
            return Ok(Dispatch::Dropped);
        }

        let row = match encode(&metric_type, sample) {
            Ok(row) => row,
            Err(e) => {
                error!("Rejecting '{}' sample: {}", sample.type_name, e);
                return Err(e);
            }
        };

        if let Err(e) = self.sink.inject(metric_type.handle, &row) {
            error!("Sink {} dropped '{}' sample: {}", self.sink.name(), sample.type_name, e);
            return Err(match e {
                WriterError::SinkUnavailable(_) => e,
                other => WriterError::SinkUnavailable(other.to_string()),
            });
        }

        Ok(Dispatch::Delivered)
    }

    fn resolve(&self, sample: &Sample) -> Result<Arc<MetricType>> {
        if let Some(metric_type) = self.registry.lookup(&sample.type_name)? {
            return Ok(metric_type);
        }

        if self.gate.is_committed() {
            error!(
                "Discovered '{}' after the schema set was committed; collectors should have checked in earlier",
                sample.type_name
            );
        }

        self.registry
            .register(&sample.type_name, &sample.data_set)
            .inspect_err(|e| error!("Cannot register '{}': {}", sample.type_name, e))
    }
}

/// Encode a sample as a row for its registered type
pub fn encode(metric_type: &MetricType, sample: &Sample) -> Result<Vec<FieldValue>> {
    let count = sample.values.len();
    if count > MAX_VALUES {
        return Err(WriterError::SchemaMismatch(format!(
            "{} values exceed the limit of {} fields per measurement",
            count, MAX_FIELDS
        )));
    }
    if count != sample.data_set.len() {
        return Err(WriterError::SchemaMismatch(format!(
            "{} values but {} value descriptors",
            count,
            sample.data_set.len()
        )));
    }
    if count != metric_type.value_count() {
        return Err(WriterError::SchemaMismatch(format!(
            "'{}' was registered with {} values, sample has {}",
            metric_type.name,
            metric_type.value_count(),
            count
        )));
    }

    let text = |value: &Option<String>| FieldValue::Text(value.clone().unwrap_or_default());

    let mut row = Vec::with_capacity(PROVENANCE_FIELDS + count);
    row.push(FieldValue::Integer64(sample.time.timestamp()));
    row.push(text(&sample.host));
    row.push(text(&sample.plugin));
    row.push(text(&sample.plugin_instance));
    row.push(FieldValue::Text(sample.type_name.clone()));
    row.push(text(&sample.type_instance));

    for (index, (value, expected)) in sample.values.iter().zip(&metric_type.value_kinds).enumerate() {
        if value.kind() != *expected {
            return Err(WriterError::SchemaMismatch(format!(
                "value {} of '{}' is {}, registered as {}",
                index,
                metric_type.name,
                value.kind(),
                expected
            )));
        }

        // unsigned kinds are reinterpreted as signed 64-bit
        row.push(match *value {
            Value::Counter(v) => FieldValue::Integer64(v as i64),
            Value::Gauge(v) => FieldValue::Float64(v),
            Value::Derive(v) => FieldValue::Integer64(v),
            Value::Absolute(v) => FieldValue::Integer64(v as i64),
        });
    }

    Ok(row)
}
