//! Registry of measurement-point schemas discovered from incoming samples
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Result, WriterError};
use crate::sample::{DataSource, ValueKind};
use crate::sink::{PointHandle, Sink};

/// Upper bound on the fields of one measurement point, provenance included
pub const MAX_FIELDS: usize = 64;

/// Number of fixed provenance fields leading every schema
pub const PROVENANCE_FIELDS: usize = 6;

/// Largest number of measured values a single sample may carry
pub const MAX_VALUES: usize = MAX_FIELDS - PROVENANCE_FIELDS;

/// Longest accepted metric-type name in bytes
pub const MAX_NAME_LEN: usize = 127;

/// Declared kind of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer64,
    Float64,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer64 => "int64",
            FieldKind::Float64 => "double",
            FieldKind::Text => "string",
        };
        f.write_str(name)
    }
}

impl ValueKind {
    /// Schema kind used to declare a value of this kind.
    ///
    /// Absolute values are unsigned at the source but declared as signed
    /// 64-bit integers; some collection back-ends store unsigned 64-bit
    /// columns poorly.
    pub fn field_kind(self) -> FieldKind {
        match self {
            ValueKind::Counter => FieldKind::Integer64,
            ValueKind::Gauge => FieldKind::Float64,
            ValueKind::Derive => FieldKind::Integer64,
            ValueKind::Absolute => FieldKind::Integer64,
        }
    }
}

/// A named, typed schema field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The provenance fields every schema starts with, in order
pub fn provenance_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new("time", FieldKind::Integer64),
        FieldDef::new("host", FieldKind::Text),
        FieldDef::new("plugin", FieldKind::Text),
        FieldDef::new("plugin_instance", FieldKind::Text),
        FieldDef::new("type", FieldKind::Text),
        FieldDef::new("type_instance", FieldKind::Text),
    ]
}

/// A registered measurement point. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricType {
    pub name: String,
    /// Provenance fields followed by one field per measured value
    pub fields: Vec<FieldDef>,
    /// Source kinds of the measured values, in field order
    pub value_kinds: Vec<ValueKind>,
    /// Sink-side declaration handle
    pub handle: PointHandle,
}

impl MetricType {
    /// Fields describing measured values
    pub fn value_fields(&self) -> &[FieldDef] {
        &self.fields[PROVENANCE_FIELDS..]
    }

    pub fn value_count(&self) -> usize {
        self.value_kinds.len()
    }
}

/// Build the full field list for a data set, validating every descriptor
pub fn build_fields(data_set: &[DataSource]) -> Result<(Vec<FieldDef>, Vec<ValueKind>)> {
    if data_set.len() > MAX_VALUES {
        return Err(WriterError::SchemaMismatch(format!(
            "{} values exceed the limit of {} fields per measurement",
            data_set.len(),
            MAX_FIELDS
        )));
    }

    let mut fields = provenance_fields();
    let mut kinds = Vec::with_capacity(data_set.len());
    for source in data_set {
        let kind = source.kind()?;
        fields.push(FieldDef::new(source.name.clone(), kind.field_kind()));
        kinds.push(kind);
    }

    Ok((fields, kinds))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WriterError::InvalidName("empty name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(WriterError::InvalidName(format!(
            "'{}...' is longer than {} bytes",
            name.chars().take(32).collect::<String>(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Append-only map from metric-type name to its registered schema
pub struct SchemaRegistry {
    types: RwLock<HashMap<String, Arc<MetricType>>>,
    /// Serialises registrations so each name is declared to the sink at most once
    register_lock: Mutex<()>,
    sink: Arc<dyn Sink>,
}

impl SchemaRegistry {
    /// Create an empty registry declaring new schemas to `sink`
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            register_lock: Mutex::new(()),
            sink,
        }
    }

    /// Look up a registered metric type by name
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<MetricType>>> {
        let types = self
            .types
            .read()
            .map_err(|_| WriterError::poisoned("schema registry"))?;
        Ok(types.get(name).cloned())
    }

    /// Register a metric type, or return the existing registration unchanged.
    ///
    /// The sink declaration happens outside the map's write lock so lookups
    /// of other types keep going while a new type is being declared.
    pub fn register(&self, name: &str, data_set: &[DataSource]) -> Result<Arc<MetricType>> {
        if let Some(existing) = self.lookup(name)? {
            return Ok(existing);
        }

        let _guard = self
            .register_lock
            .lock()
            .map_err(|_| WriterError::poisoned("schema registration"))?;

        // Another caller may have registered it while we waited
        if let Some(existing) = self.lookup(name)? {
            return Ok(existing);
        }

        validate_name(name)?;
        let (fields, value_kinds) = build_fields(data_set)?;

        debug!("Declaring measurement point '{}' with {} fields", name, fields.len());
        let handle = self.sink.declare_point(name, &fields)?;

        let metric_type = Arc::new(MetricType {
            name: name.to_string(),
            fields,
            value_kinds,
            handle,
        });

        let mut types = self
            .types
            .write()
            .map_err(|_| WriterError::poisoned("schema registry"))?;
        types.insert(name.to_string(), Arc::clone(&metric_type));
        info!("Registered measurement point '{}' ({} values)", name, metric_type.value_count());

        Ok(metric_type)
    }

    /// Number of registered types
    pub fn len(&self) -> Result<usize> {
        let types = self
            .types
            .read()
            .map_err(|_| WriterError::poisoned("schema registry"))?;
        Ok(types.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Names of all registered types
    pub fn names(&self) -> Result<Vec<String>> {
        let types = self
            .types
            .read()
            .map_err(|_| WriterError::poisoned("schema registry"))?;
        Ok(types.keys().cloned().collect())
    }
}
