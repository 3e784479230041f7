//! Samples as handed over by the metrics-collection host
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WriterError};

/// The closed set of data-source kinds a host may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Counter,
    Gauge,
    Derive,
    Absolute,
}

impl ValueKind {
    /// Resolve the host's numeric data-source code (0..=3)
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(ValueKind::Counter),
            1 => Ok(ValueKind::Gauge),
            2 => Ok(ValueKind::Derive),
            3 => Ok(ValueKind::Absolute),
            other => Err(WriterError::UnsupportedValueKind(format!("data source code {}", other))),
        }
    }

    /// The host's numeric code for this kind
    pub fn code(self) -> i32 {
        match self {
            ValueKind::Counter => 0,
            ValueKind::Gauge => 1,
            ValueKind::Derive => 2,
            ValueKind::Absolute => 3,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Counter => "counter",
            ValueKind::Gauge => "gauge",
            ValueKind::Derive => "derive",
            ValueKind::Absolute => "absolute",
        };
        f.write_str(name)
    }
}

impl FromStr for ValueKind {
    type Err = WriterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "counter" => Ok(ValueKind::Counter),
            "gauge" => Ok(ValueKind::Gauge),
            "derive" => Ok(ValueKind::Derive),
            "absolute" => Ok(ValueKind::Absolute),
            _ => Err(WriterError::UnsupportedValueKind(format!("data source type '{}'", s))),
        }
    }
}

/// One value descriptor of a sample's data set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// Value name, e.g. `rx` or `value`
    pub name: String,
    /// Raw data-source code as supplied by the host
    pub code: i32,
}

impl DataSource {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            code: kind.code(),
        }
    }

    /// Descriptor carrying an arbitrary code, as an untrusted host might send
    pub fn with_code(name: impl Into<String>, code: i32) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }

    pub fn kind(&self) -> Result<ValueKind> {
        ValueKind::from_code(self.code)
    }
}

/// A single measured value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Counter(u64),
    Gauge(f64),
    Derive(i64),
    Absolute(u64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Counter(_) => ValueKind::Counter,
            Value::Gauge(_) => ValueKind::Gauge,
            Value::Derive(_) => ValueKind::Derive,
            Value::Absolute(_) => ValueKind::Absolute,
        }
    }
}

/// One timestamped observation of a metric type
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub host: Option<String>,
    pub plugin: Option<String>,
    pub plugin_instance: Option<String>,
    /// Metric-type name; doubles as the `type` provenance field
    pub type_name: String,
    pub type_instance: Option<String>,
    pub data_set: Vec<DataSource>,
    pub values: Vec<Value>,
}

impl Sample {
    /// An empty sample of the given type, stamped now
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            host: None,
            plugin: None,
            plugin_instance: None,
            type_name: type_name.into(),
            type_instance: None,
            data_set: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn plugin_instance(mut self, instance: impl Into<String>) -> Self {
        self.plugin_instance = Some(instance.into());
        self
    }

    pub fn type_instance(mut self, instance: impl Into<String>) -> Self {
        self.type_instance = Some(instance.into());
        self
    }

    /// Append a value together with its descriptor
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.data_set.push(DataSource::new(name, value.kind()));
        self.values.push(value);
        self
    }

    /// Decode a single collectd JSON record
    pub fn from_json(input: &str) -> Result<Sample> {
        let record: JsonRecord = serde_json::from_str(input)?;
        record.into_sample()
    }

    /// Decode either a single record or an array of records
    pub fn batch_from_json(input: &str) -> Result<Vec<Sample>> {
        match serde_json::from_str::<JsonBatch>(input)? {
            JsonBatch::One(record) => Ok(vec![record.into_sample()?]),
            JsonBatch::Many(records) => records.into_iter().map(JsonRecord::into_sample).collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonBatch {
    Many(Vec<JsonRecord>),
    One(JsonRecord),
}

/// Record layout written by collectd's JSON output format
#[derive(Deserialize)]
struct JsonRecord {
    values: Vec<serde_json::Value>,
    dstypes: Vec<String>,
    dsnames: Vec<String>,
    time: f64,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    plugin_instance: Option<String>,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    type_instance: Option<String>,
}

impl JsonRecord {
    fn into_sample(self) -> Result<Sample> {
        if self.values.len() != self.dstypes.len() || self.values.len() != self.dsnames.len() {
            return Err(WriterError::Decode(format!(
                "'{}' has {} values, {} dstypes and {} dsnames",
                self.type_name,
                self.values.len(),
                self.dstypes.len(),
                self.dsnames.len()
            )));
        }

        let time = DateTime::from_timestamp(self.time.trunc() as i64, (self.time.fract() * 1e9) as u32)
            .ok_or_else(|| WriterError::Decode(format!("time {} out of range", self.time)))?;

        let mut data_set = Vec::with_capacity(self.values.len());
        let mut values = Vec::with_capacity(self.values.len());
        for ((raw, dstype), dsname) in self.values.iter().zip(&self.dstypes).zip(self.dsnames) {
            let kind: ValueKind = dstype.parse()?;
            values.push(json_value(raw, kind, &dsname)?);
            data_set.push(DataSource::new(dsname, kind));
        }

        Ok(Sample {
            time,
            host: self.host,
            plugin: self.plugin,
            plugin_instance: self.plugin_instance,
            type_name: self.type_name,
            type_instance: self.type_instance,
            data_set,
            values,
        })
    }
}

fn json_value(raw: &serde_json::Value, kind: ValueKind, name: &str) -> Result<Value> {
    let invalid = || WriterError::Decode(format!("value '{}' ({}) is not a valid {}", name, raw, kind));

    match kind {
        ValueKind::Counter => raw.as_u64().map(Value::Counter).ok_or_else(invalid),
        // collectd writes NaN gauges as null
        ValueKind::Gauge if raw.is_null() => Ok(Value::Gauge(f64::NAN)),
        ValueKind::Gauge => raw.as_f64().map(Value::Gauge).ok_or_else(invalid),
        ValueKind::Derive => raw.as_i64().map(Value::Derive).ok_or_else(invalid),
        ValueKind::Absolute => raw.as_u64().map(Value::Absolute).ok_or_else(invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_RECORD: &str = r#"{"values":[1901474177],"dstypes":["counter"],"dsnames":["value"],
        "time":1280959128,"interval":10,"host":"leeloo.octo.it","plugin":"cpu",
        "plugin_instance":"0","type":"cpu","type_instance":"idle"}"#;

    #[test]
    fn test_kind_codes() {
        assert_eq!(ValueKind::from_code(1).unwrap(), ValueKind::Gauge);
        assert_eq!(ValueKind::from_code(3).unwrap(), ValueKind::Absolute);
        assert!(matches!(ValueKind::from_code(4), Err(WriterError::UnsupportedValueKind(_))));
        assert!(matches!(ValueKind::from_code(-1), Err(WriterError::UnsupportedValueKind(_))));
        assert_eq!(ValueKind::Derive.code(), 2);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("GAUGE".parse::<ValueKind>().unwrap(), ValueKind::Gauge);
        assert!(matches!("histogram".parse::<ValueKind>(), Err(WriterError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_builder_keeps_descriptors_in_step() {
        let sample = Sample::new("if_octets")
            .host("h1")
            .value("rx", Value::Derive(10))
            .value("tx", Value::Derive(20));

        assert_eq!(sample.values.len(), 2);
        assert_eq!(sample.data_set[1], DataSource::new("tx", ValueKind::Derive));
        assert_eq!(sample.plugin, None);
    }

    #[test]
    fn test_decode_record() {
        let sample = Sample::from_json(CPU_RECORD).unwrap();
        assert_eq!(sample.type_name, "cpu");
        assert_eq!(sample.host.as_deref(), Some("leeloo.octo.it"));
        assert_eq!(sample.type_instance.as_deref(), Some("idle"));
        assert_eq!(sample.time.timestamp(), 1280959128);
        assert_eq!(sample.values, vec![Value::Counter(1901474177)]);
        assert_eq!(sample.data_set[0].kind().unwrap(), ValueKind::Counter);
    }

    #[test]
    fn test_decode_batch() {
        let batch = format!("[{},{}]", CPU_RECORD, CPU_RECORD);
        assert_eq!(Sample::batch_from_json(&batch).unwrap().len(), 2);
        assert_eq!(Sample::batch_from_json(CPU_RECORD).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_null_gauge() {
        let record = r#"{"values":[null],"dstypes":["gauge"],"dsnames":["value"],"time":1.5,"type":"load"}"#;
        let sample = Sample::from_json(record).unwrap();
        match sample.values[0] {
            Value::Gauge(v) => assert!(v.is_nan()),
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(sample.host, None);
    }

    #[test]
    fn test_decode_rejects_unknown_dstype() {
        let record = r#"{"values":[1],"dstypes":["histogram"],"dsnames":["value"],"time":1,"type":"x"}"#;
        assert!(matches!(Sample::from_json(record), Err(WriterError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_decode_rejects_ragged_record() {
        let record = r#"{"values":[1,2],"dstypes":["gauge"],"dsnames":["a","b"],"time":1,"type":"x"}"#;
        assert!(matches!(Sample::from_json(record), Err(WriterError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_negative_counter() {
        let record = r#"{"values":[-5],"dstypes":["counter"],"dsnames":["value"],"time":1,"type":"x"}"#;
        assert!(matches!(Sample::from_json(record), Err(WriterError::Decode(_))));
    }
}
