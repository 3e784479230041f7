//! Writer for the OML text protocol (version 4)
//!
//! Schemas declared before streaming starts go into the stream header;
//! schemas declared later are announced through the metadata stream
//! (schema 0). Each row carries the seconds elapsed since streaming began,
//! the schema number, a per-schema sequence number, then the field values,
//! all tab-separated.
use chrono::Utc;
use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Instant;

use super::{FieldValue, PointHandle, Sink, SinkParams};
use crate::error::{Result, WriterError};
use crate::schema::FieldDef;

/// Protocol version written in the header
pub const PROTOCOL_VERSION: u32 = 4;

const METADATA_SCHEMA: &str = "0 _experiment_metadata subject:string key:string value:string";

struct Point {
    name: String,
    fields: Vec<FieldDef>,
    seq: u64,
}

#[derive(Default)]
struct TextState {
    writer: Option<Box<dyn Write + Send>>,
    params: Option<SinkParams>,
    points: Vec<Point>,
    started: Option<Instant>,
    metadata_seq: u64,
}

/// Sink that serialises declarations and rows as OML text
pub struct TextSink {
    state: Mutex<TextState>,
}

impl Default for TextSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSink {
    /// Create a sink whose destination is opened by `initialize`
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TextState::default()),
        }
    }

    /// Create a sink writing to `writer` regardless of the server URL
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            state: Mutex::new(TextState {
                writer: Some(Box::new(writer)),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TextState>> {
        self.state.lock().map_err(|_| WriterError::poisoned("text sink"))
    }
}

fn open_destination(server_url: &str) -> Result<Box<dyn Write + Send>> {
    let unavailable = |e: io::Error| WriterError::SinkUnavailable(format!("{}: {}", server_url, e));

    if let Some(path) = server_url.strip_prefix("file:") {
        if path == "-" {
            return Ok(Box::new(io::stdout()));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(unavailable)?;
        return Ok(Box::new(BufWriter::new(file)));
    }

    if let Some(address) = server_url.strip_prefix("tcp:") {
        let stream = TcpStream::connect(address).map_err(unavailable)?;
        return Ok(Box::new(BufWriter::new(stream)));
    }

    Err(WriterError::Config(format!("Unsupported server URL: {}", server_url)))
}

/// Escape the characters that would break the tab-separated framing
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn schema_line(number: usize, app_name: &str, point: &Point) -> String {
    let mut line = format!("{} {}_{}", number, app_name, point.name);
    for field in &point.fields {
        line.push_str(&format!(" {}:{}", field.name, field.kind));
    }
    line
}

/// Names end up space- and colon-separated in schema lines
fn check_identifier(what: &str, name: &str) -> Result<()> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Ok(());
    }
    Err(WriterError::SinkUnavailable(format!(
        "{} name '{}' is not a valid OML identifier",
        what,
        escape(name)
    )))
}

fn write_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.write_all(b"\n"))
        .and_then(|_| writer.flush())
        .map_err(|e| WriterError::SinkUnavailable(format!("write failed: {}", e)))
}

impl Sink for TextSink {
    fn initialize(&self, app_name: &str, server_url: &str, node_id: &str, context_name: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.writer.is_none() {
            state.writer = Some(open_destination(server_url)?);
        }
        state.params = Some(SinkParams {
            app_name: app_name.to_string(),
            server_url: server_url.to_string(),
            node_id: node_id.to_string(),
            context_name: context_name.to_string(),
        });
        info!("OML text sink writing to {}", server_url);
        Ok(())
    }

    fn declare_point(&self, name: &str, fields: &[FieldDef]) -> Result<PointHandle> {
        check_identifier("point", name)?;
        for field in fields {
            check_identifier("field", &field.name)?;
        }

        let mut state = self.lock()?;
        let state = &mut *state;
        let app_name = match &state.params {
            Some(params) => params.app_name.clone(),
            None => return Err(WriterError::SinkUnavailable("sink not initialised".to_string())),
        };

        let point = Point {
            name: name.to_string(),
            fields: fields.to_vec(),
            seq: 0,
        };
        let number = state.points.len() + 1;

        if let Some(started) = state.started {
            // Header already sent
            let line = schema_line(number, &app_name, &point);
            let row = format!(
                "{:.6}\t0\t{}\t.\tschema\t{}",
                started.elapsed().as_secs_f64(),
                state.metadata_seq + 1,
                escape(&line)
            );
            if let Some(writer) = state.writer.as_mut() {
                write_line(writer, &row)?;
            }
            state.metadata_seq += 1;
        }

        state.points.push(point);
        debug!("Declared schema {} for '{}'", number, name);
        Ok(PointHandle(number - 1))
    }

    fn begin_streaming(&self) -> Result<()> {
        let mut state = self.lock()?;
        let state = &mut *state;
        if state.started.is_some() {
            return Ok(());
        }

        let params = state
            .params
            .clone()
            .ok_or_else(|| WriterError::SinkUnavailable("sink not initialised".to_string()))?;
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| WriterError::SinkUnavailable("no destination".to_string()))?;

        let mut header = vec![
            format!("protocol: {}", PROTOCOL_VERSION),
            format!("domain: {}", params.context_name),
            format!("start-time: {}", Utc::now().timestamp()),
            format!("sender-id: {}", params.node_id),
            format!("app-name: {}", params.app_name),
            format!("schema: {}", METADATA_SCHEMA),
        ];
        for (index, point) in state.points.iter().enumerate() {
            header.push(format!("schema: {}", schema_line(index + 1, &params.app_name, point)));
        }
        header.push("content: text".to_string());
        header.push(String::new());

        write_line(writer, &header.join("\n"))?;
        state.started = Some(Instant::now());
        info!("OML stream started with {} schemas", state.points.len());
        Ok(())
    }

    fn inject(&self, handle: PointHandle, values: &[FieldValue]) -> Result<()> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let started = state
            .started
            .ok_or_else(|| WriterError::SinkUnavailable("inject before begin_streaming".to_string()))?;
        let point = state
            .points
            .get_mut(handle.0)
            .ok_or_else(|| WriterError::SinkUnavailable(format!("unknown point handle {}", handle.0)))?;

        if values.len() != point.fields.len() {
            return Err(WriterError::SchemaMismatch(format!(
                "'{}' expects {} fields, got {}",
                point.name,
                point.fields.len(),
                values.len()
            )));
        }

        point.seq += 1;
        let mut row = format!("{:.6}\t{}\t{}", started.elapsed().as_secs_f64(), handle.0 + 1, point.seq);
        for value in values {
            row.push('\t');
            match value {
                FieldValue::Text(text) => row.push_str(&escape(text)),
                other => row.push_str(&other.to_string()),
            }
        }

        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| WriterError::SinkUnavailable("no destination".to_string()))?;
        write_line(writer, &row)
    }

    fn name(&self) -> &str {
        "oml-text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn load_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("time", FieldKind::Integer64),
            FieldDef::new("host", FieldKind::Text),
            FieldDef::new("value", FieldKind::Float64),
        ]
    }

    fn sink() -> (SharedBuffer, TextSink) {
        let buffer = SharedBuffer::default();
        let sink = TextSink::with_writer(buffer.clone());
        sink.initialize("collectd", "file:-", "node1", "exp1").unwrap();
        (buffer, sink)
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a\tb\nc\\d"), "a\\tb\\nc\\\\d");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_header_lists_declared_schemas() {
        let (buffer, sink) = sink();
        sink.declare_point("load", &load_fields()).unwrap();
        sink.begin_streaming().unwrap();

        let lines = buffer.lines();
        assert_eq!(lines[0], "protocol: 4");
        assert_eq!(lines[1], "domain: exp1");
        assert!(lines[2].starts_with("start-time: "));
        assert_eq!(lines[3], "sender-id: node1");
        assert_eq!(lines[4], "app-name: collectd");
        assert_eq!(lines[5], format!("schema: {}", METADATA_SCHEMA));
        assert_eq!(lines[6], "schema: 1 collectd_load time:int64 host:string value:double");
        assert_eq!(lines[7], "content: text");
        assert_eq!(lines[8], "");
    }

    #[test]
    fn test_rows_after_header() {
        let (buffer, sink) = sink();
        let handle = sink.declare_point("load", &load_fields()).unwrap();
        sink.begin_streaming().unwrap();
        sink.inject(
            handle,
            &[FieldValue::Integer64(7), FieldValue::Text("h\t1".into()), FieldValue::Float64(42.5)],
        )
        .unwrap();
        sink.inject(
            handle,
            &[FieldValue::Integer64(8), FieldValue::Text("h1".into()), FieldValue::Float64(1.0)],
        )
        .unwrap();

        let lines = buffer.lines();
        let first: Vec<&str> = lines[9].split('\t').collect();
        assert_eq!(&first[1..], &["1", "1", "7", "h\\t1", "42.5"]);
        let second: Vec<&str> = lines[10].split('\t').collect();
        assert_eq!(&second[1..3], &["1", "2"]);
    }

    #[test]
    fn test_late_declaration_goes_to_metadata_stream() {
        let (buffer, sink) = sink();
        sink.begin_streaming().unwrap();
        sink.declare_point("load", &load_fields()).unwrap();

        let lines = buffer.lines();
        let last: Vec<&str> = lines.last().unwrap().split('\t').collect();
        assert_eq!(&last[1..5], &["0", "1", ".", "schema"]);
        assert_eq!(last[5], "1 collectd_load time:int64 host:string value:double");
    }

    #[test]
    fn test_non_identifier_names_rejected() {
        let (buffer, sink) = sink();
        let result = sink.declare_point("cpu\ncontent: text", &load_fields());
        assert!(matches!(result, Err(WriterError::SinkUnavailable(_))));

        let fields = vec![FieldDef::new("va lue:x", FieldKind::Float64)];
        assert!(matches!(sink.declare_point("cpu", &fields), Err(WriterError::SinkUnavailable(_))));
        assert!(matches!(sink.declare_point("", &[]), Err(WriterError::SinkUnavailable(_))));

        let handle = sink.declare_point("if_octets", &load_fields()).unwrap();
        assert_eq!(handle, PointHandle(0));
        sink.begin_streaming().unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("content:")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.starts_with("schema: ")).count(), 2);
    }

    #[derive(Clone, Default)]
    struct FlakyWriter {
        buffer: SharedBuffer,
        fail: Arc<AtomicBool>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.buffer.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_late_declaration_leaves_no_schema() {
        let writer = FlakyWriter::default();
        let sink = TextSink::with_writer(writer.clone());
        sink.initialize("collectd", "file:-", "node1", "exp1").unwrap();
        sink.begin_streaming().unwrap();

        writer.fail.store(true, Ordering::SeqCst);
        assert!(matches!(sink.declare_point("load", &load_fields()), Err(WriterError::SinkUnavailable(_))));

        writer.fail.store(false, Ordering::SeqCst);
        let handle = sink.declare_point("load", &load_fields()).unwrap();
        assert_eq!(handle, PointHandle(0));
        assert!(matches!(sink.inject(PointHandle(1), &[]), Err(WriterError::SinkUnavailable(_))));

        let lines = writer.buffer.lines();
        let last: Vec<&str> = lines.last().unwrap().split('\t').collect();
        assert_eq!(&last[1..5], &["0", "1", ".", "schema"]);
        assert_eq!(last[5], "1 collectd_load time:int64 host:string value:double");
    }

    #[test]
    fn test_begin_streaming_writes_header_once() {
        let (buffer, sink) = sink();
        sink.begin_streaming().unwrap();
        sink.begin_streaming().unwrap();
        let headers = buffer.lines().iter().filter(|l| l.starts_with("protocol:")).count();
        assert_eq!(headers, 1);
    }

    #[test]
    fn test_inject_checks() {
        let (_, sink) = sink();
        let handle = sink.declare_point("load", &load_fields()).unwrap();

        assert!(matches!(sink.inject(handle, &[]), Err(WriterError::SinkUnavailable(_))));
        sink.begin_streaming().unwrap();
        assert!(matches!(sink.inject(handle, &[]), Err(WriterError::SchemaMismatch(_))));
        assert!(matches!(sink.inject(PointHandle(5), &[]), Err(WriterError::SinkUnavailable(_))));
    }

    #[test]
    fn test_declare_requires_initialize() {
        let sink = TextSink::with_writer(SharedBuffer::default());
        assert!(matches!(sink.declare_point("load", &[]), Err(WriterError::SinkUnavailable(_))));
    }

    #[test]
    fn test_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.oml");
        let sink = TextSink::new();
        sink.initialize("collectd", &format!("file:{}", path.display()), "n", "c")
            .unwrap();
        sink.begin_streaming().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("protocol: 4\n"));
    }

    #[test]
    fn test_unreachable_tcp_destination() {
        let sink = TextSink::new();
        // port 1 on localhost is not expected to accept connections
        let result = sink.initialize("collectd", "tcp:127.0.0.1:1", "n", "c");
        assert!(matches!(result, Err(WriterError::SinkUnavailable(_))));
    }
}
