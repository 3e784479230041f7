use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use super::{FieldValue, PointHandle, Sink, SinkParams};
use crate::error::{Result, WriterError};
use crate::schema::FieldDef;

/// A sink that keeps everything it receives in memory.
///
/// Counts every call so tests can check how often the writer reached the
/// transport, and can be switched into failing mode per operation.
#[derive(Default)]
pub struct MemorySink {
    params: Mutex<Option<SinkParams>>,
    points: RwLock<Vec<(String, Vec<FieldDef>)>>,
    rows: RwLock<Vec<(PointHandle, Vec<FieldValue>)>>,
    begin_calls: AtomicUsize,
    streaming: AtomicBool,
    fail_declare: AtomicBool,
    fail_begin: AtomicBool,
    fail_inject: AtomicBool,
}

impl MemorySink {
    /// Create a new memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters passed to `initialize`, if it was called
    pub fn params(&self) -> Option<SinkParams> {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Names of declared points, in declaration order
    pub fn declarations(&self) -> Vec<String> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Fields a point was declared with
    pub fn declared_fields(&self, name: &str) -> Option<Vec<FieldDef>> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        points
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, fields)| fields.clone())
    }

    /// Number of `begin_streaming` calls received
    pub fn begin_count(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    /// All injected rows
    pub fn rows(&self) -> Vec<(PointHandle, Vec<FieldValue>)> {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rows injected for the point declared under `name`
    pub fn rows_for(&self, name: &str) -> Vec<Vec<FieldValue>> {
        let handle = {
            let points = self.points.read().unwrap_or_else(|e| e.into_inner());
            match points.iter().position(|(declared, _)| declared == name) {
                Some(index) => PointHandle(index),
                None => return Vec::new(),
            }
        };

        self.rows()
            .into_iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, values)| values)
            .collect()
    }

    pub fn fail_declarations(&self, fail: bool) {
        self.fail_declare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_injections(&self, fail: bool) {
        self.fail_inject.store(fail, Ordering::SeqCst);
    }
}

impl Sink for MemorySink {
    fn initialize(&self, app_name: &str, server_url: &str, node_id: &str, context_name: &str) -> Result<()> {
        let mut params = self
            .params
            .lock()
            .map_err(|_| WriterError::poisoned("memory sink"))?;
        *params = Some(SinkParams {
            app_name: app_name.to_string(),
            server_url: server_url.to_string(),
            node_id: node_id.to_string(),
            context_name: context_name.to_string(),
        });
        Ok(())
    }

    fn declare_point(&self, name: &str, fields: &[FieldDef]) -> Result<PointHandle> {
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(WriterError::SinkUnavailable(format!("declaration of '{}' refused", name)));
        }

        let mut points = self
            .points
            .write()
            .map_err(|_| WriterError::poisoned("memory sink"))?;
        points.push((name.to_string(), fields.to_vec()));
        Ok(PointHandle(points.len() - 1))
    }

    fn begin_streaming(&self) -> Result<()> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(WriterError::SinkUnavailable("start refused".to_string()));
        }
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn inject(&self, handle: PointHandle, values: &[FieldValue]) -> Result<()> {
        if !self.streaming.load(Ordering::SeqCst) {
            return Err(WriterError::SinkUnavailable("inject before begin_streaming".to_string()));
        }
        if self.fail_inject.load(Ordering::SeqCst) {
            return Err(WriterError::SinkUnavailable("injection refused".to_string()));
        }

        let known = self
            .points
            .read()
            .map_err(|_| WriterError::poisoned("memory sink"))?
            .len();
        if handle.0 >= known {
            return Err(WriterError::SinkUnavailable(format!("unknown point handle {}", handle.0)));
        }

        let mut rows = self
            .rows
            .write()
            .map_err(|_| WriterError::poisoned("memory sink"))?;
        rows.push((handle, values.to_vec()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
