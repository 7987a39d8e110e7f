//! Event sinks
//!
//! Metric events leave the connector as JSON lines on stdout, one object per
//! event, wrapped with the index/sourcetype metadata of the input.

use crate::azure::metrics::MetricEvent;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Destination for metric events
pub trait EventSink: Send + Sync {
    fn write_event(&self, event: &MetricEvent) -> Result<()>;
}

/// Envelope written for each event
#[derive(Serialize)]
struct Envelope<'a> {
    time: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    index: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    sourcetype: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    host: &'a str,
    event: &'a MetricEvent,
}

/// Writes events as JSON lines to any writer (stdout by default)
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
    source: String,
    index: String,
    sourcetype: String,
    host: String,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout(source: &str, index: &str, sourcetype: &str) -> Self {
        Self::new(std::io::stdout(), source, index, sourcetype)
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, source: &str, index: &str, sourcetype: &str) -> Self {
        Self {
            writer: Mutex::new(writer),
            source: source.to_string(),
            index: index.to_string(),
            sourcetype: sourcetype.to_string(),
            host: String::new(),
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn write_event(&self, event: &MetricEvent) -> Result<()> {
        let envelope = Envelope {
            time: &event.timestamp,
            source: &self.source,
            index: &self.index,
            sourcetype: &self.sourcetype,
            host: &self.host,
            event,
        };

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("Event writer lock poisoned"))?;
        serde_json::to_writer(&mut *writer, &envelope).context("Failed to serialize event")?;
        writer.write_all(b"\n").context("Failed to write event")?;
        writer.flush().context("Failed to flush event")?;
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn write_event(&self, event: &MetricEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("Event buffer lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
