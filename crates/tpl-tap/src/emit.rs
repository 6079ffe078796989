//! Output message stream
//!
//! Everything the tap extracts leaves through an [`Emitter`] as SCHEMA,
//! RECORD and STATE messages. The binary writes them as JSON lines to
//! stdout; tests and embedders use [`MemoryEmitter`].

use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tpl_common::types::format_datetime;
use tpl_common::{Record, Result, TapError};

use crate::bookmarks::SyncState;

/// One line of tap output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Record,
        time_extracted: String,
    },
    State {
        value: SyncState,
    },
}

/// Sink for tap output
pub trait Emitter: Send + Sync {
    fn emit(&self, message: Message) -> Result<()>;

    fn emit_schema(
        &self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
        bookmark_properties: &[String],
    ) -> Result<()> {
        self.emit(Message::Schema {
            stream: stream.to_string(),
            schema: schema.clone(),
            key_properties: key_properties.to_vec(),
            bookmark_properties: bookmark_properties.to_vec(),
        })
    }

    fn emit_record(&self, stream: &str, record: Record, time_extracted: DateTime<Utc>) -> Result<()> {
        self.emit(Message::Record {
            stream: stream.to_string(),
            record,
            time_extracted: format_datetime(&time_extracted),
        })
    }

    fn emit_state(&self, state: &SyncState) -> Result<()> {
        self.emit(Message::State {
            value: state.clone(),
        })
    }
}

/// Writes one JSON document per line; flushed after every STATE so the
/// persisted checkpoint never lags behind the records it covers.
pub struct JsonLinesEmitter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesEmitter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Emitter for JsonLinesEmitter<W> {
    fn emit(&self, message: Message) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TapError::Io(std::io::Error::other("output writer lock poisoned")))?;
        serde_json::to_writer(&mut *writer, &message)?;
        writer.write_all(b"\n")?;
        if matches!(message, Message::State { .. }) {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Collects messages in memory
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    messages: Mutex<Vec<Message>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.guard().clone()
    }

    /// Records emitted for `stream`, in order
    pub fn records(&self, stream: &str) -> Vec<Record> {
        self.guard()
            .iter()
            .filter_map(|m| match m {
                Message::Record { stream: s, record, .. } if s == stream => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SyncState> {
        self.guard()
            .iter()
            .filter_map(|m| match m {
                Message::State { value } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stream names of SCHEMA messages, in order
    pub fn schemas(&self) -> Vec<String> {
        self.guard()
            .iter()
            .filter_map(|m| match m {
                Message::Schema { stream, .. } => Some(stream.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Emitter for MemoryEmitter {
    fn emit(&self, message: Message) -> Result<()> {
        self.guard().push(message);
        Ok(())
    }
}
