use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[strum(to_string = "warn", serialize = "warning")]
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SinkState {
    count: usize,
    closed: bool,
}

/// Append-only log of one run. Readers replay history and then follow new
/// records until the sink is closed.
#[derive(Debug)]
pub struct LogSink {
    records: RwLock<Vec<LogRecord>>,
    state: watch::Sender<SinkState>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SinkState::default());
        Self {
            records: RwLock::new(Vec::new()),
            state,
        }
    }

    pub async fn push(&self, record: LogRecord) {
        let mut records = self.records.write().await;
        if self.state.borrow().closed {
            return;
        }
        match record.level {
            LogLevel::Debug => tracing::debug!(target: "chariot::program", "{}", record.message),
            LogLevel::Info => tracing::info!(target: "chariot::program", "{}", record.message),
            LogLevel::Warn => tracing::warn!(target: "chariot::program", "{}", record.message),
            LogLevel::Error => tracing::error!(target: "chariot::program", "{}", record.message),
        }
        records.push(record);
        self.state.send_modify(|s| s.count = records.len());
    }

    pub fn close(&self) {
        self.state.send_modify(|s| s.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub async fn records(&self) -> Vec<LogRecord> {
        self.records.read().await.clone()
    }

    /// Ordered stream of every record, past and future. Ends once the sink is
    /// closed and fully drained.
    pub fn stream(self: &Arc<Self>) -> impl Stream<Item = LogRecord> + Send + 'static {
        let rx = self.state.subscribe();
        futures::stream::unfold(
            (self.clone(), 0usize, rx),
            |(sink, index, mut rx)| async move {
                loop {
                    let closed = rx.borrow_and_update().closed;
                    let next = sink.records.read().await.get(index).cloned();
                    if let Some(record) = next {
                        return Some((record, (sink, index + 1, rx)));
                    }
                    if closed || rx.changed().await.is_err() {
                        return None;
                    }
                }
            },
        )
    }
}
