//! Structured diagnostics. Records are kept in a bounded in-memory ring so
//! the UI can show recent activity, and every record is also forwarded to
//! the `log` facade.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    pub ts: i64,
    pub level: EventLevel,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub explain: Option<String>,
    pub data: Option<Value>,
}

pub struct EventLog {
    capacity: usize,
    records: Mutex<VecDeque<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn log_event(
        &self,
        level: EventLevel,
        code: Option<&str>,
        module: &str,
        message: &str,
        explain: Option<&str>,
        data: Option<Value>,
    ) {
        let log_level = match level {
            EventLevel::Info => log::Level::Info,
            EventLevel::Warn => log::Level::Warn,
            EventLevel::Error => log::Level::Error,
        };
        match &data {
            Some(data) => log::log!(target: module, log_level, "[{}] {message} {data}", code.unwrap_or("-")),
            None => log::log!(target: module, log_level, "[{}] {message}", code.unwrap_or("-")),
        }

        let record = EventRecord {
            id: Uuid::new_v4().to_string(),
            ts: OffsetDateTime::now_utc().unix_timestamp(),
            level,
            code: code.map(str::to_string),
            module: module.to_string(),
            message: message.to_string(),
            explain: explain.map(str::to_string),
            data,
        };
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn find_code(&self, code: &str) -> Vec<EventRecord> {
        self.recent(self.capacity)
            .into_iter()
            .filter(|r| r.code.as_deref() == Some(code))
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
