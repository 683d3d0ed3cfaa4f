//! Bulk loader for the inbound message CSV.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::LoadError;
use crate::pipeline::types::{MessageRecord, SourceFields};

/// One CSV row. Columns not listed here are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    message_id: String,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    sender_handle_or_email: String,
    #[serde(default)]
    subject_or_topic: String,
    #[serde(default)]
    message_snippet: String,
    #[serde(default)]
    source_system: String,
    #[serde(default)]
    channel_name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    order_id: Option<String>,
}

impl CsvRow {
    fn into_record(self) -> MessageRecord {
        let order_id = self
            .order_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        MessageRecord::new(
            self.message_id.trim(),
            SourceFields {
                sender_name: self.sender_name,
                sender_handle_or_email: self.sender_handle_or_email,
                subject_or_topic: self.subject_or_topic,
                message_snippet: self.message_snippet,
                source_system: self.source_system,
                channel_name: self.channel_name,
                category: self.category,
                order_id,
            },
        )
    }
}

/// Read every message from the CSV file at `path`, in file order.
pub fn load_messages_csv(path: &Path) -> Result<Vec<MessageRecord>, LoadError> {
    let file = std::fs::File::open(path).map_err(|e| LoadError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let records = read_messages(file)?;
    info!(path = %path.display(), count = records.len(), "Messages loaded");
    Ok(records)
}

/// Read messages from any CSV source with a header row.
pub fn read_messages<R: Read>(reader: R) -> Result<Vec<MessageRecord>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    let mut raw = csv::StringRecord::new();
    while reader.read_record(&mut raw)? {
        let row: CsvRow = raw.deserialize(Some(&headers))?;
        if row.message_id.trim().is_empty() {
            return Err(LoadError::MissingMessageId {
                line: raw.position().map_or(0, |p| p.line()),
            });
        }
        records.push(row.into_record());
    }
    Ok(records)
}
