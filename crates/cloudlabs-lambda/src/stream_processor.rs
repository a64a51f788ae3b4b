//! Records DynamoDB stream changes as a history file in S3.
use std::collections::HashMap;

use anyhow::Context;
use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_dynamo::Item;
use serde_json::Value;

use crate::store::{NewObject, ObjectStore};

/// Environment variable naming the bucket history files are written to.
pub const HISTORY_BUCKET_ENV: &str = "HISTORY_BUCKET_NAME";
pub const GENERATED_BY: &str = "dynamodb-stream-processor";

/// One entry of the change history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub timestamp: String,
    pub event_name: String,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
    /// Neither image was sent, eg a `KEYS_ONLY` stream.
    Unknown,
}

impl ChangeRecord {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old_image, &self.new_image) {
            (Some(_), Some(_)) => ChangeKind::Modify,
            (None, Some(_)) => ChangeKind::Insert,
            (Some(_), None) => ChangeKind::Remove,
            (None, None) => ChangeKind::Unknown,
        }
    }
}

/// The file written for each batch of changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDocument {
    pub timestamp: String,
    pub total_changes: usize,
    pub changes: Vec<ChangeRecord>,
}

pub fn history_key(now: DateTime<Utc>) -> String {
    format!("history/changes-{}.json", now.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An item image as plain JSON, `None` when the stream did not send it.
///
/// Numbers keep their integer-ness and sets become arrays.
pub fn plain_image(item: &Item) -> anyhow::Result<Option<Value>> {
    let value: Value = serde_dynamo::from_item(item.clone())?;
    Ok(match value {
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    })
}

/// The `id` key of the changed item, or `unknown`.
fn item_id(keys: &Item) -> anyhow::Result<String> {
    let id = plain_image(keys)
        .context("item keys")?
        .and_then(|keys| keys.get("id").cloned());
    Ok(match id {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    })
}

pub fn change_record(record: &EventRecord, now: DateTime<Utc>) -> anyhow::Result<ChangeRecord> {
    let change = &record.change;
    let event_name = if record.event_name.is_empty() {
        "UNKNOWN".to_string()
    } else {
        record.event_name.clone()
    };
    Ok(ChangeRecord {
        timestamp: timestamp(now),
        event_name,
        item_id: item_id(&change.keys)?,
        old_image: plain_image(&change.old_image).context("old image")?,
        new_image: plain_image(&change.new_image).context("new image")?,
    })
}

/// Processes a batch of stream records.
///
/// Returns the key of the history file written, if there were any changes.
/// A missing `history_bucket` is only an error when there is something to
/// write.
pub async fn handle(
    store: &impl ObjectStore,
    history_bucket: Option<&str>,
    event: Event,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<String>> {
    tracing::info!("{} record(s) received", event.records.len());

    let mut changes = Vec::with_capacity(event.records.len());
    for record in &event.records {
        let change = change_record(record, now).with_context(|| {
            format!(
                "could not process record {}",
                record.event_id
            )
        })?;
        tracing::info!(
            event_id = %record.event_id,
            event_name = %change.event_name,
            item_id = %change.item_id,
            kind = ?change.kind(),
            "change recorded"
        );
        if let Some(old) = &change.old_image {
            tracing::debug!("old image: {old}");
        }
        if let Some(new) = &change.new_image {
            tracing::debug!("new image: {new}");
        }
        changes.push(change);
    }

    if changes.is_empty() {
        tracing::info!("no changes to save");
        return Ok(None);
    }

    let bucket = history_bucket
        .with_context(|| format!("{HISTORY_BUCKET_ENV} environment variable not set"))?;
    let key = history_key(now);
    let document = HistoryDocument {
        timestamp: timestamp(now),
        total_changes: changes.len(),
        changes,
    };
    let metadata = HashMap::from([
        ("generated-by".to_string(), GENERATED_BY.to_string()),
        ("change-count".to_string(), document.total_changes.to_string()),
    ]);
    tracing::info!("saving history to s3://{bucket}/{key}");
    store
        .put_object(
            bucket,
            NewObject {
                key: key.clone(),
                body: serde_json::to_vec_pretty(&document)?,
                content_type: "application/json".to_string(),
                metadata,
            },
        )
        .await?;
    tracing::info!("{} change(s) saved", document.total_changes);
    Ok(Some(key))
}
