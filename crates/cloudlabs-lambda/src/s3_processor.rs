//! Logs the content of `data.json` files as they land in a bucket.
//!
//! Triggered by EventBridge "Object Created" events.
use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::ObjectStore;

/// Only keys with this suffix are processed.
pub const DATA_FILE_SUFFIX: &str = "data.json";

pub type ObjectCreatedEvent = EventBridgeEvent<ObjectCreatedDetail>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ObjectCreatedDetail {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Not a data file.
    Skipped,
    Parsed(Value),
    /// The file was read but is not JSON; carries the raw content.
    Unparsable(String),
}

/// Reads and logs the created object.
///
/// Storage errors are returned so the invocation is marked as failed. A file
/// that is not valid JSON is only logged.
pub async fn handle(store: &impl ObjectStore, event: ObjectCreatedEvent) -> anyhow::Result<Outcome> {
    let ObjectCreatedDetail { bucket, object } = event.detail;
    tracing::info!(
        detail_type = ?event.detail_type,
        source = ?event.source,
        bucket = %bucket.name,
        key = %object.key,
        "object created"
    );

    if !object.key.ends_with(DATA_FILE_SUFFIX) {
        tracing::info!("not a {DATA_FILE_SUFFIX} file, ignoring");
        return Ok(Outcome::Skipped);
    }

    let stored = store.get_object(&bucket.name, &object.key).await?;
    let content = String::from_utf8_lossy(&stored.body).into_owned();
    tracing::info!("read {} byte(s)", stored.body.len());

    let data: Value = match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("could not parse {}: {e}", object.key);
            tracing::info!("raw content: {content}");
            return Ok(Outcome::Unparsable(content));
        }
    };

    tracing::info!(
        content_length = ?stored.content_length,
        last_modified = ?stored.last_modified,
        content_type = ?stored.content_type,
        "parsed JSON: {}",
        serde_json::to_string_pretty(&data).unwrap_or_default()
    );
    if let Value::Array(items) = &data {
        tracing::info!("array holds {} element(s)", items.len());
    }
    Ok(Outcome::Parsed(data))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn event(key: &str) -> ObjectCreatedEvent {
        serde_json::from_value(json!({
            "version": "0",
            "id": "17793124-05d4-b198-2fde-7ededc63b103",
            "detail-type": "Object Created",
            "source": "aws.s3",
            "account": "123456789012",
            "time": "2024-03-09T14:05:07Z",
            "region": "us-east-1",
            "resources": ["arn:aws:s3:::lambda-lab-bucket"],
            "detail": {
                "bucket": {"name": "lambda-lab-bucket"},
                "object": {"key": key, "size": 27, "etag": "b1946ac92492d2347c6235b4d2611184"}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn other_keys_are_skipped() {
        let store = MemoryStore::default();
        let outcome = handle(&store, event("uploads/photo.jpg")).await.unwrap();
        assert_eq!(Outcome::Skipped, outcome);
    }

    #[tokio::test]
    async fn data_file_is_parsed() {
        let store = MemoryStore::default().with_object(
            "lambda-lab-bucket",
            "incoming/data.json",
            r#"[{"id": 1}, {"id": 2}]"#,
        );
        let outcome = handle(&store, event("incoming/data.json")).await.unwrap();
        assert_eq!(Outcome::Parsed(json!([{"id": 1}, {"id": 2}])), outcome);
    }

    #[tokio::test]
    async fn bad_json_is_not_an_error() {
        let store =
            MemoryStore::default().with_object("lambda-lab-bucket", "data.json", "{not json");
        let outcome = handle(&store, event("data.json")).await.unwrap();
        assert_eq!(Outcome::Unparsable("{not json".to_string()), outcome);
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let store = MemoryStore::default();
        assert!(handle(&store, event("data.json")).await.is_err());
    }
}
