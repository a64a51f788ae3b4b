//! Object storage seen by the handlers.
use std::{collections::HashMap, future::Future};

use anyhow::Context;
use aws_sdk_s3::primitives::ByteStream;

/// An object read from storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub last_modified: Option<String>,
}

/// An object to write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

pub trait ObjectStore: Send + Sync {
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = anyhow::Result<StoredObject>> + Send;

    fn put_object(
        &self,
        bucket: &str,
        object: NewObject,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// [`ObjectStore`] backed by S3.
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        S3Store {
            client: aws_sdk_s3::Client::new(sdk),
        }
    }
}

impl ObjectStore for S3Store {
    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<StoredObject> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("could not get s3://{bucket}/{key}"))?;
        let content_type = out.content_type().map(str::to_string);
        let content_length = out.content_length();
        let last_modified = out.last_modified().map(|t| t.to_string());
        let body = out
            .body
            .collect()
            .await
            .with_context(|| format!("could not read s3://{bucket}/{key}"))?
            .into_bytes()
            .to_vec();
        Ok(StoredObject {
            body,
            content_type,
            content_length,
            last_modified,
        })
    }

    async fn put_object(&self, bucket: &str, object: NewObject) -> anyhow::Result<()> {
        let NewObject {
            key,
            body,
            content_type,
            metadata,
        } = object;
        self.client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .with_context(|| format!("could not put s3://{bucket}/{key}"))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use std::{collections::BTreeMap, sync::Mutex};

    use super::*;

    /// In-memory store keyed by `(bucket, key)`.
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<BTreeMap<(String, String), NewObject>>,
    }

    impl MemoryStore {
        pub fn with_object(self, bucket: &str, key: &str, body: &str) -> Self {
            self.objects.lock().unwrap().insert(
                (bucket.to_string(), key.to_string()),
                NewObject {
                    key: key.to_string(),
                    body: body.as_bytes().to_vec(),
                    content_type: "application/json".to_string(),
                    metadata: HashMap::default(),
                },
            );
            self
        }

        pub fn get(&self, bucket: &str, key: &str) -> Option<NewObject> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
        }

        pub fn len(&self) -> usize {
            self.objects.lock().unwrap().len()
        }
    }

    impl ObjectStore for MemoryStore {
        async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<StoredObject> {
            let object = self
                .get(bucket, key)
                .with_context(|| format!("no such key s3://{bucket}/{key}"))?;
            Ok(StoredObject {
                content_length: Some(object.body.len() as i64),
                content_type: Some(object.content_type),
                body: object.body,
                last_modified: None,
            })
        }

        async fn put_object(&self, bucket: &str, object: NewObject) -> anyhow::Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), object.key.clone()), object);
            Ok(())
        }
    }
}
