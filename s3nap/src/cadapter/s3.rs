//! S3 adapter built on aws-sdk-s3.
//!
//! Objects are small enough (one chunk each) to go through a single
//! `PutObject` carrying `Content-MD5`; retry and backoff are left to the SDK.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::cadapter::client::{
    ListPage, ObjectBackend, ObjectBody, ObjectRecord, PutMeta, PutReceipt,
};
use crate::error::BackendError;

/// DeleteObjects accepts at most this many keys per request.
const MAX_DELETE_BATCH: usize = 1000;

/// S3 backend options
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, Ceph, ...).
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    /// Path-style addressing, required by most self-hosted stores.
    pub force_path_style: bool,
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
}

impl S3Config {
    pub fn new(
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
            force_path_style: false,
            max_attempts: 3,
        }
    }
}

pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            config.session_token,
            None,
            "s3nap",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();
        info!(bucket = %config.bucket, endpoint = ?config.endpoint, "S3 backend ready");
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        meta: PutMeta,
    ) -> Result<PutReceipt, BackendError> {
        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(meta.size as i64)
            .content_md5(meta.content_hash.to_base64())
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(PutReceipt {
            etag: resp.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, key: &str) -> Result<Option<ObjectBody>, BackendError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(o) => {
                let etag = o.e_tag().map(str::to_string);
                let size = o.content_length().map(|len| len.max(0) as u64);
                let reader = o.body.into_async_read();
                Ok(Some(ObjectBody {
                    stream: Box::pin(ReaderStream::new(reader)),
                    size,
                    etag,
                }))
            }
            Err(e) => {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(Box::new(service))
                }
            }
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, BackendError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }
        let resp = request.send().await?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectRecord {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().map(to_chrono).unwrap_or_default(),
                    etag: obj.e_tag().map(str::to_string),
                })
            })
            .collect();

        let next_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<usize, BackendError> {
        let mut removed = 0;
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()?;
            let delete = Delete::builder().set_objects(Some(objects)).build()?;
            let resp = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await?;
            if let Some(first) = resp.errors().first() {
                warn!(
                    failed = resp.errors().len(),
                    key = first.key().unwrap_or_default(),
                    "some objects could not be deleted"
                );
                return Err(format!(
                    "failed to delete {}: {}",
                    first.key().unwrap_or_default(),
                    first.message().unwrap_or("unknown error")
                )
                .into());
            }
            removed += resp.deleted().len();
        }
        Ok(removed)
    }
}
