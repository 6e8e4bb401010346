//! [`ObjectStore`] over the AWS SDK S3 client.
//!
//! Works against AWS S3 and S3-compatible stores (Cloudflare R2, `MinIO`).
//!
//! # Environment Variables
//!
//! Read by [`S3Store::from_env`]:
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `S3_ENDPOINT_URL` | No | Custom endpoint; enables path-style addressing |
//! | `S3_REGION` | No | Region; defaults to `auto` with a custom endpoint |
//! | `S3_ACCESS_KEY_ID` | No* | Access key |
//! | `S3_SECRET_ACCESS_KEY` | No* | Secret key |
//! | `S3_FORCE_PATH_STYLE` | No | `true`/`false` override for path-style addressing |
//!
//! \* Set both or neither. Without them the AWS default credential chain is
//! used (`AWS_ACCESS_KEY_ID`, profiles, instance roles).

use std::collections::HashMap;
use std::path::Path;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tokio::io::AsyncWriteExt as _;

use crate::store::{
    BoxError, CreateBucketOutcome, ObjectMeta, ObjectStore, ObjectSummary, StoreError,
};

/// Region used for custom endpoints when none is configured.
const DEFAULT_CUSTOM_REGION: &str = "auto";

/// S3-backed object store. Cheap to share; the SDK client pools connections.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Wraps an already configured client.
    #[must_use]
    pub const fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Builds a client from environment variables (see the module docs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingEnv`] if only one half of the
    /// access key pair is set.
    pub async fn from_env() -> Result<Self, StoreError> {
        let endpoint = optional_env("S3_ENDPOINT_URL");
        let region = optional_env("S3_REGION").or_else(|| {
            endpoint
                .as_ref()
                .map(|_| DEFAULT_CUSTOM_REGION.to_string())
        });

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }

        match (
            optional_env("S3_ACCESS_KEY_ID"),
            optional_env("S3_SECRET_ACCESS_KEY"),
        ) {
            (Some(access_key), Some(secret_key)) => {
                let creds = Credentials::new(access_key, secret_key, None, None, "bucket-sync-env");
                loader = loader.credentials_provider(creds);
            }
            (Some(_), None) => return Err(missing_env("S3_SECRET_ACCESS_KEY")),
            (None, Some(_)) => return Err(missing_env("S3_ACCESS_KEY_ID")),
            (None, None) => {}
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());

        if let Some(endpoint) = &endpoint {
            log::debug!("Using S3 endpoint {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        if let Some(force) = optional_env("S3_FORCE_PATH_STYLE") {
            builder = builder.force_path_style(parse_bool(&force));
        }

        Ok(Self::new(aws_sdk_s3::Client::from_conf(builder.build())))
    }

    /// Location constraint for `CreateBucket`, if the region needs one.
    fn location_constraint(&self) -> Option<CreateBucketConfiguration> {
        let region = self.client.config().region()?.as_ref();
        if region == "us-east-1" || region == DEFAULT_CUSTOM_REGION {
            return None;
        }
        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build(),
        )
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadBucketError::is_not_found)
                {
                    return Ok(false);
                }
                Err(StoreError::HeadBucket {
                    bucket: bucket.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<CreateBucketOutcome, StoreError> {
        let result = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.location_constraint())
            .send()
            .await;

        match result {
            Ok(_) => Ok(CreateBucketOutcome::Created),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) {
                    return Ok(CreateBucketOutcome::AlreadyExists);
                }
                Err(StoreError::CreateBucket {
                    bucket: bucket.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let put_error = |err: BoxError| StoreError::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: err,
        };

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| put_error(Box::new(e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type("application/octet-stream")
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| put_error(Box::new(e)))?;

        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        let get_error = |err: BoxError| StoreError::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: err,
        };

        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(GetObjectError::is_no_such_key)
                {
                    return Ok(None);
                }
                return Err(get_error(Box::new(err)));
            }
        };

        let meta = ObjectMeta {
            size: content_length(output.content_length()),
            etag: output.e_tag().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        };

        let mut body = output.body;
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = body.try_next().await.map_err(|e| get_error(Box::new(e)))? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(Some(meta))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(output) => Ok(Some(ObjectMeta {
                size: content_length(output.content_length()),
                etag: output.e_tag().map(str::to_string),
                metadata: output.metadata().cloned().unwrap_or_default(),
            })),
            Err(err) => {
                // NotFound means the object doesn't exist
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(StoreError::Head {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        log::debug!("Listing s3://{bucket}/{prefix}*");

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| StoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    objects.push(ObjectSummary {
                        key: key.to_string(),
                        size: content_length(obj.size()),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::debug!("  found {} objects", objects.len());
        Ok(objects)
    }
}

/// S3 reports lengths as `i64`; negative or missing means zero.
fn content_length(len: Option<i64>) -> u64 {
    len.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn missing_env(name: &str) -> StoreError {
    StoreError::MissingEnv {
        name: name.to_string(),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_lengths_clamp_to_zero() {
        assert_eq!(content_length(Some(-1)), 0);
        assert_eq!(content_length(None), 0);
        assert_eq!(content_length(Some(42)), 42);
    }

    #[test]
    fn parses_boolean_flags() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" YES "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
