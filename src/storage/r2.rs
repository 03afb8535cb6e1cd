//! Cloudflare R2 provider over the S3 API.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};

use super::{
    public_url, suffixed_key, ListOptions, ListResult, ObjectEntry, PutOptions, PutResult,
    StorageBackend, StorageError, StoredObject, WriteCondition,
};
use crate::config::R2Config;

const PROVIDER: &str = "r2";

/// S3 error codes returned for a failed conditional write.
const PRECONDITION_CODES: &[&str] = &["PreconditionFailed", "ConditionalRequestConflict"];

pub struct R2Backend {
    client: Client,
    bucket: String,
    public_domain: String,
}

impl R2Backend {
    pub fn new(config: &R2Config, timeout: Duration) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            PROVIDER,
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            )
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_domain: config.public_domain.clone(),
        }
    }
}

/// Map an SDK failure, keeping precondition losses distinct.
fn map_sdk_error<E, R>(key: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let is_precondition = err
        .as_service_error()
        .and_then(|service| service.code())
        .is_some_and(|code| PRECONDITION_CODES.contains(&code));

    if is_precondition {
        return StorageError::PreconditionFailed {
            provider: PROVIDER,
            key: key.to_string(),
        };
    }

    tracing::error!("R2 request for {} failed: {:?}", key, err);
    StorageError::provider_error(PROVIDER, err)
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos()).unwrap_or_else(Utc::now)
}

#[async_trait]
impl StorageBackend for R2Backend {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn supports_conditional_put(&self) -> bool {
        true
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<PutResult, StorageError> {
        let key = if options.add_random_suffix {
            suffixed_key(key)
        } else {
            key.to_string()
        };

        // Public read is granted at the bucket/custom-domain level on R2, not per object.
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&options.content_type)
            .body(ByteStream::from(body));

        request = match &options.condition {
            Some(WriteCondition::IfMatch(etag)) => request.if_match(etag),
            Some(WriteCondition::IfAbsent) => request.if_none_match("*"),
            None if !options.allow_overwrite => request.if_none_match("*"),
            None => request,
        };

        let output = request.send().await.map_err(|e| map_sdk_error(&key, e))?;

        Ok(PutResult {
            url: public_url(&self.public_domain, &key),
            etag: output.e_tag().map(str::to_string),
            key,
        })
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(options.prefix.clone())
            .set_max_keys(options.limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
            .send()
            .await
            .map_err(|e| map_sdk_error(options.prefix.as_deref().unwrap_or(""), e))?;

        let entries = output
            .contents()
            .iter()
            .map(|object| {
                let key = object.key().unwrap_or_default().to_string();
                ObjectEntry {
                    url: public_url(&self.public_domain, &key),
                    modified_at: object
                        .last_modified()
                        .map(to_chrono)
                        .unwrap_or_else(Utc::now),
                    key,
                }
            })
            .collect();

        Ok(ListResult { entries })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    return Ok(None);
                }
                return Err(map_sdk_error(key, err));
            }
        };

        let etag = output.e_tag().map(str::to_string);
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::provider_error(PROVIDER, e))?
            .into_bytes()
            .to_vec();

        Ok(Some(StoredObject { body, etag }))
    }
}
