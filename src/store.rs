use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use rusoto_s3::{
    DeleteObjectRequest, GetObjectRequest, PutObjectRequest, S3Client, StreamingBody, S3,
};

use crate::errors::RecorderError;

pub mod mock;

/// Remote storage for audio blobs, addressed by key.
pub trait BlobStore: Send + Sync {
    /// Saves the given data under the given key.
    fn upload(
        &self,
        key: &str,
        content_type: String,
        raw: Bytes,
    ) -> BoxFuture<Result<(), RecorderError>>;

    /// Retrieves the data saved under the given key.
    fn download(&self, key: &str) -> BoxFuture<Result<Bytes, RecorderError>>;

    /// Deletes the given object.
    fn delete(&self, key: &str) -> BoxFuture<Result<(), RecorderError>>;
}

/// A store that saves its data to an S3-compatible bucket.
pub struct S3Store {
    client: Arc<S3Client>,
    bucket: String,
}

impl S3Store {
    /// Creates a new instance.
    pub fn new(client: Arc<S3Client>, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub fn from_env() -> Result<Self, RecorderError> {
        use rusoto_core::request::HttpClient;
        use rusoto_core::Region;
        use rusoto_credential::StaticProvider;

        use crate::config::{get_optional, get_variable};

        let access_key = get_variable("S3_ACCESS_KEY")?;
        let secret_access_key = get_variable("S3_SECRET_ACCESS_KEY")?;

        let region = Region::Custom {
            name: get_variable("S3_REGION_NAME")?,
            endpoint: get_variable("S3_ENDPOINT")?,
        };

        let bucket = get_optional("S3_BUCKET_NAME").unwrap_or_else(|| "recordings".to_owned());

        let http_client = HttpClient::new().map_err(|e| RecorderError::S3ClientFailed {
            message: e.to_string(),
        })?;

        let client = Arc::new(S3Client::new_with(
            http_client,
            StaticProvider::new_minimal(access_key, secret_access_key),
            region,
        ));

        Ok(S3Store::new(client, bucket))
    }
}

impl BlobStore for S3Store {
    fn upload(
        &self,
        key: &str,
        content_type: String,
        raw: Bytes,
    ) -> BoxFuture<Result<(), RecorderError>> {
        upload(self, key.to_owned(), content_type, raw).boxed()
    }

    fn download(&self, key: &str) -> BoxFuture<Result<Bytes, RecorderError>> {
        download(self, key.to_owned()).boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<Result<(), RecorderError>> {
        delete(self, key.to_owned()).boxed()
    }
}

async fn upload(
    store: &S3Store,
    key: String,
    content_type: String,
    raw: Bytes,
) -> Result<(), RecorderError> {
    use std::convert::TryFrom;

    let len = i64::try_from(raw.len()).ok();

    let request = PutObjectRequest {
        body: Some(StreamingBody::from(raw.to_vec())),
        bucket: store.bucket.clone(),
        content_length: len,
        content_type: Some(content_type),
        key,
        ..Default::default()
    };

    let result = store.client.put_object(request).await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(RecorderError::UploadFailed { source: e }),
    }
}

async fn download(store: &S3Store, key: String) -> Result<Bytes, RecorderError> {
    use tokio::io::AsyncReadExt;

    let request = GetObjectRequest {
        bucket: store.bucket.clone(),
        key: key.clone(),
        ..Default::default()
    };

    let output = store
        .client
        .get_object(request)
        .await
        .map_err(|source| RecorderError::DownloadFailed { source })?;

    let body = output
        .body
        .ok_or_else(|| RecorderError::EmptyDownload { key: key.clone() })?;

    let mut raw = vec![];
    body.into_async_read()
        .read_to_end(&mut raw)
        .await
        .map_err(|source| RecorderError::DownloadBodyFailed { key, source })?;

    Ok(Bytes::from(raw))
}

async fn delete(store: &S3Store, key: String) -> Result<(), RecorderError> {
    let request = DeleteObjectRequest {
        bucket: store.bucket.clone(),
        key,
        ..Default::default()
    };

    let result = store.client.delete_object(request).await;

    result
        .map(|_| ())
        .map_err(|source| RecorderError::DeleteFailed { source })
}
