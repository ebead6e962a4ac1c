// jirabackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::collections::VecDeque;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Archive body as it arrives from the network.
pub type ByteChunks = BoxStream<'static, std::io::Result<Bytes>>;

/// Destination for the downloaded archive.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Consumes `body` and stores it at `bucket/key`. Returns the number of bytes written.
    async fn put_stream(&self, bucket: &str, key: &str, body: ByteChunks) -> Result<u64>;
}

/// Streams into S3. Bodies smaller than one part go up with a single `PutObject`,
/// anything larger as a multipart upload with bounded parallelism.
pub struct S3ObjectSink {
    client: s3::Client,
    part_size: usize,
    max_concurrency: usize,
}

impl S3ObjectSink {
    pub fn new(sdk_config: &SdkConfig, storage: &StorageConfig) -> Self {
        Self::from_client(s3::Client::new(sdk_config), storage.part_size, storage.max_concurrency)
    }

    fn from_client(client: s3::Client, part_size: usize, max_concurrency: usize) -> Self {
        Self {
            client,
            part_size: part_size.max(1),
            max_concurrency: max_concurrency.max(1),
        }
    }

    async fn put_single(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(ARCHIVE_CONTENT_TYPE)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("PutObject of {size} bytes failed"))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        ready: VecDeque<Bytes>,
        splitter: PartSplitter,
        body: ByteChunks,
        read_so_far: u64,
    ) -> Result<u64> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(ARCHIVE_CONTENT_TYPE)
            .send()
            .await
            .map_err(sdk_error)
            .context("CreateMultipartUpload failed")?;
        let upload_id = created
            .upload_id()
            .context("CreateMultipartUpload returned no upload id")?
            .to_string();
        debug!(%bucket, %key, %upload_id, "multipart upload created");

        let target = UploadTarget {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        };

        match self.upload_parts(&target, ready, splitter, body, read_so_far).await {
            Ok(total) => Ok(total),
            Err(err) => {
                if let Err(abort_err) = target
                    .client
                    .abort_multipart_upload()
                    .bucket(&target.bucket)
                    .key(&target.key)
                    .upload_id(&target.upload_id)
                    .send()
                    .await
                {
                    warn!(
                        upload_id = %target.upload_id,
                        error = %DisplayErrorContext(abort_err),
                        "could not abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        target: &UploadTarget,
        mut ready: VecDeque<Bytes>,
        mut splitter: PartSplitter,
        mut body: ByteChunks,
        mut total: u64,
    ) -> Result<u64> {
        let mut in_flight: JoinSet<Result<CompletedPart>> = JoinSet::new();
        let mut completed = Vec::new();
        let mut part_number: i32 = 0;
        let mut exhausted = false;

        loop {
            while let Some(data) = ready.pop_front() {
                if in_flight.len() >= self.max_concurrency {
                    if let Some(joined) = in_flight.join_next().await {
                        completed.push(joined.context("upload task failed")??);
                    }
                }
                part_number += 1;
                in_flight.spawn(target.clone().upload_part(part_number, data));
            }
            if exhausted {
                break;
            }
            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("Failed to read archive stream")?;
                    total += chunk.len() as u64;
                    ready.extend(splitter.push(&chunk));
                }
                None => {
                    exhausted = true;
                    ready.extend(splitter.finish());
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            completed.push(joined.context("upload task failed")??);
        }
        completed.sort_by_key(|part| part.part_number());
        let parts = completed.len();

        target
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(&target.upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build())
            .send()
            .await
            .map_err(sdk_error)
            .context("CompleteMultipartUpload failed")?;

        info!(bucket = %target.bucket, key = %target.key, parts, "multipart upload completed");
        Ok(total)
    }
}

#[async_trait]
impl ObjectSink for S3ObjectSink {
    async fn put_stream(&self, bucket: &str, key: &str, mut body: ByteChunks) -> Result<u64> {
        let mut splitter = PartSplitter::new(self.part_size);
        let mut ready = VecDeque::new();
        let mut total: u64 = 0;

        // Read until one full part is buffered, or the body ends first.
        while ready.is_empty() {
            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("Failed to read archive stream")?;
                    total += chunk.len() as u64;
                    ready.extend(splitter.push(&chunk));
                }
                None => break,
            }
        }

        if ready.is_empty() {
            let data = splitter.finish().unwrap_or_default();
            self.put_single(bucket, key, data).await?;
            return Ok(total);
        }

        self.put_multipart(bucket, key, ready, splitter, body, total).await
    }
}

#[derive(Clone)]
struct UploadTarget {
    client: s3::Client,
    bucket: String,
    key: String,
    upload_id: String,
}

impl UploadTarget {
    async fn upload_part(self, part_number: i32, data: Bytes) -> Result<CompletedPart> {
        let size = data.len();
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("UploadPart {part_number} ({size} bytes) failed"))?;
        debug!(part_number, size, "part uploaded");

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }
}

/// Cuts an arbitrary chunk sequence into fixed-size parts; only the last part may be shorter.
struct PartSplitter {
    part_size: usize,
    pending: BytesMut,
}

impl PartSplitter {
    fn new(part_size: usize) -> Self {
        Self {
            part_size,
            pending: BytesMut::with_capacity(part_size),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        let mut parts = Vec::new();
        while self.pending.len() >= self.part_size {
            parts.push(self.pending.split_to(self.part_size).freeze());
        }
        parts
    }

    /// Hands out whatever is left once the body has ended.
    fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}

fn sdk_error<E>(err: E) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    anyhow::anyhow!("{}", DisplayErrorContext(err))
}
