//! Multipart upload orchestration.
//!
//! A payload is split into parts that are uploaded concurrently, then
//! committed with a single completion call. Once a session has begun it is
//! always finished with exactly one of complete or abort.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{SessionAbortError, StoreError, StoreOp};
use crate::s3::{ObjectStore, PartResult, StoreResponse, UploadTarget};

/// Smallest size any non-final part may have (100 MiB).
pub const MIN_PART_SIZE: usize = 100 * 1024 * 1024;

/// Number of parts the sizing aims for before the minimum kicks in.
pub const TARGET_PARTS: usize = 100;

const UPLOAD_SUCCESS: &str = "Upload success!";
const UPLOAD_FAILED: &str = "Multipart file uploading is failed!";

/// How a payload is cut into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPolicy {
    pub min_part_size: usize,
    pub target_parts: usize,
}

impl Default for PartPolicy {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE,
            target_parts: TARGET_PARTS,
        }
    }
}

impl PartPolicy {
    /// `max(ceil(total / target_parts), min_part_size)`, never zero.
    pub fn part_size(&self, total: usize) -> usize {
        total
            .div_ceil(self.target_parts.max(1))
            .max(self.min_part_size)
            .max(1)
    }

    /// Byte ranges of each part, in part order. An empty payload is a single
    /// empty part.
    pub fn plan(&self, total: usize) -> Vec<Range<usize>> {
        let part_size = self.part_size(total);
        let num_parts = total.div_ceil(part_size).max(1);
        (0..num_parts)
            .map(|index| {
                let start = index * part_size;
                start..(start + part_size).min(total)
            })
            .collect()
    }
}

/// Final result of [`MultipartUploader::upload_large`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StoreResponse>,
}

impl UploadOutcome {
    fn completed(data: StoreResponse) -> Self {
        Self {
            success: true,
            message: UPLOAD_SUCCESS.to_owned(),
            data: Some(data),
        }
    }

    fn failed(err: &StoreError) -> Self {
        let message = if err.message.trim().is_empty() {
            UPLOAD_FAILED.to_owned()
        } else {
            err.message.clone()
        };
        Self {
            success: false,
            message,
            data: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Begun,
    Completed,
    Aborted,
}

/// A store-side multipart session. Only exists once the store handed out an
/// upload id; `complete` and `abort` consume it.
#[derive(Debug)]
pub struct MultipartSession {
    upload_id: String,
    key: String,
    parts: Vec<PartResult>,
    state: SessionState,
}

impl MultipartSession {
    async fn begin(
        store: &dyn ObjectStore,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<Self, StoreError> {
        let upload_id = store.begin_multipart(key, content_type).await?;
        Ok(Self {
            upload_id,
            key: key.to_owned(),
            parts: Vec::new(),
            state: SessionState::Begun,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn record(&mut self, mut parts: Vec<PartResult>) {
        parts.sort_by_key(|part| part.part_number);
        self.parts = parts;
    }

    async fn complete(
        mut self,
        store: &dyn ObjectStore,
    ) -> Result<StoreResponse, (Self, StoreError)> {
        match store
            .complete_multipart(&self.key, &self.upload_id, &self.parts)
            .await
        {
            Ok(response) => {
                self.state = SessionState::Completed;
                Ok(response)
            }
            Err(err) => Err((self, err)),
        }
    }

    async fn abort(mut self, store: &dyn ObjectStore) -> Result<SessionState, SessionAbortError> {
        let result = store.abort_multipart(&self.key, &self.upload_id).await;
        // The id is spent either way; a failed abort is never retried here.
        self.state = SessionState::Aborted;
        result
            .map(|()| self.state)
            .map_err(|source| SessionAbortError {
                key: self.key,
                upload_id: self.upload_id,
                source,
            })
    }
}

/// Drives large uploads through the begin / upload parts / complete protocol.
#[derive(Clone)]
pub struct MultipartUploader {
    store: Arc<dyn ObjectStore>,
    policy: PartPolicy,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_policy(store, PartPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn ObjectStore>, policy: PartPolicy) -> Self {
        Self { store, policy }
    }

    /// Uploads `target` as a multipart object. Failures are reported in the
    /// outcome; any session that was opened is aborted before returning.
    pub async fn upload_large(&self, target: UploadTarget) -> UploadOutcome {
        let start_time = Instant::now();
        let store = self.store.as_ref();

        let content_type = target.content_type.as_deref();
        let mut session = match MultipartSession::begin(store, &target.key, content_type).await {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    key = %target.key,
                    status_code = ?err.status_code,
                    error = %err,
                    "could not begin multipart upload"
                );
                return UploadOutcome::failed(&err);
            }
        };
        debug!(
            key = %target.key,
            upload_id = session.upload_id(),
            state = ?session.state(),
            size = target.body.len(),
            "multipart upload begun"
        );

        let failure = match self.upload_parts(&session, &target.body).await {
            Ok(parts) => {
                session.record(parts);
                match session.complete(store).await {
                    Ok(response) => {
                        info!(
                            key = %target.key,
                            size = target.body.len(),
                            elapsed = ?start_time.elapsed(),
                            "multipart upload complete"
                        );
                        return UploadOutcome::completed(response);
                    }
                    Err((unfinished, err)) => {
                        session = unfinished;
                        err
                    }
                }
            }
            Err(err) => err,
        };

        warn!(
            key = %target.key,
            upload_id = session.upload_id(),
            status_code = ?failure.status_code,
            error = %failure,
            "multipart upload failed, aborting"
        );
        match session.abort(store).await {
            Ok(state) => debug!(key = %target.key, ?state, "multipart session released"),
            Err(abort_err) => warn!(
                status_code = ?abort_err.source.status_code,
                error = %abort_err,
                "abort after failed multipart upload also failed"
            ),
        }
        UploadOutcome::failed(&failure)
    }

    /// Uploads every part concurrently and waits for all of them. When parts
    /// fail, the lowest-numbered failure is returned.
    async fn upload_parts(
        &self,
        session: &MultipartSession,
        body: &Bytes,
    ) -> Result<Vec<PartResult>, StoreError> {
        let mut tasks = JoinSet::new();
        for (index, range) in self.policy.plan(body.len()).into_iter().enumerate() {
            let part_number = index as i32 + 1;
            let store = Arc::clone(&self.store);
            let key = session.key.clone();
            let upload_id = session.upload_id.clone();
            let chunk = body.slice(range);
            tasks.spawn(async move {
                let result = store.upload_part(&key, &upload_id, part_number, chunk).await;
                (part_number, result)
            });
        }

        let mut parts = Vec::with_capacity(tasks.len());
        let mut failure: Option<(i32, StoreError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (part_number, result) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    let err = StoreError::new(
                        StoreOp::UploadPart,
                        None,
                        format!("part upload task did not finish: {join_err}"),
                    );
                    if failure.is_none() {
                        failure = Some((i32::MAX, err));
                    }
                    continue;
                }
            };
            match result {
                Ok(etag) => {
                    debug!(part_number, "uploaded part");
                    parts.push(PartResult { part_number, etag });
                }
                Err(err) => {
                    warn!(
                        part_number,
                        status_code = ?err.status_code,
                        error = %err,
                        "part upload failed"
                    );
                    if failure.as_ref().map_or(true, |(first, _)| part_number < *first) {
                        failure = Some((part_number, err));
                    }
                }
            }
        }

        match failure {
            Some((_, err)) => Err(err),
            None => Ok(parts),
        }
    }
}
