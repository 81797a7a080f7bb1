//! In-memory [`ObjectStore`] that records every call, with failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::{StoreError, StoreOp};
use crate::s3::{ObjectStore, PartResult, StoreResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Put { key: String },
    Begin { key: String },
    UploadPart { upload_id: String, part_number: i32, len: usize },
    Complete { upload_id: String, part_numbers: Vec<i32> },
    Abort { key: String, upload_id: String },
    Delete { key: String },
    DeleteMany { keys: Vec<String> },
}

#[derive(Default)]
struct Failures {
    put: Option<String>,
    begin: Option<String>,
    parts: HashMap<i32, String>,
    complete: Option<String>,
    abort: Option<String>,
    delete: Option<String>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    objects: HashMap<String, Bytes>,
    sessions: HashMap<String, (String, BTreeMap<i32, Bytes>)>,
    completed: HashMap<String, Vec<i32>>,
    failures: Failures,
}

#[derive(Default)]
pub struct MemoryStore {
    next_upload: AtomicU64,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn fail_put(&self, message: &str) {
        self.lock().failures.put = Some(message.into());
    }

    pub fn fail_begin(&self, message: &str) {
        self.lock().failures.begin = Some(message.into());
    }

    pub fn fail_part(&self, part_number: i32, message: &str) {
        self.lock().failures.parts.insert(part_number, message.into());
    }

    pub fn fail_complete(&self, message: &str) {
        self.lock().failures.complete = Some(message.into());
    }

    pub fn fail_abort(&self, message: &str) {
        self.lock().failures.abort = Some(message.into());
    }

    pub fn fail_delete(&self, message: &str) {
        self.lock().failures.delete = Some(message.into());
    }

    pub fn insert(&self, key: &str, body: &'static [u8]) {
        self.lock().objects.insert(key.into(), Bytes::from_static(body));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.lock().calls.iter().filter(|call| pred(call)).cloned().collect()
    }

    pub fn abort_count(&self) -> usize {
        self.calls_matching(|call| matches!(call, Call::Abort { .. })).len()
    }

    /// Lengths of the parts uploaded for `upload_id`, in call order.
    pub fn part_lengths(&self, upload_id: &str) -> Vec<usize> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::UploadPart { upload_id: id, len, .. } if id == upload_id => Some(*len),
                _ => None,
            })
            .collect()
    }

    /// Part numbers sent with a successful completion of `upload_id`.
    pub fn completed_parts(&self, upload_id: &str) -> Option<Vec<i32>> {
        self.lock().completed.get(upload_id).cloned()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    pub fn object_len(&self, key: &str) -> Option<usize> {
        self.lock().objects.get(key).map(Bytes::len)
    }

    fn failure(op: StoreOp, message: &str) -> StoreError {
        StoreError::new(op, Some(500), message)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        _content_type: Option<&str>,
    ) -> Result<StoreResponse, StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Put { key: key.into() });
        if let Some(message) = &inner.failures.put {
            return Err(Self::failure(StoreOp::PutObject, message));
        }
        inner.objects.insert(key.into(), body);
        Ok(StoreResponse {
            key: Some(key.into()),
            ..Default::default()
        })
    }

    async fn begin_multipart(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Begin { key: key.into() });
        if let Some(message) = &inner.failures.begin {
            return Err(Self::failure(StoreOp::CreateMultipartUpload, message));
        }
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
        inner
            .sessions
            .insert(upload_id.clone(), (key.into(), BTreeMap::new()));
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        // Let sibling part tasks interleave with this one.
        tokio::task::yield_now().await;

        let mut inner = self.lock();
        inner.calls.push(Call::UploadPart {
            upload_id: upload_id.into(),
            part_number,
            len: body.len(),
        });
        if let Some(message) = inner.failures.parts.get(&part_number) {
            return Err(Self::failure(StoreOp::UploadPart, message));
        }
        let (_, parts) = inner.sessions.get_mut(upload_id).ok_or_else(|| {
            StoreError::new(StoreOp::UploadPart, Some(404), "NoSuchUpload")
        })?;
        parts.insert(part_number, body);
        Ok(format!("\"etag-{upload_id}-{part_number}\""))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<StoreResponse, StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Complete {
            upload_id: upload_id.into(),
            part_numbers: parts.iter().map(|part| part.part_number).collect(),
        });
        if let Some(message) = &inner.failures.complete {
            return Err(Self::failure(StoreOp::CompleteMultipartUpload, message));
        }

        let (_, uploaded) = inner.sessions.get(upload_id).ok_or_else(|| {
            StoreError::new(StoreOp::CompleteMultipartUpload, Some(404), "NoSuchUpload")
        })?;
        let expected: Vec<i32> = (1..=uploaded.len() as i32).collect();
        let listed: Vec<i32> = parts.iter().map(|part| part.part_number).collect();
        if listed != expected || uploaded.keys().copied().collect::<Vec<_>>() != expected {
            return Err(StoreError::new(
                StoreOp::CompleteMultipartUpload,
                Some(400),
                "InvalidPartOrder",
            ));
        }
        for part in parts {
            if part.etag != format!("\"etag-{upload_id}-{}\"", part.part_number) {
                return Err(StoreError::new(
                    StoreOp::CompleteMultipartUpload,
                    Some(400),
                    "InvalidPart",
                ));
            }
        }

        let (_, uploaded) = inner.sessions.remove(upload_id).unwrap_or_default();
        let mut object = BytesMut::new();
        for body in uploaded.values() {
            object.extend_from_slice(body);
        }
        inner.objects.insert(key.into(), object.freeze());
        inner.completed.insert(upload_id.into(), listed);
        Ok(StoreResponse {
            key: Some(key.into()),
            location: Some(format!("memory://{key}")),
            etag: Some(format!("\"{upload_id}-{}\"", parts.len())),
            ..Default::default()
        })
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Abort {
            key: key.into(),
            upload_id: upload_id.into(),
        });
        if let Some(message) = &inner.failures.abort {
            return Err(Self::failure(StoreOp::AbortMultipartUpload, message));
        }
        inner.sessions.remove(upload_id);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Delete { key: key.into() });
        if let Some(message) = &inner.failures.delete {
            return Err(Self::failure(StoreOp::DeleteObject, message));
        }
        inner.objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteMany { keys: keys.to_vec() });
        if let Some(message) = &inner.failures.delete {
            return Err(Self::failure(StoreOp::DeleteObjects, message));
        }
        for key in keys {
            inner.objects.remove(key);
        }
        Ok(())
    }
}
