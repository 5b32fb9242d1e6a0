// src/multipart.rs
//
//! Random-access multipart upload.
//!
//! The protocol server delivers `write_at` fragments at arbitrary offsets;
//! this module maps them onto fixed-size parts backed by pool buffers.
//! A part that becomes full is handed to the upload workers over the part
//! channel; `close` flushes the trailing part, waits for the in-flight
//! uploads, and finalizes as either a single PutObject (one part, no
//! multipart transaction) or CompleteMultipartUpload. Any failure aborts
//! the multipart upload exactly once and releases every part buffer back
//! to the pool.
//!
//! The first part is held back while it is the only one: an upload that
//! never grows past one part finalizes as a plain PutObject and the
//! multipart transaction is never opened. The first touch of a second
//! part flushes it to the workers.
//!
//! Locking: the writer mutex guards the part/completed vectors, the upload
//! id and the sticky error; each part's own mutex guards its content,
//! coverage and state. Acquisition order is always writer, then part.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ServerSideEncryptionConfig;
use crate::error::{Error, Result};
use crate::memory::MemoryBufferPool;
use crate::phantom::{PhantomObjectInfo, PhantomObjectMap};
use crate::ranges::OffsetRanges;
use crate::store::{CompletedPartInfo, ObjectStore};

/// Lifecycle of one part. The state only ever advances; each of the three
/// terminal states releases the part's buffer exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartUploadState {
    /// Accumulating `write_at` fragments.
    Adding,
    /// Complete (or selected as the trailing part at close).
    Full,
    /// Uploaded; ETag recorded.
    Sent,
    /// Upload call failed.
    ErrorSending,
    /// Writer failed before this part was filled.
    Cancelled,
}

struct PartCell {
    content: Option<Vec<u8>>,
    ranges: OffsetRanges,
    state: PartUploadState,
    /// Already handed to the workers; guards against double enqueue.
    queued: bool,
}

/// One fixed-size fragment of the object, owning a pool buffer while live.
pub struct PartToUpload {
    part_number: i32,
    cell: StdMutex<PartCell>,
}

/// A part's buffer taken out for an object-store call.
struct TakenContent {
    buffer: Vec<u8>,
    /// Contiguous-from-zero byte count, or `None` when offset 0 is not
    /// covered (the content is unusable).
    valid: Option<usize>,
}

impl PartToUpload {
    fn new(part_number: i32, buffer: Vec<u8>, part_size: i64) -> Self {
        Self {
            part_number,
            cell: StdMutex::new(PartCell {
                content: Some(buffer),
                ranges: OffsetRanges::new(part_size),
                state: PartUploadState::Adding,
                queued: false,
            }),
        }
    }

    pub fn part_number(&self) -> i32 {
        self.part_number
    }

    pub fn state(&self) -> PartUploadState {
        self.lock().state
    }

    /// Copy `src` into the part at `[start, end)` and record coverage.
    /// Returns true when this call completed the part (exactly one caller
    /// observes the Adding -> Full transition).
    fn copy_into(&self, src: &[u8], start: i64, end: i64) -> bool {
        let mut cell = self.lock();
        if cell.state >= PartUploadState::Full {
            warn!(partnumber = self.part_number, "trying to add more data to an already full part");
            return false;
        }
        let content = cell
            .content
            .as_mut()
            .expect("part in Adding state always owns its buffer");
        content[start as usize..end as usize].copy_from_slice(src);
        cell.ranges.add(start, end);
        if cell.ranges.is_full() {
            cell.state = PartUploadState::Full;
            true
        } else {
            false
        }
    }

    /// Claim a Full, not-yet-queued part for enqueueing. At most one caller
    /// ever gets `true` for a given part.
    fn claim_if_full(&self) -> bool {
        let mut cell = self.lock();
        if cell.state == PartUploadState::Full && !cell.queued {
            cell.queued = true;
            true
        } else {
            false
        }
    }

    /// Close-time claim for the trailing part: an Adding part is promoted
    /// to Full first. Same at-most-once guarantee as `claim_if_full`.
    fn claim_for_close(&self) -> bool {
        let mut cell = self.lock();
        if cell.state == PartUploadState::Adding {
            cell.state = PartUploadState::Full;
        }
        if cell.state == PartUploadState::Full && !cell.queued {
            cell.queued = true;
            true
        } else {
            false
        }
    }

    /// Take the buffer out for upload. `Err` means the part was not in the
    /// Full state (its buffer stays where it is).
    fn take_content(&self) -> std::result::Result<TakenContent, PartUploadState> {
        let mut cell = self.lock();
        if cell.state != PartUploadState::Full {
            return Err(cell.state);
        }
        let buffer = cell
            .content
            .take()
            .expect("full part always owns its buffer");
        let end = cell.ranges.get_max_valid_offset();
        let valid = if end < 0 { None } else { Some(end as usize) };
        Ok(TakenContent { buffer, valid })
    }

    fn set_state(&self, state: PartUploadState) {
        self.lock().state = state;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PartCell> {
        self.cell.lock().expect("part lock poisoned")
    }
}

/// Per-writer count of parts handed to the workers and not yet finished.
#[derive(Default)]
struct UploadGroup {
    count: StdMutex<usize>,
    notify: Notify,
}

impl UploadGroup {
    fn add(&self, n: usize) {
        *self.count.lock().expect("upload group lock poisoned") += n;
    }

    fn done(&self) {
        let mut count = self.count.lock().expect("upload group lock poisoned");
        *count -= 1;
        if *count == 0 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if *self.count.lock().expect("upload group lock poisoned") == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct WriterState {
    parts: Vec<Option<Arc<PartToUpload>>>,
    /// Aligned 1:1 with `parts` by index; only Sent slots are populated.
    completed: Vec<Option<CompletedPartInfo>>,
    upload_id: Option<String>,
    err: Option<Error>,
}

struct WriterShared {
    token: CancellationToken,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    sse: ServerSideEncryptionConfig,
    max_object_size: i64,
    pool: Arc<MemoryBufferPool>,
    phantoms: Arc<PhantomObjectMap>,
    info: Arc<PhantomObjectInfo>,
    upload_tx: mpsc::Sender<UploadJob>,
    group: UploadGroup,
    state: Mutex<WriterState>,
}

impl WriterShared {
    /// Current object key (renames of the phantom move it).
    fn key(&self) -> String {
        self.info.snapshot().key.to_string()
    }

    /// Abort the multipart upload if one was created. Taking the id first
    /// makes the abort happen at most once; the abort result is only
    /// logged, as in every failure path.
    async fn abort_upload(&self, state: &mut WriterState) {
        if let Some(upload_id) = state.upload_id.take() {
            let key = self.key();
            debug!(uploadid = %upload_id, key = %key, "AbortMultipartUpload");
            if let Err(err) = self
                .store
                .abort_multipart_upload(&self.bucket, &key, &upload_id)
                .await
            {
                error!(exception = %err, "error aborting multipart upload");
            }
        }
    }

    /// Cancel every part still accumulating, returning its buffer to the
    /// pool, and count the gaps: cancelled parts plus part slots no write
    /// ever touched. A full part that still owns its buffer releases it
    /// here too without counting as a gap (the write pattern covered it):
    /// either it was held back for the PutObject fast path, or its job is
    /// stranded in the channel and no worker will drain it. A worker that
    /// does pick such a job up later finds the part Cancelled and
    /// discards it, so the buffer is returned exactly once either way.
    fn cancel_adding_parts(&self, state: &mut WriterState) -> usize {
        let mut pending = 0;
        for slot in state.parts.iter().rev() {
            match slot {
                None => pending += 1,
                Some(part) => {
                    let mut cell = part.lock();
                    match cell.state {
                        PartUploadState::Adding => {
                            if let Some(buffer) = cell.content.take() {
                                self.pool.put(buffer);
                            }
                            cell.state = PartUploadState::Cancelled;
                            pending += 1;
                        }
                        PartUploadState::Full => {
                            if let Some(buffer) = cell.content.take() {
                                self.pool.put(buffer);
                                cell.state = PartUploadState::Cancelled;
                            }
                            // content None: a worker owns the buffer and
                            // will return it itself
                        }
                        _ => {}
                    }
                }
            }
        }
        pending
    }

    /// Record `err` as the writer failure (first error wins), abort the
    /// multipart upload and drop unfinished parts. Returns the error to
    /// hand to the caller.
    async fn fail(&self, state: &mut WriterState, err: Error) -> Error {
        error!(exception = %err, "write failed");
        self.abort_upload(state).await;
        self.cancel_adding_parts(state);
        state.err.get_or_insert(err.clone());
        err
    }

    /// Hand a claimed part to the workers, creating the multipart upload
    /// on first use. Blocks on the channel when all workers are busy;
    /// session cancellation aborts the wait. A part whose send never
    /// completes is discarded here so its buffer goes back to the pool
    /// (the claim already marked it queued, so nothing else reclaims it).
    ///
    /// The upload id travels inside the job: a worker must never take the
    /// writer lock before returning its buffer to the pool, or it would
    /// deadlock against a `write_at` holding the lock across `pool.get`.
    async fn enqueue_upload(self: &Arc<Self>, part: Arc<PartToUpload>) -> Result<()> {
        let upload_id = {
            let mut state = self.state.lock().await;
            if state.upload_id.is_none() {
                let key = self.key();
                debug!(key = %key, "CreateMultipartUpload");
                let upload_id = self
                    .store
                    .create_multipart_upload(&self.bucket, &key, &self.sse)
                    .await?;
                debug!(uploadid = %upload_id, "multipart upload created");
                state.upload_id = Some(upload_id);
            }
            state.upload_id.clone().expect("upload id was just ensured")
        };

        debug!(partnumber = part.part_number, "enqueuing part to be uploaded");
        self.group.add(1);
        let job = UploadJob {
            writer: Arc::clone(self),
            part: Arc::clone(&part),
            upload_id,
        };
        tokio::select! {
            _ = self.token.cancelled() => {
                debug!("enqueue upload cancelled");
                self.group.done();
                self.discard_unsent_part(&part);
                Err(Error::Cancelled)
            }
            sent = self.upload_tx.send(job) => {
                if sent.is_err() {
                    self.group.done();
                    self.discard_unsent_part(&part);
                    return Err(Error::UploadFailure("upload workers stopped".to_string()));
                }
                Ok(())
            }
        }
    }

    /// Reclaim a claimed part that never reached a worker: return its
    /// buffer and mark it Cancelled.
    fn discard_unsent_part(&self, part: &PartToUpload) {
        if let Ok(taken) = part.take_content() {
            self.pool.put(taken.buffer);
            part.set_state(PartUploadState::Cancelled);
        }
    }
}

/// Random-access upload writer handed to the protocol server.
pub struct MultipartUploadWriter {
    shared: Arc<WriterShared>,
}

impl MultipartUploadWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        token: CancellationToken,
        store: Arc<dyn ObjectStore>,
        bucket: String,
        sse: ServerSideEncryptionConfig,
        max_object_size: i64,
        pool: Arc<MemoryBufferPool>,
        phantoms: Arc<PhantomObjectMap>,
        info: Arc<PhantomObjectInfo>,
        upload_tx: mpsc::Sender<UploadJob>,
    ) -> Self {
        Self {
            shared: Arc::new(WriterShared {
                token,
                store,
                bucket,
                sse,
                max_object_size,
                pool,
                phantoms,
                info,
                upload_tx,
                group: UploadGroup::default(),
                state: Mutex::new(WriterState {
                    parts: Vec::new(),
                    completed: Vec::new(),
                    upload_id: None,
                    err: None,
                }),
            }),
        }
    }

    /// Notification hook for protocol-level transfer errors.
    pub fn transfer_error(&self, err: &(dyn std::error::Error + 'static)) {
        debug!(exception = %err, "transfer error");
    }

    /// Store `buf` at absolute object offset `off`. Fragments may arrive
    /// in any order; a part whose coverage becomes complete is enqueued
    /// for upload (the lone first part is held back for the PutObject fast
    /// path). Errors are sticky: after the first failure every call
    /// returns the same error.
    pub async fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        let u = &self.shared;
        if buf.is_empty() {
            return Ok(0);
        }

        let off = off as i64;
        let mut pending = buf.len() as i64;
        let off_final = off + pending;
        let part_size = u.pool.buf_size() as i64;
        let part_number_initial = off / part_size;
        let part_offset_initial = off % part_size;
        let part_number_final = ((off + pending - 1) / part_size) as usize;

        let deferred_first = {
            let mut state = u.state.lock().await;
            if let Some(err) = state.err.clone() {
                return Err(u.fail(&mut state, err).await);
            }
            if u.max_object_size >= 0 && off_final > u.max_object_size {
                let err = Error::TooLarge(u.max_object_size);
                return Err(u.fail(&mut state, err).await);
            }
            debug!(
                len = buf.len(),
                off,
                part_number_initial,
                part_offset_initial,
                "write_at"
            );
            u.info.set_size_if_greater(off_final);
            if state.parts.len() <= part_number_final {
                state.parts.resize(part_number_final + 1, None);
            }
            // The upload now spans more than one part; a held-back full
            // first part must go to the workers.
            if part_number_final >= 1 {
                state.parts[0].clone()
            } else {
                None
            }
        };
        if let Some(first) = deferred_first {
            if first.claim_if_full() {
                if let Err(err) = u.enqueue_upload(first).await {
                    let mut state = u.state.lock().await;
                    return Err(u.fail(&mut state, err).await);
                }
            }
        }

        let mut part_number = part_number_initial as usize;
        let mut part_offset = part_offset_initial;
        let mut buf_offset = 0usize;
        while pending > 0 {
            let part = {
                let mut state = u.state.lock().await;
                if let Some(part) = state.parts[part_number].clone() {
                    part
                } else {
                    debug!("getting memory buffer from pool");
                    let buffer = match u.pool.get(&u.token).await {
                        Ok(buffer) => buffer,
                        Err(err) => return Err(u.fail(&mut state, err).await),
                    };
                    let part = Arc::new(PartToUpload::new(
                        part_number as i32 + 1,
                        buffer,
                        part_size,
                    ));
                    state.parts[part_number] = Some(Arc::clone(&part));
                    part
                }
            };

            let part_offset_final = (part_offset + pending).min(part_size);
            let part_copied = (part_offset_final - part_offset) as usize;
            let became_full = part.copy_into(
                &buf[buf_offset..buf_offset + part_copied],
                part_offset,
                part_offset_final,
            );
            if became_full {
                let hold_back = {
                    let state = u.state.lock().await;
                    part.part_number == 1
                        && state.parts.len() == 1
                        && state.upload_id.is_none()
                };
                if !hold_back && part.claim_if_full() {
                    if let Err(err) = u.enqueue_upload(part).await {
                        let mut state = u.state.lock().await;
                        return Err(u.fail(&mut state, err).await);
                    }
                }
            }

            part_number += 1;
            pending -= part_copied as i64;
            buf_offset += part_copied;
            part_offset = 0;
        }
        Ok(buf.len())
    }

    /// Finalize the upload. The phantom entry is removed first so listings
    /// and stat cannot observe a completed key as still uploading.
    pub async fn close(&self) -> Result<()> {
        let u = &self.shared;
        debug!("MultipartUploadWriter.close");

        u.phantoms.remove_by_info_ptr(&u.info);

        let mut state = u.state.lock().await;
        let mut err = state.err.clone();

        if err.is_none() {
            if state.upload_id.is_none() && state.parts.len() <= 1 {
                // Single part (or empty object): one PutObject, no
                // multipart transaction.
                err = self.put_single_object(&mut state).await.err();
            } else {
                let trailing = state.parts.last().and_then(Clone::clone);
                drop(state);

                let mut enqueue_err = None;
                if let Some(part) = trailing {
                    if part.claim_for_close() {
                        enqueue_err = u.enqueue_upload(part).await.err();
                    }
                }
                u.group.wait().await;

                state = u.state.lock().await;
                err = enqueue_err;
                if err.is_none() {
                    let pending = u.cancel_adding_parts(&mut state);
                    if pending > 0 {
                        err = Some(Error::UploadFailure(format!(
                            "closing upload with {pending} pending parts to fill"
                        )));
                    } else {
                        err = state.err.clone();
                        if err.is_none() {
                            err = self.complete_upload(&mut state).await.err();
                        }
                    }
                }
            }
        }

        if let Some(err) = err {
            debug!(exception = %err, "error closing upload");
            u.abort_upload(&mut state).await;
            u.cancel_adding_parts(&mut state);
            state.err.get_or_insert(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Fast path: PUT the only part's contiguous prefix as a whole object.
    async fn put_single_object(&self, state: &mut WriterState) -> Result<()> {
        let u = &self.shared;
        let key = u.key();

        let Some(part) = state.parts.first().and_then(Clone::clone) else {
            // No write ever arrived: materialize an empty object.
            debug!(key = %key, "PutObject (empty)");
            return u.store.put_object(&u.bucket, &key, &[], &u.sse).await;
        };

        part.claim_for_close();
        let taken = part
            .take_content()
            .expect("single part is Full and unqueued at close");
        match taken.valid {
            Some(end) => {
                debug!(key = %key, len = end, "PutObject");
                let result = u
                    .store
                    .put_object(&u.bucket, &key, &taken.buffer[..end], &u.sse)
                    .await;
                u.pool.put(taken.buffer);
                match result {
                    Ok(()) => {
                        part.set_state(PartUploadState::Sent);
                        Ok(())
                    }
                    Err(err) => {
                        part.set_state(PartUploadState::ErrorSending);
                        Err(err)
                    }
                }
            }
            None => {
                u.pool.put(taken.buffer);
                part.set_state(PartUploadState::ErrorSending);
                Err(Error::UploadFailure(format!(
                    "trying to obtain content of incomplete part {}",
                    part.part_number
                )))
            }
        }
    }

    async fn complete_upload(&self, state: &mut WriterState) -> Result<()> {
        let u = &self.shared;
        let Some(upload_id) = state.upload_id.clone() else {
            return Err(Error::UploadFailure(
                "multipart upload was never created".to_string(),
            ));
        };
        let parts: Vec<CompletedPartInfo> = state.completed.iter().flatten().cloned().collect();
        let key = u.key();
        debug!(uploadid = %upload_id, key = %key, parts = parts.len(), "CompleteMultipartUpload");
        u.store
            .complete_multipart_upload(&u.bucket, &key, &upload_id, &parts)
            .await?;
        // A successful complete must never be followed by an abort.
        state.upload_id = None;
        Ok(())
    }
}

/// One unit of work for the upload workers.
pub struct UploadJob {
    writer: Arc<WriterShared>,
    part: Arc<PartToUpload>,
    upload_id: String,
}

/// Fixed-size fan-out of workers draining the part channel. The channel
/// holds a single job: when every worker is busy, the producing `write_at`
/// blocks on the send, which together with the bounded pool caps upload
/// memory at `pool_capacity * part_size`.
pub struct UploadWorkers {
    handles: Vec<tokio::task::JoinHandle<()>>,
    // Keeps the channel open for the pool's whole lifetime, so producers
    // block on a saturated channel instead of erroring once workers exit.
    _rx: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
}

impl UploadWorkers {
    /// Spawn `workers` tasks and return the channel producers write into.
    pub fn start(token: CancellationToken, workers: usize) -> (Self, mpsc::Sender<UploadJob>) {
        let (tx, rx) = mpsc::channel::<UploadJob>(1);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                debug!(worker, "waiting for upload jobs");
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = token.cancelled() => {
                                debug!(worker, "worker ended");
                                return;
                            }
                            job = rx.recv() => match job {
                                Some(job) => job,
                                None => {
                                    debug!(worker, "upload channel closed");
                                    return;
                                }
                            },
                        }
                    };
                    upload_part(job).await;
                }
            }));
        }
        (Self { handles, _rx: rx }, tx)
    }

    /// Wait for every worker to exit (after cancelling their token or
    /// dropping all senders).
    pub async fn wait_for_completion(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Upload one claimed part: take its buffer, upload the covered prefix,
/// return the buffer to the pool, record the ETag (or the writer error)
/// and signal the writer's upload group.
async fn upload_part(job: UploadJob) {
    let u = job.writer;
    let part = job.part;

    let taken = match part.take_content() {
        Ok(taken) => taken,
        Err(state) => {
            warn!(partnumber = part.part_number, ?state, "invalid part state");
            u.group.done();
            return;
        }
    };

    let result = match taken.valid {
        Some(end) => {
            let key = u.key();
            u.store
                .upload_part(
                    &u.bucket,
                    &key,
                    &job.upload_id,
                    part.part_number,
                    &taken.buffer[..end],
                    &u.sse,
                )
                .await
        }
        None => Err(Error::UploadFailure(format!(
            "trying to obtain content of incomplete part {}",
            part.part_number
        ))),
    };
    u.pool.put(taken.buffer);

    match result {
        Ok(etag) => {
            let mut state = u.state.lock().await;
            let idx = (part.part_number - 1) as usize;
            if state.completed.len() <= idx {
                state.completed.resize(idx + 1, None);
            }
            state.completed[idx] = Some(CompletedPartInfo {
                part_number: part.part_number,
                etag,
            });
            drop(state);
            part.set_state(PartUploadState::Sent);
        }
        Err(err) => {
            error!(exception = %err, partnumber = part.part_number, "error uploading part");
            part.set_state(PartUploadState::ErrorSending);
            let mut state = u.state.lock().await;
            state.err.get_or_insert(err);
        }
    }
    u.group.done();
}
