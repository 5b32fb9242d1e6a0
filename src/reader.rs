// src/reader.rs
//
//! Random-access reads over a one-shot GET body.
//!
//! The object store hands back a single forward stream per GET, but the
//! protocol server issues `read_at` calls whose offsets may step slightly
//! backward (window re-reads, retransmits). [`ObjectReader`] bridges the
//! two with a sliding spool: bytes behind the cursor are retained up to
//! `lookback`, and forward progress pulls at least `min_chunk_size` bytes
//! per underlying read.

use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::store::ObjectBody;

struct ReaderState {
    body: Option<ObjectBody>,
    spooled: Vec<u8>,
    /// Absolute object offset of `spooled[0]`.
    spool_offset: usize,
    no_more: bool,
}

pub struct ObjectReader {
    token: CancellationToken,
    lookback: usize,
    min_chunk_size: usize,
    state: Mutex<ReaderState>,
}

impl ObjectReader {
    pub fn new(
        token: CancellationToken,
        body: ObjectBody,
        lookback: usize,
        min_chunk_size: usize,
    ) -> Self {
        Self {
            token,
            lookback,
            min_chunk_size,
            state: Mutex::new(ReaderState {
                body: Some(body),
                spooled: Vec::new(),
                spool_offset: 0,
                no_more: false,
            }),
        }
    }

    /// Read bytes at absolute object offset `off` into `buf`. Offsets below
    /// `spool_offset` fail with [`Error::OutOfRange`]; `Ok(0)` means end of
    /// object.
    pub async fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let mut state = self.state.lock().await;
        debug!(len = buf.len(), off, "read_at");

        let off = off as usize;
        if off < state.spool_offset {
            error!("supplied position is out of range");
            return Err(Error::OutOfRange);
        }

        let mut s = off - state.spool_offset;
        let mut i = 0;
        let mut r = buf.len();
        if s < state.spooled.len() {
            let n = r.min(state.spooled.len() - s);
            buf[i..i + n].copy_from_slice(&state.spooled[s..s + n]);
            i += n;
            s += n;
            r -= n;
        }
        if r == 0 {
            return Ok(i);
        }
        if state.no_more {
            return Ok(i);
        }

        debug!(
            s,
            spooled = state.spooled.len(),
            lookback = self.lookback,
            "read_at filling spool"
        );
        if s <= state.spooled.len() && s >= self.lookback {
            let drop_len = s - self.lookback;
            state.spooled.drain(..drop_len);
            state.spool_offset += drop_len;
            s = self.lookback;
        }

        let e = if state.spooled.len() + self.min_chunk_size < s + r {
            s + r
        } else {
            state.spooled.len() + self.min_chunk_size
        };
        let need = e - state.spooled.len();

        let body = match state.body.as_mut() {
            Some(body) => body,
            None => return Ok(i),
        };
        // The fill races session cancellation. On cancellation the read
        // future is dropped before this function returns, so the scratch
        // buffer is never observed after free.
        let mut scratch = vec![0u8; need];
        let (n, eof) = tokio::select! {
            _ = self.token.cancelled() => {
                debug!("read operation canceled");
                return Err(Error::Cancelled);
            }
            res = read_full(body, &mut scratch) => {
                res.map_err(Error::upstream)?
            }
        };
        if eof {
            state.no_more = true;
        }
        scratch.truncate(n);
        state.spooled.extend_from_slice(&scratch);

        let e = state.spooled.len();
        if s < e {
            let be = e.min(s + r);
            buf[i..i + (be - s)].copy_from_slice(&state.spooled[s..be]);
            return Ok(i + (be - s));
        }
        Ok(i)
    }

    /// Release the underlying body. Idempotent; further `read_at` calls see
    /// end of object.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.body.take().is_some() {
            debug!("closing download");
        }
        state.no_more = true;
    }
}

/// Read until `buf` is filled or the stream ends. A short count is
/// reported only together with EOF; I/O errors surface as-is.
async fn read_full(body: &mut ObjectBody, buf: &mut [u8]) -> std::io::Result<(usize, bool)> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = body.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok((filled, true));
        }
        filled += n;
    }
    Ok((filled, false))
}
