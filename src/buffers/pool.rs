use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::head::{MbufHeadMsg, MSG_TYPE_RAW};
use super::Mbuf;
use crate::error::{FlowError, FlowResult};

/// Upper bound on released data blocks kept around for reuse.
const MAX_CACHED_BLOCKS: usize = 64;

pub(crate) struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    live: AtomicUsize,
    limit: Option<usize>,
}

impl PoolShared {
    pub(crate) fn release(&self, mut data: Vec<u8>) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        data.clear();
        let mut free = self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < MAX_CACHED_BLOCKS {
            free.push(data);
        }
    }
}

/// Allocator behind every [`Mbuf`].
///
/// Tracks how many buffers are alive so leaks show up as a non-zero
/// `live_count()` once every owner has gone away.
pub struct MbufPool {
    shared: Arc<PoolShared>,
}

impl MbufPool {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Pool that refuses to hand out more than `limit` live buffers.
    pub fn with_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(limit: Option<usize>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(Vec::new()),
                live: AtomicUsize::new(0),
                limit,
            }),
        }
    }

    pub fn alloc(&self, len: usize) -> FlowResult<Mbuf> {
        let previous = self.shared.live.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.shared.limit {
            if previous >= limit {
                self.shared.live.fetch_sub(1, Ordering::SeqCst);
                return Err(FlowError::MemBufError);
            }
        }

        let mut data = self.shared.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();
        data.resize(len, 0);

        let mbuf = Mbuf::from_parts(data, self.shared.clone());
        mbuf.set_head_msg(&MbufHeadMsg::new(MSG_TYPE_RAW));
        Ok(mbuf)
    }

    /// Deep copy: new block with the same payload and private head.
    pub fn copy_from(&self, src: &Mbuf) -> FlowResult<Mbuf> {
        let mut dst = self.alloc(src.len())?;
        dst.data_mut()
            .ok_or(FlowError::MemBufError)?
            .copy_from_slice(src.data());
        dst.set_private_head(&src.private_head())?;
        Ok(dst)
    }

    pub fn live_count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.shared.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for MbufPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MbufPool {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
