use std::fmt;
use std::sync::{Arc, Mutex};

use super::head::{MbufHeadMsg, HEAD_MSG_OFFSET, MBUF_HEAD_MAX_SIZE};
use super::pool::PoolShared;
use crate::error::{FlowError, FlowResult};

struct MbufBlock {
    head: Mutex<[u8; MBUF_HEAD_MAX_SIZE]>,
    data: Vec<u8>,
    pool: Arc<PoolShared>,
}

impl Drop for MbufBlock {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.data));
    }
}

/// Owned handle to a driver buffer.
///
/// Move-only: there is no `Clone`. Sharing the block with another owner
/// goes through [`Mbuf::clone_ref`], which bumps the reference count. The
/// block returns to its pool when the last handle is dropped.
pub struct Mbuf {
    block: Arc<MbufBlock>,
}

impl Mbuf {
    pub(crate) fn from_parts(data: Vec<u8>, pool: Arc<PoolShared>) -> Self {
        Self {
            block: Arc::new(MbufBlock {
                head: Mutex::new([0u8; MBUF_HEAD_MAX_SIZE]),
                data,
                pool,
            }),
        }
    }

    /// Adds a reference to the same block.
    pub fn clone_ref(&self) -> Mbuf {
        Mbuf {
            block: self.block.clone(),
        }
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.block)
    }

    pub fn ptr_eq(&self, other: &Mbuf) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    pub fn len(&self) -> usize {
        self.block.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.block.data
    }

    /// Mutable payload access, only while this is the sole reference.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.block).map(|block| block.data.as_mut_slice())
    }

    pub fn private_head(&self) -> [u8; MBUF_HEAD_MAX_SIZE] {
        *self.block.head
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_private_head(&self, bytes: &[u8]) -> FlowResult<()> {
        if bytes.len() > MBUF_HEAD_MAX_SIZE {
            return Err(FlowError::ParamInvalid);
        }
        let mut head = self.block.head
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        head[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn head_msg(&self) -> MbufHeadMsg {
        let head = self.block.head
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        MbufHeadMsg::decode(&head[HEAD_MSG_OFFSET..]).unwrap_or_default()
    }

    pub fn set_head_msg(&self, msg: &MbufHeadMsg) {
        let mut head = self.block.head
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        head[HEAD_MSG_OFFSET..].copy_from_slice(&msg.encode());
    }

    /// Read-modify-write of the header record under one lock.
    pub fn update_head_msg<F>(&self, update: F)
    where
        F: FnOnce(&mut MbufHeadMsg),
    {
        let mut head = self.block.head
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut msg = MbufHeadMsg::decode(&head[HEAD_MSG_OFFSET..]).unwrap_or_default();
        update(&mut msg);
        head[HEAD_MSG_OFFSET..].copy_from_slice(&msg.encode());
    }

    pub fn transaction_id(&self) -> u64 {
        self.head_msg().transaction_id
    }

    pub fn stream_label(&self) -> u32 {
        self.head_msg().stream_label
    }
}

impl fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head_msg();
        f.debug_struct("Mbuf")
            .field("len", &self.len())
            .field("trans_id", &head.transaction_id)
            .field("stream_label", &head.stream_label)
            .field("refs", &self.ref_count())
            .finish()
    }
}
