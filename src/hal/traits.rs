use std::time::Duration;

use super::types::{QueueBinding, QueueEvent, QueueEventKind, Rejected};
use crate::buffers::{Mbuf, MbufPool};
use crate::error::FlowResult;

/// Raw queue primitives provided by the device driver.
///
/// Ownership follows the buffer: a successful `enqueue` hands the buffer to
/// the driver, a successful `dequeue` hands one to the caller. A refused
/// enqueue returns the buffer inside [`Rejected`].
pub trait QueueDriver: Send + Sync {
    fn enqueue(&self, binding: &QueueBinding, mbuf: Mbuf) -> Result<(), Rejected>;

    /// Non-blocking; `QueueEmpty` when nothing is queued.
    fn dequeue(&self, binding: &QueueBinding) -> FlowResult<Mbuf>;

    fn dequeue_with_timeout(&self, binding: &QueueBinding, timeout: Duration) -> FlowResult<Mbuf>;

    fn depth(&self, binding: &QueueBinding) -> FlowResult<usize>;

    fn subscribe(&self, binding: &QueueBinding, kind: QueueEventKind, group_id: u32) -> FlowResult<()>;

    fn unsubscribe(&self, binding: &QueueBinding, kind: QueueEventKind) -> FlowResult<()>;

    /// Blocks until an event for `group_id` arrives; `TimeOut` otherwise.
    fn wait_event(&self, group_id: u32, thread_id: u32, timeout: Duration) -> FlowResult<QueueEvent>;

    fn pool(&self) -> &MbufPool;

    fn alloc(&self, len: usize) -> FlowResult<Mbuf> {
        self.pool().alloc(len)
    }

    fn copy(&self, src: &Mbuf) -> FlowResult<Mbuf> {
        self.pool().copy_from(src)
    }
}
