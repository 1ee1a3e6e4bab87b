use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::buffers::Mbuf;
use crate::error::{FlowError, FlowResult};
use crate::hal::{QueueBinding, QueueDriver, QueueEventKind, Rejected};

/// Synchronous operations over one queue binding.
pub trait QueueChannel: Send + Sync {
    fn binding(&self) -> &QueueBinding;

    fn enqueue(&self, mbuf: Mbuf) -> Result<(), Rejected>;

    fn dequeue(&self) -> FlowResult<Mbuf>;

    fn dequeue_with_timeout(&self, timeout: Duration) -> FlowResult<Mbuf>;

    fn size(&self) -> FlowResult<usize>;

    /// True when the channel cannot wake a waiter through queue events and
    /// the caller has to poll.
    fn needs_retry(&self) -> bool;

    fn subscribe_not_empty(&self, group_id: u32) -> FlowResult<()>;

    fn unsubscribe_not_empty(&self) -> FlowResult<()>;

    /// Drains until empty. Returns how many buffers were released, or the
    /// first driver failure seen while draining.
    fn discard_all(&self) -> FlowResult<usize> {
        let mut discarded = 0;
        loop {
            match self.dequeue() {
                Ok(mbuf) => {
                    drop(mbuf);
                    discarded += 1;
                }
                Err(FlowError::QueueEmpty) => break,
                Err(e) => {
                    warn!(queue = %self.binding(), discarded, error = %e, "discard stopped on driver failure");
                    return Err(e);
                }
            }
        }
        if discarded > 0 {
            debug!(queue = %self.binding(), discarded, "discarded queued buffers");
        }
        Ok(discarded)
    }
}

/// Zero-copy channel participating in event subscription.
pub struct NativeQueue {
    binding: QueueBinding,
    driver: Arc<dyn QueueDriver>,
}

impl NativeQueue {
    pub fn new(binding: QueueBinding, driver: Arc<dyn QueueDriver>) -> Self {
        Self { binding, driver }
    }
}

impl QueueChannel for NativeQueue {
    fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    fn enqueue(&self, mbuf: Mbuf) -> Result<(), Rejected> {
        self.driver.enqueue(&self.binding, mbuf)
    }

    fn dequeue(&self) -> FlowResult<Mbuf> {
        self.driver.dequeue(&self.binding)
    }

    fn dequeue_with_timeout(&self, timeout: Duration) -> FlowResult<Mbuf> {
        self.driver.dequeue_with_timeout(&self.binding, timeout)
    }

    fn size(&self) -> FlowResult<usize> {
        self.driver.depth(&self.binding)
    }

    fn needs_retry(&self) -> bool {
        false
    }

    fn subscribe_not_empty(&self, group_id: u32) -> FlowResult<()> {
        self.driver.subscribe(&self.binding, QueueEventKind::NotEmpty, group_id)
    }

    fn unsubscribe_not_empty(&self) -> FlowResult<()> {
        self.driver.unsubscribe(&self.binding, QueueEventKind::NotEmpty)
    }
}

/// Channel whose transport only moves copies.
///
/// Every enqueue allocates a driver-side copy and frees the caller's buffer
/// once the copy is accepted; every dequeue copies into a fresh local buffer
/// and frees the driver's. The transport never raises queue events.
pub struct ProxyQueue {
    binding: QueueBinding,
    driver: Arc<dyn QueueDriver>,
}

impl ProxyQueue {
    pub fn new(binding: QueueBinding, driver: Arc<dyn QueueDriver>) -> Self {
        Self { binding, driver }
    }
}

impl QueueChannel for ProxyQueue {
    fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    fn enqueue(&self, mbuf: Mbuf) -> Result<(), Rejected> {
        let copy = match self.driver.copy(&mbuf) {
            Ok(copy) => copy,
            Err(error) => return Err(Rejected::new(error, mbuf)),
        };
        match self.driver.enqueue(&self.binding, copy) {
            Ok(()) => {
                drop(mbuf);
                Ok(())
            }
            Err(rejected) => Err(Rejected::new(rejected.error, mbuf)),
        }
    }

    fn dequeue(&self) -> FlowResult<Mbuf> {
        let raw = self.driver.dequeue(&self.binding)?;
        self.driver.copy(&raw)
    }

    fn dequeue_with_timeout(&self, timeout: Duration) -> FlowResult<Mbuf> {
        let raw = self.driver.dequeue_with_timeout(&self.binding, timeout)?;
        self.driver.copy(&raw)
    }

    fn size(&self) -> FlowResult<usize> {
        self.driver.depth(&self.binding)
    }

    fn needs_retry(&self) -> bool {
        true
    }

    fn subscribe_not_empty(&self, _group_id: u32) -> FlowResult<()> {
        Err(FlowError::NotSupported)
    }

    fn unsubscribe_not_empty(&self) -> FlowResult<()> {
        Ok(())
    }
}

/// Opens the channel variant matching the binding kind.
pub fn open_channel(binding: QueueBinding, driver: Arc<dyn QueueDriver>) -> Arc<dyn QueueChannel> {
    if binding.is_proxy {
        Arc::new(ProxyQueue::new(binding, driver))
    } else {
        Arc::new(NativeQueue::new(binding, driver))
    }
}
