use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::buffers::{Mbuf, MbufPool};
use crate::error::{FlowError, FlowResult};
use crate::hal::{QueueBinding, QueueDriver, QueueEvent, QueueEventKind, Rejected};

struct MemQueue {
    tx: Sender<Mbuf>,
    rx: Receiver<Mbuf>,
    enqueued: AtomicU64,
    subscriber: Mutex<Option<u32>>,
    enqueue_faults: Mutex<VecDeque<FlowError>>,
    dequeue_faults: Mutex<VecDeque<FlowError>>,
    unsubscribe_faults: Mutex<VecDeque<FlowError>>,
}

impl MemQueue {
    fn new(depth: usize) -> Self {
        let (tx, rx) = bounded(depth);
        Self {
            tx,
            rx,
            enqueued: AtomicU64::new(0),
            subscriber: Mutex::new(None),
            enqueue_faults: Mutex::new(VecDeque::new()),
            dequeue_faults: Mutex::new(VecDeque::new()),
            unsubscribe_faults: Mutex::new(VecDeque::new()),
        }
    }

    fn subscriber(&self) -> Option<u32> {
        *self.subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn take_fault(faults: &Mutex<VecDeque<FlowError>>) -> Option<FlowError> {
    faults
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

/// In-process queue driver.
///
/// Each queue is a bounded channel; event groups are unbounded channels fed
/// on every successful enqueue into a subscribed queue.
pub struct MemQueueDriver {
    pool: MbufPool,
    queues: RwLock<HashMap<(u32, u32), Arc<MemQueue>>>,
    groups: Mutex<HashMap<u32, (Sender<QueueEvent>, Receiver<QueueEvent>)>>,
}

impl MemQueueDriver {
    pub fn new() -> Self {
        Self::with_pool(MbufPool::new())
    }

    pub fn with_pool(pool: MbufPool) -> Self {
        Self {
            pool,
            queues: RwLock::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the physical queue behind `binding`. Existing queues are kept.
    pub fn create_queue(&self, binding: QueueBinding, depth: usize) -> FlowResult<()> {
        if depth == 0 {
            return Err(FlowError::ParamInvalid);
        }
        let mut queues = self.queues
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues
            .entry(binding.physical())
            .or_insert_with(|| Arc::new(MemQueue::new(depth)));
        Ok(())
    }

    /// The next `count` enqueues into `binding` fail with `error`.
    pub fn inject_enqueue_faults(&self, binding: &QueueBinding, count: usize, error: FlowError) -> FlowResult<()> {
        let queue = self.queue(binding)?;
        let mut faults = queue.enqueue_faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults.extend(std::iter::repeat(error).take(count));
        Ok(())
    }

    /// The next `count` dequeues from `binding` fail with `error`.
    pub fn inject_dequeue_faults(&self, binding: &QueueBinding, count: usize, error: FlowError) -> FlowResult<()> {
        let queue = self.queue(binding)?;
        let mut faults = queue.dequeue_faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults.extend(std::iter::repeat(error).take(count));
        Ok(())
    }

    /// The next `count` unsubscribes from `binding` fail with `error` and
    /// leave the subscription in place.
    pub fn inject_unsubscribe_faults(&self, binding: &QueueBinding, count: usize, error: FlowError) -> FlowResult<()> {
        let queue = self.queue(binding)?;
        let mut faults = queue.unsubscribe_faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults.extend(std::iter::repeat(error).take(count));
        Ok(())
    }

    /// Group currently subscribed to `binding`, if any.
    pub fn subscriber(&self, binding: &QueueBinding) -> Option<u32> {
        self.queue(binding).ok().and_then(|queue| queue.subscriber())
    }

    /// Successful enqueues into `binding` so far.
    pub fn enqueue_count(&self, binding: &QueueBinding) -> u64 {
        self.queue(binding)
            .map(|queue| queue.enqueued.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn post_event(&self, group_id: u32, event: QueueEvent) {
        let (tx, _) = self.group_channel(group_id);
        let _ = tx.send(event);
    }

    fn queue(&self, binding: &QueueBinding) -> FlowResult<Arc<MemQueue>> {
        self.queues
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&binding.physical())
            .cloned()
            .ok_or(FlowError::QueueError)
    }

    fn group_channel(&self, group_id: u32) -> (Sender<QueueEvent>, Receiver<QueueEvent>) {
        let mut groups = self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        groups.entry(group_id).or_insert_with(unbounded).clone()
    }
}

impl Default for MemQueueDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueDriver for MemQueueDriver {
    fn enqueue(&self, binding: &QueueBinding, mbuf: Mbuf) -> Result<(), Rejected> {
        let queue = match self.queue(binding) {
            Ok(queue) => queue,
            Err(error) => return Err(Rejected::new(error, mbuf)),
        };
        if let Some(error) = take_fault(&queue.enqueue_faults) {
            return Err(Rejected::new(error, mbuf));
        }

        match queue.tx.try_send(mbuf) {
            Ok(()) => {
                queue.enqueued.fetch_add(1, Ordering::SeqCst);
                if let Some(group_id) = queue.subscriber() {
                    self.post_event(group_id, QueueEvent::NotEmpty(*binding));
                }
                Ok(())
            }
            Err(TrySendError::Full(mbuf)) => Err(Rejected::new(FlowError::QueueFull, mbuf)),
            Err(TrySendError::Disconnected(mbuf)) => Err(Rejected::new(FlowError::QueueError, mbuf)),
        }
    }

    fn dequeue(&self, binding: &QueueBinding) -> FlowResult<Mbuf> {
        let queue = self.queue(binding)?;
        if let Some(error) = take_fault(&queue.dequeue_faults) {
            return Err(error);
        }
        queue.rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => FlowError::QueueEmpty,
            TryRecvError::Disconnected => FlowError::QueueError,
        })
    }

    fn dequeue_with_timeout(&self, binding: &QueueBinding, timeout: Duration) -> FlowResult<Mbuf> {
        let queue = self.queue(binding)?;
        if let Some(error) = take_fault(&queue.dequeue_faults) {
            return Err(error);
        }
        queue.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => FlowError::TimeOut,
            RecvTimeoutError::Disconnected => FlowError::QueueError,
        })
    }

    fn depth(&self, binding: &QueueBinding) -> FlowResult<usize> {
        Ok(self.queue(binding)?.rx.len())
    }

    fn subscribe(&self, binding: &QueueBinding, kind: QueueEventKind, group_id: u32) -> FlowResult<()> {
        let queue = self.queue(binding)?;
        match kind {
            QueueEventKind::NotEmpty => {
                *queue.subscriber
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(group_id);
                // data queued before the subscription must still wake the group
                if !queue.rx.is_empty() {
                    self.post_event(group_id, QueueEvent::NotEmpty(*binding));
                }
            }
        }
        debug!(queue = %binding, group_id, "subscribed");
        Ok(())
    }

    fn unsubscribe(&self, binding: &QueueBinding, kind: QueueEventKind) -> FlowResult<()> {
        let queue = self.queue(binding)?;
        if let Some(error) = take_fault(&queue.unsubscribe_faults) {
            return Err(error);
        }
        match kind {
            QueueEventKind::NotEmpty => {
                *queue.subscriber
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
            }
        }
        Ok(())
    }

    fn wait_event(&self, group_id: u32, _thread_id: u32, timeout: Duration) -> FlowResult<QueueEvent> {
        let (_, rx) = self.group_channel(group_id);
        rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => FlowError::TimeOut,
            RecvTimeoutError::Disconnected => FlowError::QueueError,
        })
    }

    fn pool(&self) -> &MbufPool {
        &self.pool
    }
}
