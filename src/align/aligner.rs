use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::buffers::Mbuf;
use crate::config::AlignConfig;
use crate::error::{FlowError, FlowResult};

/// One buffer per input index. Slots are `None` only in best-effort sets
/// released by expiry or overflow.
pub type AlignedSet = Vec<Option<Mbuf>>;

/// Alignment key. Ordering is lexicographic: transaction id first, then
/// stream label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlignKey {
    pub trans_id: u64,
    pub stream_label: u32,
}

impl AlignKey {
    pub fn of(mbuf: &Mbuf) -> Self {
        let head = mbuf.head_msg();
        Self {
            trans_id: head.transaction_id,
            stream_label: head.stream_label,
        }
    }
}

struct PendingEntry {
    slots: Vec<VecDeque<Mbuf>>,
    created: Instant,
}

impl PendingEntry {
    fn new(input_num: usize) -> Self {
        Self {
            slots: (0..input_num).map(|_| VecDeque::new()).collect(),
            created: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.slots.iter().all(|slot| !slot.is_empty())
    }

    fn is_drained(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_empty())
    }

    fn take_front(&mut self) -> AlignedSet {
        self.slots.iter_mut().map(|slot| slot.pop_front()).collect()
    }
}

struct AlignState {
    pending: BTreeMap<AlignKey, PendingEntry>,
    exception_ids: HashSet<u64>,
    cached: Vec<usize>,
}

impl AlignState {
    fn forget(&mut self, entry: &PendingEntry) {
        for (index, slot) in entry.slots.iter().enumerate() {
            self.cached[index] -= slot.len();
        }
    }

    fn next_stale(&self, timeout: Option<Duration>, cache_num: usize) -> Option<AlignKey> {
        if let Some(timeout) = timeout {
            let expired = self.pending
                .iter()
                .find(|(_, entry)| entry.created.elapsed() >= timeout)
                .map(|(key, _)| *key);
            if expired.is_some() {
                return expired;
            }
        }
        if self.pending.len() > cache_num {
            // smallest key, which is not necessarily the first inserted
            return self.pending.keys().next().copied();
        }
        None
    }
}

/// Buffers per-input messages until one buffer per input shares the same
/// (transaction id, stream label), under a bounded cache and optional expiry.
pub struct DataAligner {
    input_num: usize,
    config: AlignConfig,
    state: Mutex<AlignState>,
}

impl DataAligner {
    pub fn new(input_num: usize, config: AlignConfig) -> Self {
        Self {
            input_num,
            config,
            state: Mutex::new(AlignState {
                pending: BTreeMap::new(),
                exception_ids: HashSet::new(),
                cached: vec![0; input_num],
            }),
        }
    }

    pub fn input_num(&self) -> usize {
        self.input_num
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AlignState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Caches `mbuf` under its key at slot `index` and returns the aligned
    /// set if the key became complete. Buffers of excepted transactions are
    /// released without touching the cache.
    pub fn push_and_align(&self, index: usize, mbuf: Mbuf) -> FlowResult<Option<AlignedSet>> {
        if index >= self.input_num {
            return Err(FlowError::ParamInvalid);
        }
        let key = AlignKey::of(&mbuf);
        let mut state = self.lock();

        if state.exception_ids.contains(&key.trans_id) {
            debug!(trans_id = key.trans_id, index, "dropping input of excepted transaction");
            return Ok(None);
        }

        let input_num = self.input_num;
        let entry = state
            .pending
            .entry(key)
            .or_insert_with(|| PendingEntry::new(input_num));
        entry.slots[index].push_back(mbuf);

        if !entry.is_complete() {
            state.cached[index] += 1;
            return Ok(None);
        }

        let set = entry.take_front();
        let drained = entry.is_drained();
        // the pushed buffer never counted; the others leave the cache
        for other in (0..input_num).filter(|&i| i != index) {
            state.cached[other] -= 1;
        }
        if drained {
            state.pending.remove(&key);
        }
        Ok(Some(set))
    }

    /// Index holding the fewest cached buffers; lowest index on ties.
    pub fn select_next_index(&self) -> usize {
        let state = self.lock();
        state
            .cached
            .iter()
            .enumerate()
            .min_by_key(|(index, count)| (**count, *index))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Every index, least cached first.
    pub fn index_order(&self) -> Vec<usize> {
        let state = self.lock();
        let mut order: Vec<usize> = (0..self.input_num).collect();
        order.sort_by_key(|&index| (state.cached[index], index));
        order
    }

    /// Releases at most one stale key.
    ///
    /// Expired keys are considered first, then the cache limit. With
    /// `drop_when_not_align` every stale key is discarded and nothing is
    /// returned; otherwise the front of the oldest stale key is handed out
    /// as a best-effort set and the key is removed.
    pub fn try_take_expired_or_over_limit(&self) -> Option<AlignedSet> {
        let timeout = self.config.timeout();
        let mut state = self.lock();

        if self.config.drop_when_not_align {
            while let Some(key) = state.next_stale(timeout, self.config.cache_num) {
                if let Some(entry) = state.pending.remove(&key) {
                    state.forget(&entry);
                    let dropped: usize = entry.slots.iter().map(VecDeque::len).sum();
                    warn!(trans_id = key.trans_id, stream_label = key.stream_label, dropped, "dropping unaligned data");
                }
            }
            return None;
        }

        let key = state.next_stale(timeout, self.config.cache_num)?;
        let mut entry = state.pending.remove(&key)?;
        state.forget(&entry);
        let set = entry.take_front();
        let leftover: usize = entry.slots.iter().map(VecDeque::len).sum();
        if leftover > 0 {
            warn!(trans_id = key.trans_id, leftover, "releasing surplus buffers of stale key");
        }
        debug!(
            trans_id = key.trans_id,
            stream_label = key.stream_label,
            present = set.iter().filter(|slot| slot.is_some()).count(),
            "delivering best-effort set"
        );
        Some(set)
    }

    /// Starts dropping `trans_id` and releases whatever is already cached
    /// for it. Returns the number of released buffers.
    pub fn add_exception_transaction_id(&self, trans_id: u64) -> usize {
        let mut state = self.lock();
        state.exception_ids.insert(trans_id);

        let start = AlignKey { trans_id, stream_label: 0 };
        let end = AlignKey { trans_id, stream_label: u32::MAX };
        let keys: Vec<AlignKey> = state.pending.range(start..=end).map(|(key, _)| *key).collect();

        let mut released = 0;
        for key in keys {
            if let Some(entry) = state.pending.remove(&key) {
                state.forget(&entry);
                released += entry.slots.iter().map(VecDeque::len).sum::<usize>();
            }
        }
        if released > 0 {
            debug!(trans_id, released, "purged cached data of excepted transaction");
        }
        released
    }

    pub fn delete_exception_transaction_id(&self, trans_id: u64) {
        self.lock().exception_ids.remove(&trans_id);
    }

    pub fn is_exception(&self, trans_id: u64) -> bool {
        self.lock().exception_ids.contains(&trans_id)
    }

    /// Number of pending keys.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn cached_count(&self, index: usize) -> usize {
        self.lock().cached.get(index).copied().unwrap_or(0)
    }

    pub fn total_cached(&self) -> usize {
        self.lock().cached.iter().sum()
    }

    /// Releases every cached buffer. Exception ids are kept.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let released = state.cached.iter().sum();
        state.pending.clear();
        state.cached.iter_mut().for_each(|count| *count = 0);
        released
    }
}
