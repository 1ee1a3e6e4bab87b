use flowexec::align::DataAligner;
use flowexec::buffers::{Mbuf, MbufPool};
use flowexec::config::AlignConfig;
use std::time::Duration;

fn tagged(pool: &MbufPool, trans_id: u64, stream_label: u32) -> Mbuf {
    let mbuf = pool.alloc(4).unwrap();
    mbuf.update_head_msg(|head| {
        head.transaction_id = trans_id;
        head.stream_label = stream_label;
    });
    mbuf
}

fn config(cache_num: usize, timeout_ms: Option<u64>, drop_when_not_align: bool) -> AlignConfig {
    AlignConfig {
        cache_num,
        timeout_ms,
        drop_when_not_align,
    }
}

#[test]
fn test_two_inputs_align_on_same_key() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(100, None, false));

    assert!(aligner.push_and_align(0, tagged(&pool, 1, 1)).unwrap().is_none());
    let set = aligner.push_and_align(1, tagged(&pool, 1, 1)).unwrap().unwrap();

    assert_eq!(set.len(), 2);
    assert!(set.iter().all(|slot| slot.as_ref().map(|m| m.transaction_id()) == Some(1)));
    assert_eq!(aligner.pending_len(), 0);
    assert_eq!(aligner.total_cached(), 0);
}

#[test]
fn test_entry_kept_while_sub_queue_not_drained() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(100, None, false));

    aligner.push_and_align(0, tagged(&pool, 7, 0)).unwrap();
    aligner.push_and_align(0, tagged(&pool, 7, 0)).unwrap();
    let set = aligner.push_and_align(1, tagged(&pool, 7, 0)).unwrap().unwrap();

    assert_eq!(set.len(), 2);
    // second buffer on index 0 still waits for its partner
    assert_eq!(aligner.pending_len(), 1);
    assert_eq!(aligner.cached_count(0), 1);
    assert_eq!(aligner.cached_count(1), 0);

    let set = aligner.push_and_align(1, tagged(&pool, 7, 0)).unwrap().unwrap();
    assert_eq!(set.iter().flatten().count(), 2);
    assert_eq!(aligner.pending_len(), 0);
}

#[test]
fn test_stream_labels_are_separate_keys() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(100, None, false));

    aligner.push_and_align(0, tagged(&pool, 1, 1)).unwrap();
    assert!(aligner.push_and_align(1, tagged(&pool, 1, 2)).unwrap().is_none());
    assert_eq!(aligner.pending_len(), 2);
}

#[test]
fn test_excepted_transaction_is_dropped() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(100, None, false));

    aligner.push_and_align(0, tagged(&pool, 1, 0)).unwrap();
    aligner.add_exception_transaction_id(5);
    let before = aligner.pending_len();

    assert!(aligner.push_and_align(0, tagged(&pool, 5, 0)).unwrap().is_none());
    assert!(aligner.push_and_align(1, tagged(&pool, 5, 0)).unwrap().is_none());
    assert_eq!(aligner.pending_len(), before);
    // only the buffer of transaction 1 is still alive
    assert_eq!(pool.live_count(), 1);
}

#[test]
fn test_adding_exception_purges_cached_entries() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(100, None, false));

    aligner.push_and_align(0, tagged(&pool, 3, 0)).unwrap();
    aligner.push_and_align(0, tagged(&pool, 3, 1)).unwrap();
    aligner.push_and_align(1, tagged(&pool, 4, 0)).unwrap();

    assert_eq!(aligner.add_exception_transaction_id(3), 2);
    assert_eq!(aligner.pending_len(), 1);
    assert_eq!(pool.live_count(), 1);
    assert!(aligner.is_exception(3));

    aligner.delete_exception_transaction_id(3);
    assert!(!aligner.is_exception(3));
    assert!(aligner.push_and_align(0, tagged(&pool, 3, 0)).unwrap().is_none());
    assert_eq!(aligner.pending_len(), 2);
}

#[test]
fn test_take_is_idempotent_when_nothing_is_stale() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(4, None, false));

    aligner.push_and_align(0, tagged(&pool, 1, 0)).unwrap();
    aligner.push_and_align(1, tagged(&pool, 2, 0)).unwrap();

    assert!(aligner.try_take_expired_or_over_limit().is_none());
    assert!(aligner.try_take_expired_or_over_limit().is_none());
    assert_eq!(aligner.pending_len(), 2);
    assert_eq!(aligner.total_cached(), 2);
}

#[test]
fn test_overflow_without_drop_returns_one_entry_per_call() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(2, None, false));

    for trans_id in [5, 3, 9] {
        aligner.push_and_align(0, tagged(&pool, trans_id, 0)).unwrap();
    }
    // nothing is discarded before eviction runs
    assert_eq!(aligner.pending_len(), 3);
    assert_eq!(pool.live_count(), 3);

    let set = aligner.try_take_expired_or_over_limit().unwrap();
    assert_eq!(set.len(), 2);
    // smallest key goes first, regardless of insertion order
    assert_eq!(set[0].as_ref().unwrap().transaction_id(), 3);
    assert!(set[1].is_none());
    assert_eq!(aligner.pending_len(), 2);

    assert!(aligner.try_take_expired_or_over_limit().is_none());
}

#[test]
fn test_overflow_with_drop_trims_to_limit() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, config(2, None, true));

    for trans_id in 1..=5 {
        aligner.push_and_align(1, tagged(&pool, trans_id, 0)).unwrap();
    }
    assert!(aligner.try_take_expired_or_over_limit().is_none());
    assert!(aligner.try_take_expired_or_over_limit().is_none());

    assert_eq!(aligner.pending_len(), 2);
    assert_eq!(pool.live_count(), 2);
    assert_eq!(aligner.cached_count(1), 2);
}

#[test]
fn test_expired_entry_released_as_best_effort() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(3, config(100, Some(10), false));

    aligner.push_and_align(2, tagged(&pool, 8, 0)).unwrap();
    assert!(aligner.try_take_expired_or_over_limit().is_none());

    std::thread::sleep(Duration::from_millis(30));
    let set = aligner.try_take_expired_or_over_limit().unwrap();
    assert!(set[0].is_none());
    assert!(set[1].is_none());
    assert_eq!(set[2].as_ref().unwrap().transaction_id(), 8);
    assert_eq!(aligner.pending_len(), 0);
    assert_eq!(aligner.total_cached(), 0);
}

#[test]
fn test_select_next_index_prefers_least_cached() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(3, config(100, None, false));

    aligner.push_and_align(0, tagged(&pool, 1, 0)).unwrap();
    aligner.push_and_align(0, tagged(&pool, 2, 0)).unwrap();
    aligner.push_and_align(2, tagged(&pool, 3, 0)).unwrap();

    assert_eq!(aligner.select_next_index(), 1);
    assert_eq!(aligner.index_order(), vec![1, 2, 0]);
}

#[test]
fn test_push_rejects_out_of_range_index() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, AlignConfig::default());
    assert!(aligner.push_and_align(2, tagged(&pool, 1, 0)).is_err());
}

#[test]
fn test_clear_releases_everything_but_keeps_exceptions() {
    let pool = MbufPool::new();
    let aligner = DataAligner::new(2, AlignConfig::default());

    aligner.add_exception_transaction_id(42);
    aligner.push_and_align(0, tagged(&pool, 1, 0)).unwrap();
    aligner.push_and_align(1, tagged(&pool, 2, 0)).unwrap();

    assert_eq!(aligner.clear(), 2);
    assert_eq!(pool.live_count(), 0);
    assert!(aligner.is_exception(42));
}
