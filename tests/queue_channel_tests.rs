use flowexec::buffers::Mbuf;
use flowexec::hal::{MemQueueDriver, QueueBinding, QueueDriver, QueueEvent};
use flowexec::queue::{open_channel, MbufWriter, OutputPortTable, PublishOutcome};
use flowexec::FlowError;
use std::sync::Arc;
use std::time::Duration;

fn setup(binding: QueueBinding, depth: usize) -> Arc<MemQueueDriver> {
    let driver = Arc::new(MemQueueDriver::new());
    driver.create_queue(binding, depth).unwrap();
    driver
}

fn tagged(driver: &MemQueueDriver, trans_id: u64) -> Mbuf {
    let mbuf = driver.alloc(4).unwrap();
    mbuf.update_head_msg(|head| head.transaction_id = trans_id);
    mbuf
}

#[test]
fn test_native_enqueue_dequeue_is_zero_copy() {
    let binding = QueueBinding::native(0, 1);
    let driver = setup(binding, 4);
    let channel = open_channel(binding, driver.clone());

    let mbuf = tagged(&driver, 1);
    let alias = mbuf.clone_ref();
    channel.enqueue(mbuf).unwrap();
    assert_eq!(channel.size().unwrap(), 1);

    let out = channel.dequeue().unwrap();
    assert!(out.ptr_eq(&alias));
    assert!(!channel.needs_retry());
    assert_eq!(channel.dequeue().unwrap_err(), FlowError::QueueEmpty);
}

#[test]
fn test_full_queue_hands_buffer_back() {
    let binding = QueueBinding::native(0, 2);
    let driver = setup(binding, 1);
    let channel = open_channel(binding, driver.clone());

    channel.enqueue(tagged(&driver, 1)).unwrap();
    let rejected = channel.enqueue(tagged(&driver, 2)).unwrap_err();
    assert_eq!(rejected.error, FlowError::QueueFull);
    assert_eq!(rejected.into_mbuf().transaction_id(), 2);
    assert_eq!(driver.enqueue_count(&binding), 1);
}

#[test]
fn test_dequeue_with_timeout_times_out() {
    let binding = QueueBinding::native(0, 3);
    let driver = setup(binding, 1);
    let channel = open_channel(binding, driver);

    let err = channel.dequeue_with_timeout(Duration::from_millis(5)).unwrap_err();
    assert_eq!(err, FlowError::TimeOut);
}

#[test]
fn test_unknown_queue_is_a_driver_error() {
    let driver: Arc<dyn QueueDriver> = Arc::new(MemQueueDriver::new());
    let channel = open_channel(QueueBinding::native(9, 9), driver);
    assert_eq!(channel.dequeue().unwrap_err(), FlowError::QueueError);
    assert_eq!(channel.size().unwrap_err(), FlowError::QueueError);
}

#[test]
fn test_proxy_copies_both_ways() {
    let binding = QueueBinding::proxy(1, 0);
    let driver = setup(binding, 4);
    let channel = open_channel(binding, driver.clone());
    assert!(channel.needs_retry());

    let mbuf = tagged(&driver, 11);
    let alias = mbuf.clone_ref();
    channel.enqueue(mbuf).unwrap();

    let out = channel.dequeue().unwrap();
    assert!(!out.ptr_eq(&alias));
    assert_eq!(out.transaction_id(), 11);

    drop(alias);
    drop(out);
    assert_eq!(driver.pool().live_count(), 0);
}

#[test]
fn test_proxy_cannot_subscribe() {
    let binding = QueueBinding::proxy(1, 1);
    let driver = setup(binding, 4);
    let channel = open_channel(binding, driver);
    assert_eq!(channel.subscribe_not_empty(0).unwrap_err(), FlowError::NotSupported);
}

#[test]
fn test_discard_all_drains_and_counts() {
    let binding = QueueBinding::native(0, 4);
    let driver = setup(binding, 8);
    let channel = open_channel(binding, driver.clone());

    for trans_id in 0..5 {
        channel.enqueue(tagged(&driver, trans_id)).unwrap();
    }
    assert_eq!(channel.discard_all().unwrap(), 5);
    assert_eq!(channel.size().unwrap(), 0);
    assert_eq!(driver.pool().live_count(), 0);
}

#[test]
fn test_discard_all_reports_driver_failure() {
    let binding = QueueBinding::native(0, 5);
    let driver = setup(binding, 8);
    let channel = open_channel(binding, driver.clone());

    channel.enqueue(tagged(&driver, 1)).unwrap();
    driver.inject_dequeue_faults(&binding, 1, FlowError::QueueError).unwrap();
    assert_eq!(channel.discard_all().unwrap_err(), FlowError::QueueError);
}

#[test]
fn test_subscription_posts_not_empty_events() {
    let binding = QueueBinding::native(2, 0);
    let driver = setup(binding, 4);
    let channel = open_channel(binding, driver.clone());

    channel.subscribe_not_empty(7).unwrap();
    assert_eq!(driver.wait_event(7, 0, Duration::from_millis(5)).unwrap_err(), FlowError::TimeOut);

    channel.enqueue(tagged(&driver, 1)).unwrap();
    match driver.wait_event(7, 0, Duration::from_millis(100)).unwrap() {
        QueueEvent::NotEmpty(queue) => assert_eq!(queue, binding),
    }

    channel.unsubscribe_not_empty().unwrap();
    channel.enqueue(tagged(&driver, 2)).unwrap();
    assert!(driver.wait_event(7, 0, Duration::from_millis(5)).is_err());
}

#[test]
fn test_writer_passes_rejection_through() {
    let binding = QueueBinding::native(0, 6);
    let driver = setup(binding, 1);
    let writer = MbufWriter::new(open_channel(binding, driver.clone()));

    writer.write(tagged(&driver, 1)).unwrap();
    let rejected = writer.write(tagged(&driver, 2)).unwrap_err();
    assert_eq!(rejected.error, FlowError::QueueFull);
}

#[test]
fn test_output_port_replays_in_order() {
    let binding = QueueBinding::native(3, 0);
    let driver = setup(binding, 1);
    let ports = OutputPortTable::new(driver.clone());
    let port = ports.get_or_open(binding);

    assert_eq!(port.publish(tagged(&driver, 1)).unwrap(), PublishOutcome::Written);
    assert_eq!(port.publish(tagged(&driver, 2)).unwrap(), PublishOutcome::Cached);
    assert_eq!(port.publish(tagged(&driver, 3)).unwrap(), PublishOutcome::Cached);
    assert_eq!(port.replay_len(), 2);

    let channel = open_channel(binding, driver.clone());
    assert_eq!(channel.dequeue().unwrap().transaction_id(), 1);
    assert!(!port.flush().unwrap());
    assert_eq!(channel.dequeue().unwrap().transaction_id(), 2);
    assert!(port.flush().unwrap());
    assert_eq!(channel.dequeue().unwrap().transaction_id(), 3);
    assert_eq!(port.replay_len(), 0);
}

#[test]
fn test_output_ports_shared_per_physical_queue() {
    let native = QueueBinding::native(4, 0);
    let driver = setup(native, 1);
    let ports = OutputPortTable::new(driver.clone());

    let a = ports.get_or_open(native);
    let b = ports.get_or_open(QueueBinding::proxy(4, 0));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(ports.len(), 1);
}

#[test]
fn test_output_port_hard_failure_is_returned() {
    let binding = QueueBinding::native(5, 0);
    let driver = setup(binding, 4);
    let ports = OutputPortTable::new(driver.clone());
    let port = ports.get_or_open(binding);

    driver.inject_enqueue_faults(&binding, 1, FlowError::QueueError).unwrap();
    assert_eq!(port.publish(tagged(&driver, 1)).unwrap_err(), FlowError::QueueError);
    assert_eq!(port.replay_len(), 0);
    assert_eq!(driver.pool().live_count(), 0);
}
