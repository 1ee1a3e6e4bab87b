use flowexec::observability::{MetricsCollector, ProcessorMetrics, ProcessorMonitor};
use std::sync::Arc;

#[test]
fn test_metrics_creation() {
    let metrics = ProcessorMetrics::new("decode");
    assert_eq!(metrics.name(), "decode");
    assert_eq!(metrics.invocations(), 0);
    assert_eq!(metrics.errors_count(), 0);
    assert_eq!(metrics.avg_latency_us(), 0);
}

#[test]
fn test_metrics_counters() {
    let metrics = Arc::new(ProcessorMetrics::new("decode"));

    metrics.record_schedule();
    metrics.record_schedule();
    metrics.record_replay();
    metrics.record_aligned_set();
    metrics.record_dropped(3);
    metrics.record_error();

    assert_eq!(metrics.schedules(), 2);
    assert_eq!(metrics.replays(), 1);
    assert_eq!(metrics.aligned_sets(), 1);
    assert_eq!(metrics.dropped_inputs(), 3);
    assert_eq!(metrics.errors_count(), 1);
}

#[tokio::test]
async fn test_metrics_latency_tracking() {
    let metrics = ProcessorMetrics::new("decode");

    let start = metrics.start_invoke();
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    metrics.finish_invoke(start);

    assert_eq!(metrics.invocations(), 1);
    assert!(metrics.avg_latency_us() >= 10_000);
}

#[test]
fn test_collector_snapshot() {
    let mut collector = MetricsCollector::new();
    let decode = Arc::new(ProcessorMetrics::new("decode"));
    let resize = Arc::new(ProcessorMetrics::new("resize"));
    collector.register("decode", decode.clone());
    collector.register("resize", resize.clone());

    decode.record_schedule();
    resize.record_error();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["decode"].schedules, 1);
    assert_eq!(snapshot["resize"].errors_count, 1);
    assert!(collector.get_processor_metrics("decode").is_some());
    assert!(collector.get_processor_metrics("missing").is_none());
}

#[test]
fn test_monitor_report() {
    let monitor = ProcessorMonitor::new(MetricsCollector::new());
    assert_eq!(monitor.generate_report(), "No processors registered");

    let mut collector = MetricsCollector::new();
    let metrics = Arc::new(ProcessorMetrics::new("decode"));
    metrics.record_replay();
    collector.register("decode", metrics);

    let report = ProcessorMonitor::new(collector).generate_report();
    assert!(report.starts_with("=== Processor Metrics ==="));
    assert!(report.contains("[decode]"));
    assert!(report.contains("Replays: 1"));
}
