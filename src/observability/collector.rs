use std::collections::HashMap;
use std::sync::Arc;
use super::ProcessorMetrics;

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub processor: String,
    pub schedules: u64,
    pub invocations: u64,
    pub errors_count: u64,
    pub replays: u64,
    pub aligned_sets: u64,
    pub dropped_inputs: u64,
    pub avg_latency_us: u64,
}

pub struct MetricsCollector {
    metrics: HashMap<String, Arc<ProcessorMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: HashMap::new(),
        }
    }

    pub fn register(&mut self, processor: impl Into<String>, metrics: Arc<ProcessorMetrics>) {
        self.metrics.insert(processor.into(), metrics);
    }

    pub fn snapshot(&self) -> HashMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(name, metrics)| {
                (
                    name.clone(),
                    MetricsSnapshot {
                        processor: metrics.name().to_string(),
                        schedules: metrics.schedules(),
                        invocations: metrics.invocations(),
                        errors_count: metrics.errors_count(),
                        replays: metrics.replays(),
                        aligned_sets: metrics.aligned_sets(),
                        dropped_inputs: metrics.dropped_inputs(),
                        avg_latency_us: metrics.avg_latency_us(),
                    },
                )
            })
            .collect()
    }

    pub fn get_processor_metrics(&self, processor: &str) -> Option<Arc<ProcessorMetrics>> {
        self.metrics.get(processor).cloned()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            metrics: self.metrics.clone(),
        }
    }
}
