use super::MetricsCollector;

pub struct ProcessorMonitor {
    collector: MetricsCollector,
}

impl ProcessorMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No processors registered".to_string();
        }

        let mut names: Vec<&String> = snapshot.keys().collect();
        names.sort();

        let mut report = String::from("=== Processor Metrics ===\n");
        for name in names {
            let metrics = &snapshot[name];
            report.push_str(&format!(
                "\n[{}]\n  Schedules: {}\n  Invocations: {}\n  Errors: {}\n  Replays: {}\n  Aligned sets: {}\n  Dropped inputs: {}\n  Avg Latency: {}μs\n",
                name,
                metrics.schedules,
                metrics.invocations,
                metrics.errors_count,
                metrics.replays,
                metrics.aligned_sets,
                metrics.dropped_inputs,
                metrics.avg_latency_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
