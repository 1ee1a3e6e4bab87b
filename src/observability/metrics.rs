use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one execution unit.
pub struct ProcessorMetrics {
    name: String,
    schedules: AtomicU64,
    invocations: AtomicU64,
    errors_count: AtomicU64,
    replays: AtomicU64,
    aligned_sets: AtomicU64,
    dropped_inputs: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl ProcessorMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedules: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            replays: AtomicU64::new(0),
            aligned_sets: AtomicU64::new(0),
            dropped_inputs: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedules(&self) -> u64 {
        self.schedules.load(Ordering::Relaxed)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    pub fn aligned_sets(&self) -> u64 {
        self.aligned_sets.load(Ordering::Relaxed)
    }

    pub fn dropped_inputs(&self) -> u64 {
        self.dropped_inputs.load(Ordering::Relaxed)
    }

    pub fn record_schedule(&self) {
        self.schedules.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    /// An output went to the replay cache instead of its queue.
    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aligned_set(&self) {
        self.aligned_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped_inputs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn start_invoke(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_invoke(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }
}
