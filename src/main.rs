use anyhow::Result;
use flowexec::config::ProcessorConfig;
use flowexec::engine::{FlowFuncProcessor, ProcessorScheduler, RuntimeSignals, SchedulerConfig};
use flowexec::hal::{MemQueueDriver, QueueBinding, QueueDriver};
use flowexec::observability::{init_tracing, MetricsCollector, ProcessorMonitor};
use flowexec::queue::OutputPortTable;
use flowexec::registry::FuncRegistry;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    println!("flowexec demo: counter_source -> identity -> sink");
    println!("=================================================\n");

    let driver = Arc::new(MemQueueDriver::new());
    let source_out = QueueBinding::native(0, 0);
    let identity_out = QueueBinding::native(0, 1);
    driver.create_queue(source_out, 8)?;
    driver.create_queue(identity_out, 8)?;

    let config = serde_json::json!([
        {
            "name": "source",
            "func_name": "counter_source",
            "outputs": [{"device_id": 0, "queue_id": 0}],
            "params": {"start": 100, "limit": 20}
        },
        {
            "name": "forward",
            "func_name": "identity",
            "inputs": [{"device_id": 0, "queue_id": 0}],
            "outputs": [{"device_id": 0, "queue_id": 1}]
        },
        {
            "name": "drain",
            "func_name": "sink",
            "inputs": [{"device_id": 0, "queue_id": 1}],
            "params": {"log_every": 5}
        }
    ]);

    let registry = Arc::new(FuncRegistry::with_builtins());
    println!("Registered functions: {:?}\n", registry.list());

    let shared: Arc<dyn QueueDriver> = driver.clone();
    let ports = OutputPortTable::new(shared.clone());
    let signals = Arc::new(RuntimeSignals::new());
    let mut scheduler = ProcessorScheduler::new(SchedulerConfig::default(), shared.clone(), signals.clone());
    let mut collector = MetricsCollector::new();

    if let serde_json::Value::Array(entries) = config {
        for entry in entries {
            let processor_config = ProcessorConfig::from_json(entry)?;
            let processor = Arc::new(FlowFuncProcessor::new(
                processor_config,
                shared.clone(),
                registry.clone(),
                &ports,
            )?);
            collector.register(processor.name(), processor.metrics());
            scheduler.add(processor);
        }
    }

    scheduler.start()?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    signals.set_exit();
    scheduler.shutdown().await?;

    let monitor = ProcessorMonitor::new(collector);
    println!("{}", monitor.generate_report());
    println!("Buffers still alive: {}", driver.pool().live_count());

    Ok(())
}
