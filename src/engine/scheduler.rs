use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::processor::FlowFuncProcessor;
use super::signals::RuntimeSignals;
use super::state::ProcessorState;
use crate::error::FlowError;
use crate::hal::{QueueDriver, QueueEvent};

/// Longest single event wait of a pump before it re-checks for shutdown.
const PUMP_WAIT: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Schedule calls allowed to run at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Longest idle wait before a processor is polled again
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_tick_ms() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// Drives a set of processors on the tokio runtime.
///
/// Every processor gets its own loop task. `schedule` runs on the blocking
/// pool under a semaphore permit and is re-run at once while it asks for
/// it; otherwise the loop sleeps until a queue event for its device, the
/// next tick, or shutdown. A nested model wait inside `schedule` lends its
/// permit back through [`RuntimeSignals`].
pub struct ProcessorScheduler {
    config: SchedulerConfig,
    driver: Arc<dyn QueueDriver>,
    signals: Arc<RuntimeSignals>,
    processors: Vec<Arc<FlowFuncProcessor>>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    stop_pumps: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ProcessorScheduler {
    pub fn new(config: SchedulerConfig, driver: Arc<dyn QueueDriver>, signals: Arc<RuntimeSignals>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        signals.attach_slots(semaphore.clone());
        Self {
            semaphore,
            config,
            driver,
            signals,
            processors: Vec::new(),
            shutdown_tx,
            stop_pumps: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn add(&mut self, processor: Arc<FlowFuncProcessor>) {
        self.processors.push(processor);
    }

    pub fn processors(&self) -> &[Arc<FlowFuncProcessor>] {
        &self.processors
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Initializes processors still in `Init` and spawns their loops.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("scheduler already started"));
        }

        let mut wakers: HashMap<u32, Vec<Arc<Notify>>> = HashMap::new();
        let mut notifies = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            if processor.state() == ProcessorState::Init {
                processor
                    .init(processor.device_id())
                    .map_err(|e| anyhow!(e))
                    .with_context(|| format!("failed to init processor {}", processor.name()))?;
                match processor.init_function() {
                    Ok(()) | Err(FlowError::InitAgain) => {}
                    Err(e) => {
                        return Err(anyhow!(e).context(format!("failed to init function of {}", processor.name())));
                    }
                }
            }
            let notify = Arc::new(Notify::new());
            wakers.entry(processor.device_id()).or_default().push(notify.clone());
            notifies.push(notify);
        }

        let tick = Duration::from_millis(self.config.tick_ms.max(1));
        let devices = wakers.len();
        for (group_id, group) in wakers {
            self.handles.push(spawn_event_pump(
                self.driver.clone(),
                group_id,
                group,
                self.stop_pumps.clone(),
            ));
        }

        for (thread_id, (processor, notify)) in self.processors.iter().zip(notifies).enumerate() {
            let driver = ProcessorLoop {
                processor: processor.clone(),
                semaphore: self.semaphore.clone(),
                signals: self.signals.clone(),
                notify,
                tick,
                thread_id: thread_id as u32,
            };
            self.handles.push(tokio::spawn(driver.run(self.shutdown_tx.subscribe())));
        }

        info!(processors = self.processors.len(), devices, "scheduler started");
        Ok(())
    }

    /// Stops every loop and waits for them to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.stop_pumps.store(true, Ordering::SeqCst);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            handle.await.context("scheduler task panicked")?;
        }
        info!("scheduler stopped");
        Ok(())
    }
}

struct ProcessorLoop {
    processor: Arc<FlowFuncProcessor>,
    semaphore: Arc<Semaphore>,
    signals: Arc<RuntimeSignals>,
    notify: Arc<Notify>,
    tick: Duration,
    thread_id: u32,
}

impl ProcessorLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() || self.signals.is_exiting() {
                break;
            }

            let again = {
                let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
                    break;
                };
                let processor = self.processor.clone();
                let signals = self.signals.clone();
                let thread_id = self.thread_id;
                let result = tokio::task::spawn_blocking(move || {
                    let _running = signals.enter_running();
                    processor.schedule(thread_id)
                })
                .await;
                match result {
                    Ok(again) => again,
                    Err(e) => {
                        error!(processor = %self.processor.name(), error = %e, "schedule task failed");
                        break;
                    }
                }
            };

            if again {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.changed() => {}
            }
        }
        debug!(processor = %self.processor.name(), "processor loop exited");
    }
}

/// Forwards queue events of one device group to every loop of that group.
/// `notify_one` stores a permit, so a loop that is busy in `schedule` when
/// the event arrives still wakes on its next wait.
fn spawn_event_pump(
    driver: Arc<dyn QueueDriver>,
    group_id: u32,
    loops: Vec<Arc<Notify>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::SeqCst) {
            match driver.wait_event(group_id, 0, PUMP_WAIT) {
                Ok(QueueEvent::NotEmpty(binding)) => {
                    debug!(group_id, queue = %binding, "queue not empty");
                    loops.iter().for_each(|notify| notify.notify_one());
                }
                Err(FlowError::TimeOut) => {}
                Err(e) => {
                    error!(group_id, error = %e, "event wait failed");
                    break;
                }
            }
        }
    })
}
