use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::debug;

use crate::error::{FlowError, FlowResult};

/// Back-off between attempts to take a scheduler slot back.
const RECLAIM_INTERVAL: Duration = Duration::from_millis(1);

thread_local! {
    static HOLDS_SLOT: Cell<bool> = const { Cell::new(false) };
}

/// Process-wide shutdown flags and scheduling-group accounting, injected
/// into every component that blocks.
#[derive(Debug, Default)]
pub struct RuntimeSignals {
    abnormal: AtomicBool,
    exit: AtomicBool,
    running: AtomicUsize,
    waiting: AtomicUsize,
    slots: OnceLock<Arc<Semaphore>>,
}

impl RuntimeSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the runtime abnormal; blocked waits end with `Redeploying`.
    pub fn set_abnormal(&self) {
        self.abnormal.store(true, Ordering::SeqCst);
    }

    /// Requests exit; blocked waits end with `Exit`.
    pub fn set_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_abnormal(&self) -> bool {
        self.abnormal.load(Ordering::SeqCst)
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> FlowResult<()> {
        if self.is_exiting() {
            return Err(FlowError::Exit);
        }
        if self.is_abnormal() {
            return Err(FlowError::Redeploying);
        }
        Ok(())
    }

    /// Hands the scheduler's slot semaphore to waiting callers. Only the
    /// first attached semaphore is kept.
    pub fn attach_slots(&self, slots: Arc<Semaphore>) {
        if self.slots.set(slots).is_err() {
            debug!("scheduler slots already attached");
        }
    }

    /// Counts the calling thread in the running group until the guard drops.
    /// The thread is assumed to hold one scheduler slot meanwhile.
    pub fn enter_running(&self) -> RunningGuard<'_> {
        self.running.fetch_add(1, Ordering::SeqCst);
        let previous = HOLDS_SLOT.with(|held| held.replace(true));
        RunningGuard {
            signals: self,
            previous,
        }
    }

    /// Moves the calling thread from the running group to the waiting group.
    ///
    /// If the thread entered the running group, its scheduler slot is lent
    /// out for the lifetime of the guard so other processors can be
    /// scheduled, and taken back when the guard drops. A thread that never
    /// entered the running group only counts as waiting.
    pub fn swap_to_waiting(&self) -> WaitingGuard<'_> {
        let held_slot = HOLDS_SLOT.with(|held| held.replace(false));
        if held_slot {
            self.running.fetch_sub(1, Ordering::SeqCst);
            if let Some(slots) = self.slots.get() {
                slots.add_permits(1);
            }
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        WaitingGuard {
            signals: self,
            held_slot,
        }
    }

    /// Takes one slot back from the scheduler, blocking the calling thread
    /// until a slot frees up. Gives up once exit is requested.
    fn reclaim_slot(&self) {
        let Some(slots) = self.slots.get() else {
            return;
        };
        loop {
            match slots.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    return;
                }
                Err(TryAcquireError::Closed) => return,
                Err(TryAcquireError::NoPermits) if self.is_exiting() => return,
                Err(TryAcquireError::NoPermits) => std::thread::sleep(RECLAIM_INTERVAL),
            }
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

pub struct RunningGuard<'a> {
    signals: &'a RuntimeSignals,
    previous: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.signals.running.fetch_sub(1, Ordering::SeqCst);
        HOLDS_SLOT.with(|held| held.set(self.previous));
    }
}

pub struct WaitingGuard<'a> {
    signals: &'a RuntimeSignals,
    held_slot: bool,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.signals.waiting.fetch_sub(1, Ordering::SeqCst);
        if self.held_slot {
            self.signals.reclaim_slot();
            self.signals.running.fetch_add(1, Ordering::SeqCst);
            HOLDS_SLOT.with(|held| held.set(true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_exit_before_abnormal() {
        let signals = RuntimeSignals::new();
        assert!(signals.check().is_ok());
        signals.set_abnormal();
        assert_eq!(signals.check(), Err(FlowError::Redeploying));
        signals.set_exit();
        assert_eq!(signals.check(), Err(FlowError::Exit));
    }

    #[test]
    fn test_group_swap_restores_counts() {
        let signals = RuntimeSignals::new();
        let running = signals.enter_running();
        assert_eq!(signals.running(), 1);
        {
            let _waiting = signals.swap_to_waiting();
            assert_eq!(signals.running(), 0);
            assert_eq!(signals.waiting(), 1);
        }
        assert_eq!(signals.running(), 1);
        assert_eq!(signals.waiting(), 0);
        drop(running);
        assert_eq!(signals.running(), 0);
    }

    #[test]
    fn test_waiting_lends_the_scheduler_slot() {
        let slots = Arc::new(Semaphore::new(1));
        let signals = RuntimeSignals::new();
        signals.attach_slots(slots.clone());

        let held = slots.try_acquire().unwrap();
        let running = signals.enter_running();
        assert_eq!(slots.available_permits(), 0);
        {
            let _waiting = signals.swap_to_waiting();
            assert_eq!(slots.available_permits(), 1);
        }
        assert_eq!(slots.available_permits(), 0);
        drop(running);
        drop(held);
        assert_eq!(slots.available_permits(), 1);
    }

    #[test]
    fn test_waiting_outside_running_keeps_slots() {
        let slots = Arc::new(Semaphore::new(2));
        let signals = RuntimeSignals::new();
        signals.attach_slots(slots.clone());

        let _waiting = signals.swap_to_waiting();
        assert_eq!(signals.running(), 0);
        assert_eq!(signals.waiting(), 1);
        assert_eq!(slots.available_permits(), 2);
    }
}
