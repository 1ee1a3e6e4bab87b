use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight guard for `schedule`.
///
/// A caller that finds the unit busy leaves a wake-up request in the single
/// pending slot and returns immediately. The holder checks the slot after
/// releasing the busy flag and reports it, so the request is never lost and
/// nobody blocks.
#[derive(Debug, Default)]
pub struct ScheduleGuard {
    busy: AtomicBool,
    wait_scheduled: AtomicBool,
}

impl ScheduleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<ScheduleToken<'_>> {
        loop {
            if self.busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // requests made before this run are served by it
                self.wait_scheduled.store(false, Ordering::SeqCst);
                return Some(ScheduleToken { guard: self });
            }
            self.wait_scheduled.store(true, Ordering::SeqCst);
            // still busy: the holder sees the request after it releases
            if self.busy.load(Ordering::SeqCst) {
                return None;
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

pub struct ScheduleToken<'a> {
    guard: &'a ScheduleGuard,
}

impl ScheduleToken<'_> {
    /// Releases the guard. Returns true if another caller asked for a run
    /// while this one was in progress.
    pub fn finish(self) -> bool {
        let guard = self.guard;
        std::mem::forget(self);
        guard.busy.store(false, Ordering::SeqCst);
        guard.wait_scheduled.swap(false, Ordering::SeqCst)
    }
}

impl Drop for ScheduleToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_caller_is_turned_away() {
        let guard = ScheduleGuard::new();
        let token = guard.try_enter().unwrap();
        assert!(guard.try_enter().is_none());
        assert!(token.finish());
        assert!(!guard.is_busy());
    }

    #[test]
    fn test_no_request_no_reschedule() {
        let guard = ScheduleGuard::new();
        let token = guard.try_enter().unwrap();
        assert!(!token.finish());
        let again = guard.try_enter().unwrap();
        assert!(!again.finish());
    }

    #[test]
    fn test_dropped_token_releases() {
        let guard = ScheduleGuard::new();
        {
            let _token = guard.try_enter().unwrap();
        }
        assert!(!guard.is_busy());
    }
}
