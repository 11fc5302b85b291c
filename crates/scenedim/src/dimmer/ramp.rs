use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;
use tracing::warn;

use super::scene::Direction;
use crate::engine::Actuator;

#[derive(Debug, Default)]
struct FlagState {
    active: bool,
    generation: u64,
}

/// Run flag for one ramp direction.
///
/// Loops poll this between pulses; clearing it is the only way a loop is
/// stopped. Every stop bumps the generation, so a loop spawned before a stop
/// cannot be revived by a later start.
#[derive(Debug, Default)]
pub(super) struct RampFlag {
    state: Mutex<FlagState>,
}

impl RampFlag {
    fn lock(&self) -> std::sync::MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the flag and return the generation new loops should run under.
    pub(super) fn activate(&self) -> u64 {
        let mut state = self.lock();
        state.active = true;
        state.generation
    }

    /// Clear the flag. Returns false if it was already clear.
    pub(super) fn deactivate(&self) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        state.active = false;
        state.generation += 1;
        true
    }

    /// Clear the flag only if `generation` is still the running one.
    pub(super) fn deactivate_generation(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if !state.active || state.generation != generation {
            return false;
        }
        state.active = false;
        state.generation += 1;
        true
    }

    pub(super) fn is_active(&self) -> bool {
        self.lock().active
    }

    pub(super) fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.active && state.generation == generation
    }
}

/// Counts live ramp loops so teardown can wait for them.
#[derive(Debug, Default)]
pub(super) struct LoopTracker {
    running: AtomicUsize,
    idle: Notify,
}

impl LoopTracker {
    pub(super) fn enter(self: &Arc<Self>) -> LoopGuard {
        self.running.fetch_add(1, Ordering::SeqCst);
        LoopGuard(Arc::clone(self))
    }

    pub(super) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once no loop is running.
    pub(super) async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent exit is not missed.
            let notified = self.idle.notified();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(super) struct LoopGuard(Arc<LoopTracker>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// One periodic adjustment loop.
pub(super) struct Ramp {
    pub(super) direction: Direction,
    pub(super) switch_id: Arc<str>,
    pub(super) light_id: Arc<str>,
    pub(super) step: u32,
    pub(super) delay: Duration,
    pub(super) flag: Arc<RampFlag>,
    pub(super) generation: u64,
    pub(super) actuator: Arc<dyn Actuator>,
    pub(super) guard: LoopGuard,
}

impl Ramp {
    /// Pulse the light until the flag is cleared. Returns the number of pulses issued.
    pub(super) async fn run(self) -> u64 {
        let Ramp {
            direction,
            switch_id,
            light_id,
            step,
            delay,
            flag,
            generation,
            actuator,
            guard,
        } = self;

        let mut pulses = 0u64;
        while flag.is_current(generation) {
            let signed = direction.signed_step(step);
            if let Err(e) = actuator.adjust_brightness(&light_id, signed).await {
                warn!(
                    "[{}] Adjusting {} by {} failed, stopping {} ramp: {}",
                    switch_id, light_id, signed, direction, e
                );
                flag.deactivate_generation(generation);
                break;
            }
            pulses += 1;
            tokio::time::sleep(delay).await;
        }

        debug!("[{}] Called {} {} times", switch_id, direction, pulses);
        drop(guard);
        pulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_idle() {
        let flag = RampFlag::default();
        assert!(!flag.is_active());
        assert!(!flag.is_current(0));
    }

    #[test]
    fn test_double_activate_keeps_generation() {
        let flag = RampFlag::default();
        let first = flag.activate();
        let second = flag.activate();

        assert_eq!(first, second);
        assert!(flag.is_current(first));
    }

    #[test]
    fn test_stop_then_start_retires_old_generation() {
        let flag = RampFlag::default();
        let old = flag.activate();
        assert!(flag.deactivate());
        let new = flag.activate();

        assert_ne!(old, new);
        assert!(!flag.is_current(old));
        assert!(flag.is_current(new));
    }

    #[test]
    fn test_deactivate_idle_is_noop() {
        let flag = RampFlag::default();
        assert!(!flag.deactivate());
        assert!(!flag.deactivate());
        assert_eq!(flag.activate(), 0);
    }

    #[test]
    fn test_stale_generation_cannot_clear_flag() {
        let flag = RampFlag::default();
        let old = flag.activate();
        flag.deactivate();
        let new = flag.activate();

        assert!(!flag.deactivate_generation(old));
        assert!(flag.is_current(new));
        assert!(flag.deactivate_generation(new));
        assert!(!flag.is_active());
    }

    #[tokio::test]
    async fn test_tracker_waits_for_guards() {
        let tracker = Arc::new(LoopTracker::default());
        tracker.wait_idle().await;

        let guard = tracker.enter();
        assert_eq!(tracker.running(), 1);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(tracker.running(), 0);
    }
}
