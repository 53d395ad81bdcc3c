//! Process-wide active-cycle accounting.
//!
//! The counter is shared by the orchestrator (increments around each
//! cycle), the config cache (refuses reloads while non-zero) and the
//! shutdown drain controller (waits for zero before exit).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to the shared active-cycle counter.
#[derive(Debug, Clone, Default)]
pub struct ActiveCycleCounter {
    count: Arc<AtomicU64>,
}

impl ActiveCycleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Mark a cycle as in flight. The returned guard decrements on drop,
    /// so every exit path of the cycle (including panics and early
    /// returns) releases its slot.
    pub fn enter(&self) -> ActiveCycleGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        ActiveCycleGuard {
            count: Arc::clone(&self.count),
        }
    }
}

pub struct ActiveCycleGuard {
    count: Arc<AtomicU64>,
}

impl Drop for ActiveCycleGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let counter = ActiveCycleCounter::new();
        assert_eq!(counter.count(), 0);

        let first = counter.enter();
        let second = counter.enter();
        assert_eq!(counter.count(), 2);

        drop(first);
        assert_eq!(counter.count(), 1);
        drop(second);
        assert_eq!(counter.count(), 0);
    }
}
