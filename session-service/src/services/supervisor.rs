//! Single-slot guard for session loads.
//!
//! At most one load runs at a time. What happens to a load that arrives while
//! the slot is taken depends on [`BusyPolicy`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Discard the new load.
    #[default]
    Drop,
    /// Remember the newest load and run it once the current one finishes.
    Coalesce,
}

struct SlotState<T> {
    busy: bool,
    deferred: Option<T>,
}

pub struct LoadSupervisor<T> {
    policy: BusyPolicy,
    state: Mutex<SlotState<T>>,
}

pub enum Admission<T> {
    /// The slot is yours; it is released when the guard is finished or dropped.
    Acquired(LoadSlot<T>, T),
    Dropped,
    Deferred,
}

impl<T> LoadSupervisor<T> {
    pub fn new(policy: BusyPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            state: Mutex::new(SlotState {
                busy: false,
                deferred: None,
            }),
        })
    }

    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn try_acquire(self: &Arc<Self>, value: T) -> Admission<T> {
        let mut state = self.lock();
        if !state.busy {
            state.busy = true;
            return Admission::Acquired(
                LoadSlot {
                    supervisor: Arc::clone(self),
                    released: false,
                },
                value,
            );
        }

        match self.policy {
            BusyPolicy::Drop => Admission::Dropped,
            BusyPolicy::Coalesce => {
                state.deferred = Some(value);
                Admission::Deferred
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of holding the slot.
pub struct LoadSlot<T> {
    supervisor: Arc<LoadSupervisor<T>>,
    released: bool,
}

impl<T> LoadSlot<T> {
    /// Hand over a deferred load while keeping the slot, or release the slot
    /// when nothing is waiting. Both happen under one lock so a load arriving
    /// in between is never lost.
    pub fn next_deferred(&mut self) -> Option<T> {
        if self.released {
            return None;
        }

        let mut state = self.supervisor.lock();
        match state.deferred.take() {
            Some(next) => Some(next),
            None => {
                state.busy = false;
                self.released = true;
                None
            }
        }
    }
}

impl<T> Drop for LoadSlot<T> {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.supervisor.lock();
            state.busy = false;
            state.deferred = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_policy_rejects_while_busy() {
        let supervisor = LoadSupervisor::new(BusyPolicy::Drop);
        let Admission::Acquired(mut slot, first) = supervisor.try_acquire("u1") else {
            panic!("slot should be free");
        };
        assert_eq!(first, "u1");
        assert!(matches!(supervisor.try_acquire("u2"), Admission::Dropped));

        assert_eq!(slot.next_deferred(), None);
        assert!(!supervisor.is_busy());
        assert!(matches!(supervisor.try_acquire("u3"), Admission::Acquired(..)));
    }

    #[test]
    fn coalesce_policy_keeps_only_the_newest() {
        let supervisor = LoadSupervisor::new(BusyPolicy::Coalesce);
        let Admission::Acquired(mut slot, _) = supervisor.try_acquire("u1") else {
            panic!("slot should be free");
        };
        assert!(matches!(supervisor.try_acquire("u2"), Admission::Deferred));
        assert!(matches!(supervisor.try_acquire("u3"), Admission::Deferred));

        assert_eq!(slot.next_deferred(), Some("u3"));
        assert!(supervisor.is_busy());
        assert_eq!(slot.next_deferred(), None);
        assert!(!supervisor.is_busy());
    }

    #[test]
    fn dropping_the_slot_releases_it() {
        let supervisor = LoadSupervisor::new(BusyPolicy::Coalesce);
        {
            let _slot = supervisor.try_acquire(1);
            assert!(supervisor.is_busy());
        }
        assert!(!supervisor.is_busy());
    }
}
