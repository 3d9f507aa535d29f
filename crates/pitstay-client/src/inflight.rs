use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

/// Set of entity ids with a mutation in flight. At most one per id.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    busy: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Returns `None` if another call already holds it. The id is
    /// released when the guard drops, whether the call succeeded or not.
    pub fn try_acquire(&self, id: Uuid) -> Option<InFlightGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(id) {
            return None;
        }
        Some(InFlightGuard { registry: self.clone(), id })
    }

    pub fn is_busy(&self, id: Uuid) -> bool {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner).contains(&id)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_first_settles() {
        let registry = InFlightRegistry::new();
        let id = Uuid::new_v4();

        let guard = registry.try_acquire(id).unwrap();
        assert!(registry.is_busy(id));
        assert!(registry.try_acquire(id).is_none());
        assert!(registry.try_acquire(Uuid::new_v4()).is_some());

        drop(guard);
        assert!(!registry.is_busy(id));
        assert!(registry.try_acquire(id).is_some());
    }
}
