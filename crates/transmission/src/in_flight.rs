//! In-flight registry - at most one network attempt per transmission id

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::TransmissionId;

type IdSet = Arc<Mutex<HashSet<TransmissionId>>>;

fn lock(ids: &IdSet) -> MutexGuard<'_, HashSet<TransmissionId>> {
    ids.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set of transmission ids currently owned by a network attempt
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    ids: IdSet,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`; `None` when another attempt already owns it
    pub fn try_claim(&self, id: TransmissionId) -> Option<InFlightClaim> {
        if lock(&self.ids).insert(id) {
            Some(InFlightClaim {
                id,
                ids: Arc::clone(&self.ids),
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, id: TransmissionId) -> bool {
        lock(&self.ids).contains(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ownership of one in-flight id, released on drop
#[derive(Debug)]
pub struct InFlightClaim {
    id: TransmissionId,
    ids: IdSet,
}

impl InFlightClaim {
    pub fn id(&self) -> TransmissionId {
        self.id
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        lock(&self.ids).remove(&self.id);
    }
}
