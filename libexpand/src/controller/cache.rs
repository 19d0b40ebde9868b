//! Controller-side cache of pending resize requests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::types::{Claim, ClaimUid, ResizeRequest, Volume};

/// In-memory set of claims awaiting an underlying volume resize, keyed by
/// claim uid.
///
/// Producers (the claim-update observation loop) enqueue with
/// [`add_claim_update`]; the reconciler consumes whole batches with
/// [`drain`].  A single exclusive lock guards the backing map and is never
/// held across an external call, so all operations are cheap and an enqueue
/// racing a drain lands either in the returned batch or in the now-empty
/// cache — never nowhere.
///
/// Enqueueing intentionally performs no size-comparison gating.  The store
/// offers no transactions, so after a successful resize the volume record is
/// always updated before the claim; if the claim update is then lost, the
/// re-observed edit re-enqueues a request whose delta the reconciler resolves
/// with a no-op resize pass rather than rejecting it here.
///
/// [`add_claim_update`]: VolumeResizeMap::add_claim_update
/// [`drain`]: VolumeResizeMap::drain
#[derive(Debug, Default)]
pub struct VolumeResizeMap {
    requests: Mutex<HashMap<ClaimUid, ResizeRequest>>,
}

impl VolumeResizeMap {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<ClaimUid, ResizeRequest>> {
        // A poisoned lock only means another thread panicked mid-mutation of
        // a plain map; the map itself is still structurally sound.
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the pending request for a claim.
    ///
    /// `claim` and `volume` are snapshotted; re-enqueueing the same claim uid
    /// replaces the previous entry, which is fine because only the latest
    /// desired size matters.
    pub fn add_claim_update(&self, claim: &Claim, volume: &Volume) {
        let request = ResizeRequest {
            current_size: claim.status.capacity,
            desired_size: claim.requested_capacity,
            claim: claim.clone(),
            volume: volume.clone(),
        };
        debug!(
            claim = %request.qualified_name(),
            current = %request.current_size,
            desired = %request.desired_size,
            "adding claim for resizing",
        );
        self.requests().insert(claim.uid.clone(), request);
    }

    /// Atomically empty the cache and return everything that was present.
    pub fn drain(&self) -> Vec<ResizeRequest> {
        std::mem::take(&mut *self.requests())
            .into_values()
            .collect()
    }

    /// Best-effort removal of a claim's pending request, e.g. when the claim
    /// is deleted.  Absence is not an error, and removal does not affect a
    /// request already drained into an in-flight batch.
    pub fn remove_claim(&self, claim: &Claim) {
        debug!(claim = %claim.qualified_name(), "removing claim from resize map");
        self.requests().remove(&claim.uid);
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.requests().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.requests().is_empty()
    }
}
