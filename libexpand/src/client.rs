//! Collaborator trait seams.
//!
//! The coordination layer never talks to the API server, the storage backend,
//! or the kubelet bookkeeping structures directly; everything it needs from
//! the outside world arrives through the traits in this module.  Concrete
//! implementations live with the control plane / node agent wiring, and every
//! record they hand out is an owned snapshot: callers clone before mutating
//! and send edits back through an update or patch call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExpandError;
use crate::types::{
    Claim, NodeName, Quantity, Volume, VolumeName, Workload, WorkloadRef, WorkloadStatus,
    WorkloadUid,
};

/// Read/write access to the persistent claim, volume, and workload records.
///
/// Updates use optimistic concurrency: an implementation must reject a write
/// when the record changed underneath ([`ExpandError::Conflict`]).  Nothing
/// in this crate retries such a rejection; the triggering observation is
/// re-seen on the next cycle.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a claim by namespace and name.  `Ok(None)` when it no longer
    /// exists.
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Claim>, ExpandError>;

    /// Replace a claim's status (reported capacity and condition list).
    async fn update_claim_status(&self, claim: &Claim) -> Result<(), ExpandError>;

    /// Apply a two-way merge patch to a volume record.  The reconciler only
    /// ever patches the capacity field.
    async fn patch_volume(&self, name: &VolumeName, patch: &Value) -> Result<(), ExpandError>;

    /// Fetch a workload by namespace and name.  `Ok(None)` when it no longer
    /// exists.
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, ExpandError>;

    /// Update a workload record (metadata-only edits).
    async fn update_workload(&self, workload: &Workload) -> Result<(), ExpandError>;
}

/// Storage-specific volume resize operation.
#[async_trait]
pub trait VolumeResizer: Send + Sync {
    /// Grow the underlying storage resource to at least `desired`.
    ///
    /// Returns the size actually granted, which may exceed `desired` when the
    /// backend rounds up.  Must be idempotent: resizing a volume that already
    /// meets `desired` is a no-op returning the current size.
    async fn resize_volume(
        &self,
        volume: &Volume,
        desired: Quantity,
    ) -> Result<Quantity, ExpandError>;
}

/// Lister-style index answering "which workloads use this volume".
pub trait WorkloadsInVolumeIndex: Send + Sync {
    /// All workloads currently using the volume.  Order is unspecified.
    fn workloads_in_volume(&self, volume: &VolumeName) -> Vec<WorkloadRef>;
}

/// Lister-style index answering "which nodes have this volume mounted".
pub trait MountedNodesIndex: Send + Sync {
    /// All nodes the volume is actually mounted on.
    fn mounted_nodes_for_volume(&self, volume: &VolumeName) -> Vec<NodeName>;
}

/// Node-local registry of all currently-known workloads.
pub trait WorkloadManager: Send + Sync {
    /// Snapshot of every workload the node agent knows about.
    fn workloads(&self) -> Vec<Workload>;
}

/// Most recent observed status for a workload, where available.
pub trait WorkloadStatusProvider: Send + Sync {
    /// `None` when no status has been observed yet; callers fall back to the
    /// workload's own last-reported status.
    fn workload_status(&self, uid: &WorkloadUid) -> Option<WorkloadStatus>;
}
