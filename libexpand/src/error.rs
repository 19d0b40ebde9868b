//! Expansion error types.
//!
//! All errors in the `libexpand` crate are represented by the [`ExpandError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors can be reported
//! through RK8s control-plane channels.
//!
//! Stale resize requests (volume no longer bound, claim not bound yet, size
//! already satisfied) are *not* errors: they are silently dropped by the
//! reconciler.  Nothing in this crate retries a failed collaborator call;
//! retry happens because the triggering observation (capacity edit, handshake
//! annotation) persists and is re-seen on the next cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for volume-expansion coordination.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum ExpandError {
    /// The storage backend failed to resize the volume.
    #[error("resizing volume {volume} failed: {reason}")]
    ResizeFailed {
        /// Name of the volume being resized.
        volume: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Patching the volume record's capacity failed.
    #[error("patching volume {volume} failed: {reason}")]
    VolumePatchFailed {
        /// Name of the volume being patched.
        volume: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Updating the claim's status failed.
    #[error("updating status of claim {claim} failed: {reason}")]
    ClaimStatusUpdateFailed {
        /// Qualified (`namespace/name`) claim identifier.
        claim: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Fetching a workload record failed.
    #[error("getting workload {workload} failed: {reason}")]
    WorkloadGetFailed {
        /// Qualified (`namespace/name`) workload identifier.
        workload: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Updating a workload record failed.
    #[error("updating workload {workload} failed: {reason}")]
    WorkloadUpdateFailed {
        /// Qualified (`namespace/name`) workload identifier.
        workload: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An optimistic-concurrency update was rejected because the record
    /// changed underneath.  Callers retry on the next observation cycle.
    #[error("conflict updating {0}: record changed underneath")]
    Conflict(String),

    /// A quantity string could not be parsed.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A transport-level error from the persistent-object store.
    #[error("store error: {0}")]
    Store(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExpandError {
    /// Create an [`ExpandError::ResizeFailed`] carrying the original cause.
    pub fn resize_failed<E: std::fmt::Display>(volume: impl Into<String>, e: E) -> Self {
        Self::ResizeFailed {
            volume: volume.into(),
            reason: e.to_string(),
        }
    }

    /// Create an [`ExpandError::VolumePatchFailed`] carrying the original cause.
    pub fn volume_patch_failed<E: std::fmt::Display>(volume: impl Into<String>, e: E) -> Self {
        Self::VolumePatchFailed {
            volume: volume.into(),
            reason: e.to_string(),
        }
    }

    /// Create an [`ExpandError::ClaimStatusUpdateFailed`] carrying the
    /// original cause.
    pub fn claim_status_update_failed<E: std::fmt::Display>(
        claim: impl Into<String>,
        e: E,
    ) -> Self {
        Self::ClaimStatusUpdateFailed {
            claim: claim.into(),
            reason: e.to_string(),
        }
    }

    /// Create an [`ExpandError::WorkloadGetFailed`] carrying the original cause.
    pub fn workload_get_failed<E: std::fmt::Display>(workload: impl Into<String>, e: E) -> Self {
        Self::WorkloadGetFailed {
            workload: workload.into(),
            reason: e.to_string(),
        }
    }

    /// Create an [`ExpandError::WorkloadUpdateFailed`] carrying the original
    /// cause.
    pub fn workload_update_failed<E: std::fmt::Display>(workload: impl Into<String>, e: E) -> Self {
        Self::WorkloadUpdateFailed {
            workload: workload.into(),
            reason: e.to_string(),
        }
    }

    /// Create an [`ExpandError::Store`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn store<E: std::fmt::Display>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Create an [`ExpandError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}
