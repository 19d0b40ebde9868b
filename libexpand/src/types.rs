//! Core expansion types: quantities, claim/volume/workload records, and the
//! pending-work entries held by the two resize caches.
//!
//! These types form the data model shared by the controller-side and
//! node-side components.  They are all [`Serialize`]/[`Deserialize`] so they
//! can cross the persistent-object store as JSON, and every record obtained
//! from a collaborator is treated as an immutable snapshot: local edits
//! always happen on an owned clone before being sent back through an
//! update/patch call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExpandError;

// ---------------------------------------------------------------------------
// Quantities
// ---------------------------------------------------------------------------

/// A storage quantity in bytes, compared by value.
///
/// Parses and renders the binary suffixes `Ki`, `Mi`, `Gi`, and `Ti`
/// (`"1Gi"`, `"512Mi"`); a bare number is taken as bytes.  [`Display`]
/// renders the largest suffix that divides the value exactly, so
/// `Quantity::from_str` and `to_string` are inverses on canonical input.
///
/// [`Display`]: std::fmt::Display
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Quantity(u64);

const BINARY_SUFFIXES: [(&str, u64); 4] = [
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

impl Quantity {
    /// Construct a quantity from a raw byte count.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// The raw byte count.
    pub const fn as_bytes(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, scale) in BINARY_SUFFIXES {
            if self.0 != 0 && self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl FromStr for Quantity {
    type Err = ExpandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for (suffix, scale) in BINARY_SUFFIXES {
            if let Some(number) = s.strip_suffix(suffix) {
                let value: u64 = number
                    .parse()
                    .map_err(|_| ExpandError::InvalidQuantity(s.to_owned()))?;
                return value
                    .checked_mul(scale)
                    .map(Quantity)
                    .ok_or_else(|| ExpandError::InvalidQuantity(s.to_owned()));
            }
        }
        s.parse()
            .map(Quantity)
            .map_err(|_| ExpandError::InvalidQuantity(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Durable unique identifier of a claim.  Namespace/name pairs can be reused
/// after deletion; the uid cannot, so it keys the controller resize cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClaimUid(pub String);

impl fmt::Display for ClaimUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClaimUid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Durable unique identifier of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkloadUid(pub String);

impl fmt::Display for WorkloadUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadUid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Cluster-wide unique name of a volume record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeName(pub String);

impl VolumeName {
    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeName(pub String);

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// Phase of a claim's binding lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimPhase {
    /// Not yet bound to a volume.
    Pending,
    /// Bound 1:1 to a volume.
    Bound,
    /// The bound volume was lost.
    Lost,
}

/// Kind of a claim status condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimConditionKind {
    /// The underlying volume is being resized.
    Resizing,
    /// The volume was resized but a filesystem grow is still pending.
    FsResizePending,
}

/// A single claim status condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimCondition {
    /// What this condition reports.
    pub kind: ClaimConditionKind,
    /// Human-readable detail.
    pub message: String,
}

/// Last-reported state of a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimStatus {
    /// Binding phase.
    pub phase: ClaimPhase,
    /// Actual capacity last observed for the bound volume.
    pub capacity: Quantity,
    /// Resize-related conditions; cleared wholesale once a resize completes.
    #[serde(default)]
    pub conditions: Vec<ClaimCondition>,
}

/// A user-facing request for storage capacity, bound 1:1 to a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    /// Namespace the claim lives in.
    pub namespace: String,
    /// Claim name, unique within its namespace.
    pub name: String,
    /// Durable unique identifier.
    pub uid: ClaimUid,
    /// Desired capacity requested by the user.
    pub requested_capacity: Quantity,
    /// Last-reported status.
    pub status: ClaimStatus,
}

impl Claim {
    /// `namespace/name` identifier used in logs and errors.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// Reference from a volume back to the claim it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimRef {
    /// Namespace of the bound claim.
    pub namespace: String,
    /// Name of the bound claim.
    pub name: String,
}

/// The cluster's record of a concrete storage resource backing a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Cluster-wide unique name.
    pub name: VolumeName,
    /// Provisioned capacity.
    pub capacity: Quantity,
    /// The claim this volume is bound to, if any.
    pub claim_ref: Option<ClaimRef>,
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

/// Phase of a workload's lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkloadPhase {
    /// Accepted but not all containers are running yet.
    Pending,
    /// At least one container is running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
}

impl WorkloadPhase {
    /// Whether the workload is exiting or gone.  No filesystem work is
    /// scheduled for terminal workloads.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Last-reported state of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Lifecycle phase.
    pub phase: WorkloadPhase,
}

/// A scheduled unit of compute that mounts volumes via claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    /// Namespace the workload lives in.
    pub namespace: String,
    /// Workload name, unique within its namespace.
    pub name: String,
    /// Durable unique identifier.
    pub uid: WorkloadUid,
    /// Node the workload is scheduled to; `None` until scheduling happens.
    pub node_name: Option<NodeName>,
    /// Free-form metadata; carries the filesystem-resize handshake signal.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Last-reported status.
    pub status: WorkloadStatus,
}

impl Workload {
    /// `namespace/name` identifier used in logs and errors.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Namespace/name reference to a workload, as produced by the
/// pods-in-volume index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    /// Namespace of the workload.
    pub namespace: String,
    /// Name of the workload.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Pending-work entries
// ---------------------------------------------------------------------------

/// A claim awaiting an underlying volume resize, held by the controller-side
/// cache.  Snapshots are immutable once enqueued; re-enqueueing the same
/// claim uid overwrites the previous entry (only the latest desired size
/// matters).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResizeRequest {
    /// The claim that needs resizing, as observed at enqueue time.
    pub claim: Claim,
    /// The volume bound to the claim.
    pub volume: Volume,
    /// Actual size last observed for the claim.
    pub current_size: Quantity,
    /// Desired size requested by the capacity edit.
    pub desired_size: Quantity,
}

impl ResizeRequest {
    /// Cache key: the claim's durable unique identifier.
    pub fn claim_uid(&self) -> &ClaimUid {
        &self.claim.uid
    }

    /// `namespace/name` identifier used in logs and errors.
    pub fn qualified_name(&self) -> String {
        self.claim.qualified_name()
    }
}

/// One workload's volume awaiting a filesystem grow, held by the node-side
/// cache.  The workload is a deep copy taken at observation time so the
/// cache never aliases mutable state held elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingFsResize {
    /// Deep copy of the workload at observation time.
    pub workload: Workload,
    /// Workload-local logical name of the volume to grow.
    pub volume_name: String,
}
