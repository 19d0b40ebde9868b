//! # libexpand — online volume expansion coordination for RK8s
//!
//! `libexpand` coordinates online capacity expansion between the RKS control
//! plane and the per-node agents.  The two sides never call each other: the
//! controller resizes the underlying storage resource and then writes a
//! per-volume handshake annotation onto affected workloads, and each node
//! agent observes that annotation and grows the mounted filesystem.  The
//! crate follows the RK8s architecture conventions (Tokio async runtime,
//! `tracing` for observability, `thiserror` for structured errors).
//!
//! Delivery of the handshake is at-least-once, never exactly-once: the node
//! populator is level-triggered and re-derives its work queue from the
//! annotations every cycle, so consumers must be idempotent and clear the
//! annotation only after a confirmed grow.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: [`Quantity`], claim/volume/workload records, pending-work entries. |
//! | [`error`] | [`ExpandError`] enum covering all failure modes. |
//! | [`annotation`] | Handshake-annotation codec — the controller↔node wire contract. |
//! | [`patch`] | Two-way JSON merge patches for capacity-only volume updates. |
//! | [`client`] | Collaborator trait seams: object store, resizer, listers. |
//! | [`controller`] | [`VolumeResizeMap`] cache and [`ExpandReconciler`] loop. |
//! | [`node`] | [`VolumeFsResizeMap`] cache and [`FsResizePopulator`] loop. |

pub mod annotation;
pub mod client;
pub mod controller;
pub mod error;
pub mod node;
pub mod patch;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::{ExpandReconciler, VolumeResizeMap};
pub use error::ExpandError;
pub use node::{FsResizePopulator, VolumeFsResizeMap};
pub use types::*;
