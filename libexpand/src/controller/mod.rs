//! Controller-side expansion: the pending-resize cache and the reconciler
//! that drains it.

mod cache;
mod reconciler;

pub use cache::VolumeResizeMap;
pub use reconciler::ExpandReconciler;
