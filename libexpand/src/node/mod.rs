//! Node-side expansion: the filesystem-resize cache and the annotation
//! populator that feeds it.

mod cache;
mod populator;

pub use cache::VolumeFsResizeMap;
pub use populator::FsResizePopulator;
