//! Node-side populator of the filesystem-resize cache.
//!
//! Periodically re-derives the cache's desired content from the handshake
//! annotations currently present on the node's workloads.  The loop is
//! level-triggered and performs no removal: a signal still present on the
//! next cycle recreates the entry even if a previous drain already handed it
//! to the executor.  That is the at-least-once contract — the executor must
//! be idempotent and clears the signal only after a confirmed grow, which is
//! what finally stops the re-derivation.
//!
//! The populator does not verify that drained workloads still exist; the
//! executor consults the node's actual mount state and skips requests whose
//! workload is gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::annotation;
use crate::client::{WorkloadManager, WorkloadStatusProvider};
use crate::node::cache::VolumeFsResizeMap;
use crate::types::Workload;

/// Periodic producer for the node-side [`VolumeFsResizeMap`].
pub struct FsResizePopulator {
    loop_sleep: Duration,
    workload_manager: Arc<dyn WorkloadManager>,
    status_provider: Arc<dyn WorkloadStatusProvider>,
    resize_map: Arc<VolumeFsResizeMap>,
}

impl FsResizePopulator {
    /// Create a populator scanning every `loop_sleep`.
    pub fn new(
        loop_sleep: Duration,
        workload_manager: Arc<dyn WorkloadManager>,
        status_provider: Arc<dyn WorkloadStatusProvider>,
        resize_map: Arc<VolumeFsResizeMap>,
    ) -> Self {
        Self {
            loop_sleep,
            workload_manager,
            status_provider,
            resize_map,
        }
    }

    /// Run the populate loop until `stop` fires (or its sender is dropped).
    ///
    /// The stop signal is checked between iterations, never mid-scan.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(interval = ?self.loop_sleep, "fs-resize populator started");
        let mut ticker = tokio::time::interval(self.loop_sleep);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.populate(),
                _ = stop.changed() => {
                    info!("fs-resize populator stopping");
                    return;
                }
            }
        }
    }

    /// One scan: enqueue a cache entry for every pending handshake signal on
    /// every non-terminal workload.
    pub fn populate(&self) {
        for workload in self.workload_manager.workloads() {
            if self.is_terminated(&workload) {
                // No filesystem work for a workload that is exiting or gone.
                continue;
            }
            self.process_workload_annotations(&workload);
        }
    }

    fn is_terminated(&self, workload: &Workload) -> bool {
        let status = self
            .status_provider
            .workload_status(&workload.uid)
            .unwrap_or_else(|| workload.status.clone());
        status.phase.is_terminal()
    }

    fn process_workload_annotations(&self, workload: &Workload) {
        for (key, value) in &workload.annotations {
            if let Some(volume_name) = annotation::volume_name_from_fs_resize_annotation(key)
                && annotation::is_fs_resize_pending(value)
            {
                self.resize_map
                    .add_volume_for_workload(volume_name, workload.clone());
            }
        }
    }
}
