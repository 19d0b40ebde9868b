//! Node-side cache of volumes awaiting a filesystem grow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::annotation;
use crate::client::ClusterClient;
use crate::error::ExpandError;
use crate::types::{PendingFsResize, Workload, WorkloadUid};

type PendingByVolume = HashMap<String, PendingFsResize>;

/// In-memory set of (workload, volume) pairs whose filesystem still needs
/// growing, keyed by workload uid and workload-local volume name.
///
/// Entries are created by the populator from observed handshake annotations
/// and drained wholesale by the mount-operation executor.  The populator is
/// level-triggered: as long as the annotation is still present, a drained
/// entry reappears on the next cycle, so an entry's lifetime is "until the
/// next drain", not "until explicitly removed".  The executor must be
/// idempotent and confirm success through [`mark_fs_resized`], which clears
/// the annotation and thereby stops the re-derivation.
///
/// [`mark_fs_resized`]: VolumeFsResizeMap::mark_fs_resized
pub struct VolumeFsResizeMap {
    client: Arc<dyn ClusterClient>,
    workloads: Mutex<HashMap<WorkloadUid, PendingByVolume>>,
}

impl VolumeFsResizeMap {
    /// Create an empty cache backed by `client` for annotation clearing.
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            workloads: Mutex::new(HashMap::new()),
        }
    }

    fn workloads(&self) -> MutexGuard<'_, HashMap<WorkloadUid, PendingByVolume>> {
        self.workloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `volume_name` mounted by `workload` needs a filesystem
    /// grow.  The workload snapshot is owned by the cache; re-adding the same
    /// (workload, volume) pair overwrites the previous snapshot.
    pub fn add_volume_for_workload(&self, volume_name: &str, workload: Workload) {
        debug!(
            volume = volume_name,
            workload = %workload.qualified_name(),
            "pending fs-resize request",
        );
        let uid = workload.uid.clone();
        self.workloads().entry(uid).or_default().insert(
            volume_name.to_owned(),
            PendingFsResize {
                workload,
                volume_name: volume_name.to_owned(),
            },
        );
    }

    /// Atomically empty the cache and return everything that was present.
    pub fn drain(&self) -> Vec<PendingFsResize> {
        std::mem::take(&mut *self.workloads())
            .into_values()
            .flat_map(PendingByVolume::into_values)
            .collect()
    }

    /// Confirm a successful filesystem grow by clearing the workload's
    /// handshake annotation.
    ///
    /// The workload record is re-fetched immediately before the edit so a
    /// concurrent metadata change is not clobbered.  A workload that is gone,
    /// or whose annotation was already cleared, is a silent no-op.
    pub async fn mark_fs_resized(
        &self,
        workload: &Workload,
        volume_name: &str,
    ) -> Result<(), ExpandError> {
        let Some(mut fresh) = self
            .client
            .get_workload(&workload.namespace, &workload.name)
            .await
            .map_err(|e| ExpandError::workload_get_failed(workload.qualified_name(), e))?
        else {
            debug!(
                workload = %workload.qualified_name(),
                "workload gone, nothing to clear",
            );
            return Ok(());
        };

        let key = annotation::fs_resize_annotation(volume_name);
        if fresh.annotations.remove(&key).is_none() {
            debug!(
                workload = %fresh.qualified_name(),
                volume = volume_name,
                "fs-resize annotation already cleared",
            );
            return Ok(());
        }

        self.client
            .update_workload(&fresh)
            .await
            .map_err(|e| ExpandError::workload_update_failed(fresh.qualified_name(), e))
    }
}
