//! Controller-side resize reconciler.
//!
//! Drains the [`VolumeResizeMap`] on a fixed interval and drives each request
//! through the expansion state machine:
//!
//! 1. validate that the volume is still bound to this claim and the claim is
//!    `Bound` (otherwise the request is stale and silently dropped);
//! 2. re-check the size delta against the freshly fetched claim;
//! 3. resize the underlying storage resource;
//! 4. merge-patch the volume record's capacity;
//! 5. update the claim's reported capacity and clear its resize conditions;
//! 6. fan the filesystem-resize handshake annotation out to workloads, at
//!    most one per node.
//!
//! The volume patch (4) always precedes the claim update (5), and the
//! fan-out (6) follows both; every write is idempotent, so a crash or error
//! between steps is healed by reprocessing the re-observed capacity edit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::annotation;
use crate::client::{ClusterClient, MountedNodesIndex, VolumeResizer, WorkloadsInVolumeIndex};
use crate::controller::cache::VolumeResizeMap;
use crate::error::ExpandError;
use crate::patch::create_merge_patch;
use crate::types::{Claim, ClaimPhase, NodeName, Quantity, ResizeRequest, Volume, Workload};

/// Periodic consumer of the controller resize cache.
pub struct ExpandReconciler {
    resize_map: Arc<VolumeResizeMap>,
    client: Arc<dyn ClusterClient>,
    resizer: Arc<dyn VolumeResizer>,
    workloads_index: Arc<dyn WorkloadsInVolumeIndex>,
    mounted_nodes_index: Arc<dyn MountedNodesIndex>,
    sync_interval: Duration,
}

impl ExpandReconciler {
    /// Create a reconciler draining `resize_map` every `sync_interval`.
    pub fn new(
        resize_map: Arc<VolumeResizeMap>,
        client: Arc<dyn ClusterClient>,
        resizer: Arc<dyn VolumeResizer>,
        workloads_index: Arc<dyn WorkloadsInVolumeIndex>,
        mounted_nodes_index: Arc<dyn MountedNodesIndex>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            resize_map,
            client,
            resizer,
            workloads_index,
            mounted_nodes_index,
            sync_interval,
        }
    }

    /// Run the reconcile loop until `stop` fires (or its sender is dropped).
    ///
    /// Cancellation is cooperative: the stop signal is checked between
    /// iterations, and an in-flight batch is allowed to complete.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(interval = ?self.sync_interval, "expand reconciler started");
        let mut ticker = tokio::time::interval(self.sync_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        warn!(error = %e, "resize sync pass failed");
                    }
                }
                _ = stop.changed() => {
                    info!("expand reconciler stopping");
                    return;
                }
            }
        }
    }

    /// Drain the cache and process the whole batch.
    ///
    /// A failing request does not abort the rest of the batch; the first
    /// error is surfaced after every request has been attempted.  Failed
    /// requests are re-enqueued by the next observation of the unchanged
    /// capacity edit, not retried here.
    pub async fn sync(&self) -> Result<(), ExpandError> {
        let mut first_error = None;
        for request in self.resize_map.drain() {
            if let Err(e) = self.process_request(&request).await {
                warn!(
                    claim = %request.qualified_name(),
                    error = %e,
                    "processing resize request failed",
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drive a single request through steps 1–6.
    pub async fn process_request(&self, request: &ResizeRequest) -> Result<(), ExpandError> {
        // Step 1: the volume must still be bound to exactly this claim, and
        // the claim must be bound.  Anything else is a stale request.
        let bound = request.volume.claim_ref.as_ref().is_some_and(|r| {
            r.namespace == request.claim.namespace && r.name == request.claim.name
        });
        if !bound {
            debug!(
                claim = %request.qualified_name(),
                volume = %request.volume.name,
                "volume is not bound to the claim being resized, dropping",
            );
            return Ok(());
        }
        if request.claim.status.phase != ClaimPhase::Bound {
            debug!(claim = %request.qualified_name(), "claim is not bound, dropping");
            return Ok(());
        }

        // Step 2: re-fetch the claim and re-check the delta; a duplicate
        // report or an already-completed resize is dropped silently.
        let Some(claim) = self
            .client
            .get_claim(&request.claim.namespace, &request.claim.name)
            .await
            .map_err(|e| {
                ExpandError::store(format!("getting claim {}: {e}", request.qualified_name()))
            })?
        else {
            debug!(claim = %request.qualified_name(), "claim no longer exists, dropping");
            return Ok(());
        };
        let desired = claim.requested_capacity;
        if claim.status.capacity >= desired {
            debug!(
                claim = %request.qualified_name(),
                observed = %claim.status.capacity,
                desired = %desired,
                "observed size already satisfies the request, dropping",
            );
            return Ok(());
        }

        // Step 3: grow the underlying storage resource.  Backends may round
        // up; everything after this persists the granted size.
        let granted = self
            .resizer
            .resize_volume(&request.volume, desired)
            .await
            .map_err(|e| ExpandError::resize_failed(request.volume.name.as_str(), e))?;

        // Step 4: make the new volume capacity durable before anything
        // reports it.
        self.update_volume_capacity(&request.volume, granted)
            .await?;

        // Step 5: report the capacity on the claim and clear its resize
        // conditions.
        self.mark_as_resized(&claim, granted).await?;

        // Step 6: tell the affected node agents to grow the filesystem.
        self.mark_for_fs_resize(&request.volume).await
    }

    /// Merge-patch the volume record so that only its capacity changes.
    async fn update_volume_capacity(
        &self,
        volume: &Volume,
        new_size: Quantity,
    ) -> Result<(), ExpandError> {
        let mut updated = volume.clone();
        updated.capacity = new_size;

        let old = serde_json::to_value(volume).map_err(ExpandError::internal)?;
        let new = serde_json::to_value(&updated).map_err(ExpandError::internal)?;
        let patch = create_merge_patch(&old, &new);

        self.client
            .patch_volume(&volume.name, &patch)
            .await
            .map_err(|e| ExpandError::volume_patch_failed(volume.name.as_str(), e))
    }

    /// Update the claim's reported capacity and clear resize conditions.
    async fn mark_as_resized(&self, claim: &Claim, new_size: Quantity) -> Result<(), ExpandError> {
        let mut updated = claim.clone();
        updated.status.capacity = new_size;
        updated.status.conditions = Vec::new();

        self.client
            .update_claim_status(&updated)
            .await
            .map_err(|e| ExpandError::claim_status_update_failed(claim.qualified_name(), e))
    }

    /// Fan the handshake annotation out to workloads using the volume.
    ///
    /// The filesystem grow acts at the node/device level, so at most one
    /// workload per node is marked; a workload already carrying the signal
    /// counts as its node being marked.  Workloads without a node assignment
    /// and nodes where the volume is not actually mounted are skipped.  An
    /// update failure aborts the fan-out; workloads marked before the
    /// failure stay marked (idempotent) and the rest are retried on the next
    /// reconciliation pass.
    async fn mark_for_fs_resize(&self, volume: &Volume) -> Result<(), ExpandError> {
        let refs = self.workloads_index.workloads_in_volume(&volume.name);
        if refs.is_empty() {
            debug!(volume = %volume.name, "no workloads use the volume, skipping fs-resize fan-out");
            return Ok(());
        }

        let mounted: HashSet<NodeName> = self
            .mounted_nodes_index
            .mounted_nodes_for_volume(&volume.name)
            .into_iter()
            .collect();

        let annotation_key = annotation::fs_resize_annotation(volume.name.as_str());
        let mut marked_nodes: HashSet<NodeName> = HashSet::new();
        let mut to_mark: Vec<(Workload, NodeName)> = Vec::new();

        for workload_ref in refs {
            let Some(workload) = self
                .client
                .get_workload(&workload_ref.namespace, &workload_ref.name)
                .await
                .map_err(|e| {
                    ExpandError::workload_get_failed(
                        format!("{}/{}", workload_ref.namespace, workload_ref.name),
                        e,
                    )
                })?
            else {
                // The index is eventually consistent; the workload went away.
                debug!(
                    workload = %format!("{}/{}", workload_ref.namespace, workload_ref.name),
                    "workload in volume index no longer exists, skipping",
                );
                continue;
            };

            let Some(node) = workload.node_name.clone() else {
                debug!(
                    workload = %workload.qualified_name(),
                    volume = %volume.name,
                    "workload not scheduled yet, skipping fs-resize mark",
                );
                continue;
            };
            if !mounted.contains(&node) {
                debug!(
                    workload = %workload.qualified_name(),
                    volume = %volume.name,
                    node = %node,
                    "volume not mounted on the workload's node yet, skipping",
                );
                continue;
            }
            if marked_nodes.contains(&node) {
                continue;
            }
            if workload
                .annotations
                .get(&annotation_key)
                .is_some_and(|v| annotation::is_fs_resize_pending(v))
            {
                debug!(
                    workload = %workload.qualified_name(),
                    volume = %volume.name,
                    "workload already marked for fs resize",
                );
                marked_nodes.insert(node);
            } else {
                to_mark.push((workload, node));
            }
        }

        for (mut workload, node) in to_mark {
            if marked_nodes.contains(&node) {
                debug!(
                    workload = %workload.qualified_name(),
                    node = %node,
                    "another workload on the node is already marked, skipping",
                );
                continue;
            }
            workload
                .annotations
                .insert(annotation_key.clone(), annotation::FS_RESIZE_PENDING.into());
            self.client
                .update_workload(&workload)
                .await
                .map_err(|e| ExpandError::workload_update_failed(workload.qualified_name(), e))?;
            debug!(
                workload = %workload.qualified_name(),
                volume = %volume.name,
                node = %node,
                "marked workload for fs resize",
            );
            marked_nodes.insert(node);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::patch::apply_merge_patch;
    use crate::types::{
        ClaimCondition, ClaimConditionKind, ClaimRef, ClaimStatus, VolumeName, WorkloadRef,
        WorkloadStatus,
    };

    fn claim(name: &str, uid: &str, requested: &str, observed: &str, phase: ClaimPhase) -> Claim {
        Claim {
            namespace: "default".into(),
            name: name.into(),
            uid: uid.into(),
            requested_capacity: requested.parse().unwrap(),
            status: ClaimStatus {
                phase,
                capacity: observed.parse().unwrap(),
                conditions: Vec::new(),
            },
        }
    }

    fn volume(name: &str, capacity: &str, claim_name: Option<&str>) -> Volume {
        Volume {
            name: name.into(),
            capacity: capacity.parse().unwrap(),
            claim_ref: claim_name.map(|n| ClaimRef {
                namespace: "default".into(),
                name: n.into(),
            }),
        }
    }

    fn workload(name: &str, uid: &str, node: Option<&str>) -> Workload {
        Workload {
            namespace: "default".into(),
            name: name.into(),
            uid: uid.into(),
            node_name: node.map(Into::into),
            annotations: HashMap::new(),
            status: WorkloadStatus {
                phase: crate::types::WorkloadPhase::Running,
            },
        }
    }

    /// In-memory cluster store plus the two lister indexes.
    #[derive(Default)]
    struct FakeCluster {
        claims: Mutex<HashMap<(String, String), Claim>>,
        volumes: Mutex<HashMap<VolumeName, Value>>,
        workloads: Mutex<HashMap<(String, String), Workload>>,
        workload_refs: Vec<WorkloadRef>,
        mounted_nodes: Vec<NodeName>,
        claim_updates: Mutex<Vec<Claim>>,
        // Workload name whose update call should fail, if any.
        fail_update_of: Option<String>,
    }

    impl FakeCluster {
        fn with_claim(self, c: Claim) -> Self {
            self.claims
                .lock()
                .unwrap()
                .insert((c.namespace.clone(), c.name.clone()), c);
            self
        }

        fn with_volume(self, v: &Volume) -> Self {
            self.volumes
                .lock()
                .unwrap()
                .insert(v.name.clone(), serde_json::to_value(v).unwrap());
            self
        }

        fn with_workload(mut self, w: Workload) -> Self {
            self.workload_refs.push(WorkloadRef {
                namespace: w.namespace.clone(),
                name: w.name.clone(),
            });
            self.workloads
                .lock()
                .unwrap()
                .insert((w.namespace.clone(), w.name.clone()), w);
            self
        }

        fn with_mounted_node(mut self, node: &str) -> Self {
            self.mounted_nodes.push(node.into());
            self
        }

        fn stored_volume(&self, name: &str) -> Volume {
            let value = self.volumes.lock().unwrap()[&VolumeName::from(name)].clone();
            serde_json::from_value(value).unwrap()
        }

        fn stored_workload(&self, name: &str) -> Workload {
            self.workloads.lock().unwrap()[&("default".to_owned(), name.to_owned())].clone()
        }
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn get_claim(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Claim>, ExpandError> {
            Ok(self
                .claims
                .lock()
                .unwrap()
                .get(&(namespace.to_owned(), name.to_owned()))
                .cloned())
        }

        async fn update_claim_status(&self, claim: &Claim) -> Result<(), ExpandError> {
            self.claims
                .lock()
                .unwrap()
                .insert((claim.namespace.clone(), claim.name.clone()), claim.clone());
            self.claim_updates.lock().unwrap().push(claim.clone());
            Ok(())
        }

        async fn patch_volume(
            &self,
            name: &VolumeName,
            patch: &Value,
        ) -> Result<(), ExpandError> {
            let mut volumes = self.volumes.lock().unwrap();
            let current = volumes
                .get(name)
                .ok_or_else(|| ExpandError::store(format!("volume {name} not found")))?;
            let patched = apply_merge_patch(current, patch);
            volumes.insert(name.clone(), patched);
            Ok(())
        }

        async fn get_workload(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Workload>, ExpandError> {
            Ok(self
                .workloads
                .lock()
                .unwrap()
                .get(&(namespace.to_owned(), name.to_owned()))
                .cloned())
        }

        async fn update_workload(&self, workload: &Workload) -> Result<(), ExpandError> {
            if self.fail_update_of.as_deref() == Some(workload.name.as_str()) {
                return Err(ExpandError::store("injected update failure"));
            }
            self.workloads.lock().unwrap().insert(
                (workload.namespace.clone(), workload.name.clone()),
                workload.clone(),
            );
            Ok(())
        }
    }

    impl WorkloadsInVolumeIndex for FakeCluster {
        fn workloads_in_volume(&self, _volume: &VolumeName) -> Vec<WorkloadRef> {
            self.workload_refs.clone()
        }
    }

    impl MountedNodesIndex for FakeCluster {
        fn mounted_nodes_for_volume(&self, _volume: &VolumeName) -> Vec<NodeName> {
            self.mounted_nodes.clone()
        }
    }

    #[derive(Default)]
    struct FakeResizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VolumeResizer for FakeResizer {
        async fn resize_volume(
            &self,
            _volume: &Volume,
            desired: Quantity,
        ) -> Result<Quantity, ExpandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(desired)
        }
    }

    fn reconciler(
        cluster: Arc<FakeCluster>,
        resizer: Arc<FakeResizer>,
    ) -> (Arc<VolumeResizeMap>, ExpandReconciler) {
        let map = Arc::new(VolumeResizeMap::new());
        let r = ExpandReconciler::new(
            Arc::clone(&map),
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            resizer as Arc<dyn VolumeResizer>,
            Arc::clone(&cluster) as Arc<dyn WorkloadsInVolumeIndex>,
            cluster as Arc<dyn MountedNodesIndex>,
            Duration::from_secs(60),
        );
        (map, r)
    }

    #[tokio::test]
    async fn unbound_volume_is_dropped_silently() {
        let c = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Bound);
        let cluster = Arc::new(FakeCluster::default().with_claim(c.clone()));
        let resizer = Arc::new(FakeResizer::default());
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::clone(&resizer));

        let request = ResizeRequest {
            current_size: c.status.capacity,
            desired_size: c.requested_capacity,
            claim: c,
            volume: volume("pv-a", "1Gi", None),
        };
        r.process_request(&request).await.unwrap();
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn claim_ref_mismatch_is_dropped_silently() {
        let c = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Bound);
        let cluster = Arc::new(FakeCluster::default().with_claim(c.clone()));
        let resizer = Arc::new(FakeResizer::default());
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::clone(&resizer));

        let request = ResizeRequest {
            current_size: c.status.capacity,
            desired_size: c.requested_capacity,
            claim: c,
            volume: volume("pv-a", "1Gi", Some("pvc-other")),
        };
        r.process_request(&request).await.unwrap();
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbound_claim_phase_is_dropped_silently() {
        let c = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Pending);
        let cluster = Arc::new(FakeCluster::default().with_claim(c.clone()));
        let resizer = Arc::new(FakeResizer::default());
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::clone(&resizer));

        let request = ResizeRequest {
            current_size: c.status.capacity,
            desired_size: c.requested_capacity,
            claim: c,
            volume: volume("pv-a", "1Gi", Some("pvc-a")),
        };
        r.process_request(&request).await.unwrap();
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn satisfied_size_is_dropped_silently() {
        // The fresh claim already reports 2Gi: someone else finished the job.
        let fresh = claim("pvc-a", "u1", "2Gi", "2Gi", ClaimPhase::Bound);
        let cluster = Arc::new(FakeCluster::default().with_claim(fresh));
        let resizer = Arc::new(FakeResizer::default());
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::clone(&resizer));

        let stale = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Bound);
        let request = ResizeRequest {
            current_size: stale.status.capacity,
            desired_size: stale.requested_capacity,
            claim: stale,
            volume: volume("pv-a", "1Gi", Some("pvc-a")),
        };
        r.process_request(&request).await.unwrap();
        assert_eq!(resizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resize_patches_volume_then_claim() {
        let mut c = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Bound);
        c.status.conditions = vec![
            ClaimCondition {
                kind: ClaimConditionKind::Resizing,
                message: "resize in progress".into(),
            },
            ClaimCondition {
                kind: ClaimConditionKind::FsResizePending,
                message: "waiting for filesystem grow".into(),
            },
        ];
        let pv = volume("pv-a", "1Gi", Some("pvc-a"));
        let cluster = Arc::new(FakeCluster::default().with_claim(c.clone()).with_volume(&pv));
        let resizer = Arc::new(FakeResizer::default());
        let (map, r) = reconciler(Arc::clone(&cluster), Arc::clone(&resizer));

        map.add_claim_update(&c, &pv);
        r.sync().await.unwrap();

        assert_eq!(resizer.calls.load(Ordering::SeqCst), 1);
        let two_gi: Quantity = "2Gi".parse().unwrap();
        assert_eq!(cluster.stored_volume("pv-a").capacity, two_gi);

        let updates = cluster.claim_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status.capacity, two_gi);
        assert!(updates[0].status.conditions.is_empty());
    }

    #[tokio::test]
    async fn fan_out_marks_one_workload_per_node() {
        let c = claim("pvc-a", "u1", "2Gi", "1Gi", ClaimPhase::Bound);
        let pv = volume("pv-a", "1Gi", Some("pvc-a"));
        let cluster = Arc::new(
            FakeCluster::default()
                .with_claim(c.clone())
                .with_volume(&pv)
                .with_workload(workload("pod-x", "wx", Some("n1")))
                .with_workload(workload("pod-y", "wy", Some("n1")))
                .with_mounted_node("n1"),
        );
        let (map, r) = reconciler(Arc::clone(&cluster), Arc::new(FakeResizer::default()));

        map.add_claim_update(&c, &pv);
        r.sync().await.unwrap();

        let key = annotation::fs_resize_annotation("pv-a");
        let marked = [cluster.stored_workload("pod-x"), cluster.stored_workload("pod-y")]
            .iter()
            .filter(|w| w.annotations.get(&key).map(String::as_str) == Some("yes"))
            .count();
        assert_eq!(marked, 1);
    }

    #[tokio::test]
    async fn already_marked_workload_short_circuits_its_node() {
        let mut marked = workload("pod-x", "wx", Some("n1"));
        marked
            .annotations
            .insert(annotation::fs_resize_annotation("pv-a"), "yes".into());
        let cluster = Arc::new(
            FakeCluster::default()
                .with_workload(marked)
                .with_workload(workload("pod-y", "wy", Some("n1")))
                .with_mounted_node("n1"),
        );
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::new(FakeResizer::default()));

        r.mark_for_fs_resize(&volume("pv-a", "2Gi", Some("pvc-a")))
            .await
            .unwrap();

        let key = annotation::fs_resize_annotation("pv-a");
        assert!(!cluster.stored_workload("pod-y").annotations.contains_key(&key));
    }

    #[tokio::test]
    async fn unscheduled_and_unmounted_workloads_are_skipped() {
        let cluster = Arc::new(
            FakeCluster::default()
                .with_workload(workload("pod-x", "wx", None))
                .with_workload(workload("pod-y", "wy", Some("n2")))
                .with_mounted_node("n1"),
        );
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::new(FakeResizer::default()));

        r.mark_for_fs_resize(&volume("pv-a", "2Gi", Some("pvc-a")))
            .await
            .unwrap();

        let key = annotation::fs_resize_annotation("pv-a");
        assert!(!cluster.stored_workload("pod-x").annotations.contains_key(&key));
        assert!(!cluster.stored_workload("pod-y").annotations.contains_key(&key));
    }

    #[tokio::test]
    async fn fan_out_failure_keeps_earlier_marks() {
        let mut cluster = FakeCluster::default()
            .with_workload(workload("pod-x", "wx", Some("n1")))
            .with_workload(workload("pod-y", "wy", Some("n2")))
            .with_mounted_node("n1")
            .with_mounted_node("n2");
        cluster.fail_update_of = Some("pod-y".into());
        let cluster = Arc::new(cluster);
        let (_, r) = reconciler(Arc::clone(&cluster), Arc::new(FakeResizer::default()));

        let err = r
            .mark_for_fs_resize(&volume("pv-a", "2Gi", Some("pvc-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpandError::WorkloadUpdateFailed { .. }));

        // pod-x was marked before the failure and stays marked.
        let key = annotation::fs_resize_annotation("pv-a");
        assert_eq!(
            cluster.stored_workload("pod-x").annotations.get(&key).map(String::as_str),
            Some("yes"),
        );
    }
}
