//! Filesystem-resize handshake annotation codec.
//!
//! The controller and the node agents never call each other: the controller
//! tells a node "this workload's filesystem needs growing" by writing a
//! per-volume annotation onto the workload's own metadata, and the node agent
//! clears it after the grow succeeds.  The key format and the pending
//! sentinel value together form a stable wire contract between the controller
//! and every node agent in the cluster; changing either requires a
//! coordinated rollout.
//!
//! The codec is a pair of exact inverses on valid (non-empty) volume names:
//! [`fs_resize_annotation`] and [`volume_name_from_fs_resize_annotation`].

/// Key prefix for filesystem-resize handshake annotations.
pub const FS_RESIZE_ANNOTATION_PREFIX: &str = "volume.rk8s.io/fs-resize-";

/// The one value that means "a filesystem grow is pending".  Any other value,
/// including absence, means "not pending".
pub const FS_RESIZE_PENDING: &str = "yes";

/// Encode a workload-local volume name into its handshake annotation key.
pub fn fs_resize_annotation(volume_name: &str) -> String {
    format!("{FS_RESIZE_ANNOTATION_PREFIX}{volume_name}")
}

/// Decode an annotation key back into a volume name.
///
/// Returns `None` for any key not produced by [`fs_resize_annotation`];
/// workload metadata carries plenty of unrelated keys and none of them must
/// be misread as a resize signal.
pub fn volume_name_from_fs_resize_annotation(key: &str) -> Option<&str> {
    key.strip_prefix(FS_RESIZE_ANNOTATION_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Whether an annotation value means "grow pending".  Exact match only.
pub fn is_fs_resize_pending(value: &str) -> bool {
    value == FS_RESIZE_PENDING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_roundtrip() {
        for name in ["pv-a", "data", "volume-with-dashes-0"] {
            let key = fs_resize_annotation(name);
            assert_eq!(volume_name_from_fs_resize_annotation(&key), Some(name));
        }
    }

    #[test]
    fn decode_rejects_foreign_keys() {
        assert_eq!(
            volume_name_from_fs_resize_annotation("scheduler.rk8s.io/critical"),
            None
        );
        assert_eq!(volume_name_from_fs_resize_annotation("fs-resize-pv-a"), None);
        // A bare prefix carries no volume name.
        assert_eq!(
            volume_name_from_fs_resize_annotation(FS_RESIZE_ANNOTATION_PREFIX),
            None
        );
    }

    #[test]
    fn pending_is_exact_match() {
        assert!(is_fs_resize_pending("yes"));
        assert!(!is_fs_resize_pending("Yes"));
        assert!(!is_fs_resize_pending("true"));
        assert!(!is_fs_resize_pending(""));
        assert!(!is_fs_resize_pending("yes "));
    }
}
