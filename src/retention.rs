use crate::api::{Snapshot, SnapshotId};
use crate::naming::{SnapshotClass, SnapshotLabel};

/// How many snapshots of one class to keep for a VM. Keep-counts are
/// configuration, per class and per environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub class: SnapshotClass,
    pub keep: usize,
}

/// A snapshot selected for removal, with its parsed label for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    pub id: SnapshotId,
    pub label: SnapshotLabel,
}

/// Selects the snapshots to evict for one VM under `policy`.
///
/// Only snapshots whose description parses for `vm_name` with the policy's
/// class participate; everything else (other classes, the engine's own
/// "Active VM" entry, free-text descriptions) is left untouched. The newest
/// `keep` labels survive; the rest are returned newest-first so the oldest
/// is the last one processed.
pub fn sweep(snapshots: &[Snapshot], vm_name: &str, policy: &RetentionPolicy) -> Vec<Eviction> {
    let mut matching: Vec<Eviction> = snapshots
        .iter()
        .filter_map(|snapshot| {
            let label = SnapshotLabel::parse_for(&snapshot.description, vm_name)?;
            (label.class == policy.class).then(|| Eviction {
                id: snapshot.id.clone(),
                label,
            })
        })
        .collect();

    matching.sort_by(|a, b| b.label.sort_key().cmp(&a.label.sort_key()));

    if matching.len() <= policy.keep {
        return Vec::new();
    }

    matching.split_off(policy.keep)
}
