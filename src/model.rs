//! Data model shared by both the client orchestrator and the server
//! dispatcher: the logical PVC type, a reference to a single PVC as it
//! travels through the pipeline, and the three-group backup set.

use std::fmt;

/// Logical type a source PVC is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PvcKind {
    User,
    Project,
    Dataset,
    Raw,
}

impl fmt::Display for PvcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PvcKind::User => "user",
            PvcKind::Project => "project",
            PvcKind::Dataset => "dataset",
            PvcKind::Raw => "raw",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PvcKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PvcKind::User),
            "project" => Ok(PvcKind::Project),
            "dataset" => Ok(PvcKind::Dataset),
            "raw" => Ok(PvcKind::Raw),
            other => Err(format!("unknown pvc type '{other}'")),
        }
    }
}

/// A source PVC as carried through the client pipeline, plus everything
/// needed to reconstruct the destination PVC on the server.
#[derive(Debug, Clone)]
pub struct PvcRef {
    pub namespace: String,
    /// Name of the PVC on the source cluster.
    pub source_name: String,
    /// Logical name after stripping the group's naming convention, used to
    /// derive the destination PVC name on the server.
    pub logical_name: String,
    pub kind: PvcKind,
    /// Canonical storage quantity string, e.g. "10Gi".
    pub capacity: String,
    /// Only set (and required) for `Raw` PVCs; other kinds infer it from
    /// their template.
    pub access_mode: Option<String>,
}

impl PvcRef {
    /// Destination PVC name on the server cluster, derived from the
    /// group's naming convention.
    pub fn dest_name(&self) -> String {
        match self.kind {
            PvcKind::User => format!("claim-{}", self.logical_name),
            PvcKind::Project => format!("data-nfs-project-{}-0", self.logical_name),
            PvcKind::Dataset => format!("data-nfs-dataset-{}-0", self.logical_name),
            PvcKind::Raw => self.logical_name.clone(),
        }
    }
}

/// Deterministic receiver pod name: the deduplication key for idempotent
/// re-runs.
pub fn receiver_pod_name(pvc_name: &str) -> String {
    format!("rsync-server-{pvc_name}")
}

/// Deterministic sender pod name.
pub fn sender_pod_name(pvc_name: &str) -> String {
    format!("rsync-worker-{pvc_name}")
}

pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "TaoKan";
pub const ROLE_LABEL: &str = "role";
pub const ROLE_RSYNC_SERVER: &str = "rsync-server";
pub const ROLE_RSYNC_WORKER: &str = "rsync-worker";
pub const MOUNT_PVC_LABEL: &str = "mountPvc";

/// True iff a pod carries the `managed-by=TaoKan` label — the sole
/// authorization check for TaoKan-initiated deletes.
pub fn is_taokan_owned(labels: &std::collections::BTreeMap<String, String>) -> bool {
    labels
        .get(MANAGED_BY_LABEL)
        .is_some_and(|v| v == MANAGED_BY_VALUE)
}

/// The three ordered groups produced by the selection engine.
#[derive(Debug, Default, Clone)]
pub struct BackupSet {
    pub users: Vec<PvcRef>,
    pub projects: Vec<PvcRef>,
    pub datasets: Vec<PvcRef>,
}

impl BackupSet {
    /// Groups in the fixed processing order: users, projects, datasets.
    pub fn groups(&self) -> [(PvcKind, &[PvcRef]); 3] {
        [
            (PvcKind::User, &self.users),
            (PvcKind::Project, &self.projects),
            (PvcKind::Dataset, &self.datasets),
        ]
    }

    pub fn total(&self) -> usize {
        self.users.len() + self.projects.len() + self.datasets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_name_follows_naming_invariants() {
        let mk = |kind, logical: &str| PvcRef {
            namespace: "hub".into(),
            source_name: "src".into(),
            logical_name: logical.into(),
            kind,
            capacity: "1Gi".into(),
            access_mode: None,
        };
        assert_eq!(mk(PvcKind::User, "alice").dest_name(), "claim-alice");
        assert_eq!(
            mk(PvcKind::Project, "teamA").dest_name(),
            "data-nfs-project-teamA-0"
        );
        assert_eq!(
            mk(PvcKind::Dataset, "imagenet").dest_name(),
            "data-nfs-dataset-imagenet-0"
        );
        assert_eq!(mk(PvcKind::Raw, "raw-claim").dest_name(), "raw-claim");
    }

    #[test]
    fn pod_names_are_deterministic() {
        assert_eq!(receiver_pod_name("claim-alice"), "rsync-server-claim-alice");
        assert_eq!(sender_pod_name("claim-alice"), "rsync-worker-claim-alice");
    }

    #[test]
    fn taokan_ownership_checks_label_value() {
        let mut labels = std::collections::BTreeMap::new();
        assert!(!is_taokan_owned(&labels));
        labels.insert(MANAGED_BY_LABEL.to_string(), "someone-else".to_string());
        assert!(!is_taokan_owned(&labels));
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        assert!(is_taokan_owned(&labels));
    }
}
