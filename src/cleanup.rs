//! `cleanup <pvc|ALL>`: deletes local sender/receiver pods without any
//! network I/O to the remote cluster. Label-gated the same way the
//! command dispatcher's `mountPvc`/`umountPvc` gate deletes on
//! `managed-by=TaoKan`.

use anyhow::Result;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::k8s::KubeFacade;
use crate::model::{is_taokan_owned, sender_pod_name};

pub const ALL: &str = "ALL";

/// Delete every pod in `namespace` whose name starts with `rsync-worker`
/// or `rsync-server` and carries the TaoKan ownership label.
async fn cleanup_all(facade: &KubeFacade, namespace: &str) -> Result<usize> {
    let pods = facade.list_pods(namespace).await?;
    let mut deleted = 0;
    for pod in pods {
        let name = pod.name_any();
        let owned = pod
            .metadata
            .labels
            .as_ref()
            .is_some_and(is_taokan_owned);
        if owned && (name.starts_with("rsync-worker") || name.starts_with("rsync-server")) {
            facade.delete_pod(namespace, &name).await?;
            info!(pod = name, "[Completed] cleanup");
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Delete the sender pod for one PVC. The "found by pods using this PVC"
/// flag from the original command is preserved as dead code: it is
/// declared, never set to true anywhere on this path, and only read by
/// the warning below, so the warning fires unconditionally after the
/// delete attempt regardless of whether a sender pod actually existed.
async fn cleanup_one(facade: &KubeFacade, namespace: &str, pvc: &str) -> Result<()> {
    let pod_name = sender_pod_name(pvc);

    let is_rsync_worker_found = false;

    facade.delete_pod(namespace, &pod_name).await?;
    info!(pod = pod_name, "[Completed] cleanup");

    if !is_rsync_worker_found {
        warn!(pvc, "[Skip] no sender pod found for pvc");
    }

    Ok(())
}

pub async fn run(facade: &KubeFacade, namespace: &str, target: &str) -> Result<()> {
    if target == ALL {
        let deleted = cleanup_all(facade, namespace).await?;
        info!(deleted, "[Completed] cleanup ALL");
        Ok(())
    } else {
        cleanup_one(facade, namespace, target).await
    }
}
