//! The Kubernetes facade: list/get/create/delete over pods and PVCs, plus
//! the pod watch engine. Shared by the client and server roles.
//!
//! Simple filters are free functions over a `&Client`; stateful
//! multi-step operations (`create_pvc`, `delete_pod`, `watch_pod`) are
//! methods on [`KubeFacade`].

pub mod templates;
pub mod watch;

use std::time::Duration;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client, ResourceExt,
};
use tracing::{info, warn};

use crate::error::FacadeError;
use crate::model::{is_taokan_owned, PvcKind};
pub use watch::{watch_pod, WatchTarget};

/// Kubernetes client handle plus the default storage classes used when
/// provisioning destination PVCs.
#[derive(Clone)]
pub struct KubeFacade {
    client: Client,
    storage_class_rwo: Option<String>,
    storage_class_rwx: Option<String>,
}

impl KubeFacade {
    pub fn new(
        client: Client,
        storage_class_rwo: Option<String>,
        storage_class_rwx: Option<String>,
    ) -> Self {
        Self {
            client,
            storage_class_rwo,
            storage_class_rwx,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn list_pvc(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>, FacadeError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    pub async fn list_pvc_by_filter(
        &self,
        namespace: &str,
        predicate: impl Fn(&PersistentVolumeClaim) -> bool,
    ) -> Result<Vec<PersistentVolumeClaim>, FacadeError> {
        Ok(self
            .list_pvc(namespace)
            .await?
            .into_iter()
            .filter(|pvc| predicate(pvc))
            .collect())
    }

    pub async fn list_user_pvc(
        &self,
        namespace: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, FacadeError> {
        self.list_pvc_by_filter(namespace, |pvc| pvc.name_any().starts_with("claim-"))
            .await
    }

    pub async fn list_project_pvc(
        &self,
        namespace: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, FacadeError> {
        self.list_pvc_by_filter(namespace, |pvc| {
            pvc.name_any().starts_with("data-nfs-project")
        })
        .await
    }

    pub async fn list_dataset_pvc(
        &self,
        namespace: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, FacadeError> {
        self.list_pvc_by_filter(namespace, |pvc| {
            pvc.name_any().starts_with("data-nfs-dataset")
        })
        .await
    }

    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, FacadeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Pods whose volume list references `pvc_name` — a bipartite lookup
    /// against a point-in-time snapshot, never cached across calls.
    pub async fn list_pods_using_pvc(
        &self,
        namespace: &str,
        pvc_name: &str,
    ) -> Result<Vec<Pod>, FacadeError> {
        Ok(self
            .list_pods(namespace)
            .await?
            .into_iter()
            .filter(|pod| pod_uses_pvc(pod, pvc_name))
            .collect())
    }

    /// The receiver pod for `pvc_name`, if it exists and is owned by
    /// TaoKan.
    pub async fn get_taokan_pod(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<Pod>, FacadeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get_opt(pod_name).await?;
        Ok(pod.filter(|p| {
            p.metadata
                .labels
                .as_ref()
                .is_some_and(is_taokan_owned)
        }))
    }

    pub async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, FacadeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    /// Create the receiver's companion Service. An "already exists"
    /// response is treated as success, the same idempotent handling as
    /// [`KubeFacade::create_pvc`].
    pub async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, FacadeError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), service).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!(service = %service.name_any(), "[Skip] service already exists");
                api.get(&service.name_any()).await.map_err(FacadeError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `name` and block until the deletion event is observed, or
    /// until a 60s watch window closes. The delete call and
    /// the watch race concurrently so the event isn't lost between issuing
    /// the delete and starting to watch. Missing-pod is not an error.
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), FacadeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let Some(existing) = api.get_opt(name).await? else {
            return Ok(());
        };
        let Some(uid) = existing.metadata.uid.clone() else {
            let _ = api.delete(name, &DeleteParams::default()).await;
            return Ok(());
        };

        let delete_fut = api.delete(name, &DeleteParams::default());
        let watch_fut = kube::runtime::wait::await_condition(
            api.clone(),
            name,
            kube::runtime::conditions::is_deleted(&uid),
        );

        let (delete_res, watch_res) = tokio::join!(delete_fut, async {
            tokio::time::timeout(Duration::from_secs(60), watch_fut).await
        });

        match delete_res {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        match watch_res {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(pod = name, error = %e, "watch for pod deletion failed");
                Ok(())
            }
            Err(_) => {
                warn!(pod = name, "60s watch window closed before deletion event observed");
                Ok(())
            }
        }
    }

    /// Choose a storage class: RWX default if the PVC requests RWX and one
    /// is configured, else the RWO default if configured, else none. An
    /// "already exists" response is treated as success.
    pub async fn create_pvc(
        &self,
        namespace: &str,
        mut pvc: PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, FacadeError> {
        let wants_rwx = pvc
            .spec
            .as_ref()
            .and_then(|s| s.access_modes.as_ref())
            .is_some_and(|modes| modes.iter().any(|m| m == "ReadWriteMany"));

        let storage_class = if wants_rwx {
            self.storage_class_rwx.clone().or_else(|| self.storage_class_rwo.clone())
        } else {
            self.storage_class_rwo.clone()
        };

        if let (Some(class), Some(spec)) = (storage_class, pvc.spec.as_mut()) {
            spec.storage_class_name = Some(class);
        }

        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), &pvc).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!(pvc = %pvc.name_any(), "[Skip] pvc already exists");
                api.get(&pvc.name_any()).await.map_err(FacadeError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_typed_pvc(
        &self,
        kind: PvcKind,
        namespace: &str,
        dest_name: &str,
        capacity: &str,
        access_mode: Option<&str>,
    ) -> Result<PersistentVolumeClaim, FacadeError> {
        let pvc = templates::build_pvc_template(kind, namespace, dest_name, capacity, access_mode)?;
        self.create_pvc(namespace, pvc).await
    }
}

fn pod_uses_pvc(pod: &Pod, pvc_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|volumes| {
            volumes.iter().any(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .is_some_and(|claim| claim.claim_name == pvc_name)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, PodSpec, Volume};

    fn pod_with_volume(claim: &str) -> Pod {
        Pod {
            spec: Some(PodSpec {
                volumes: Some(vec![Volume {
                    name: "data".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_uses_pvc_matches_claim_name() {
        let pod = pod_with_volume("claim-alice");
        assert!(pod_uses_pvc(&pod, "claim-alice"));
        assert!(!pod_uses_pvc(&pod, "claim-bob"));
    }

    #[test]
    fn pod_without_volumes_does_not_match() {
        let pod = Pod::default();
        assert!(!pod_uses_pvc(&pod, "claim-alice"));
    }
}
