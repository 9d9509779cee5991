//! Embedded YAML templates, stamped with name/namespace/labels/annotations/
//! capacity/access-mode/env at pod- and PVC-creation time. All other
//! fields pass through untouched — the templates are opaque inputs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EnvVar, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, Service, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::TemplateError;
use crate::model::{
    PvcKind, MANAGED_BY_LABEL, MANAGED_BY_VALUE, MOUNT_PVC_LABEL, ROLE_LABEL, ROLE_RSYNC_SERVER,
    ROLE_RSYNC_WORKER,
};

const RSYNC_SERVER_TEMPLATE: &str = include_str!("../../templates/rsync-server.yaml");
const RSYNC_WORKER_TEMPLATE: &str = include_str!("../../templates/rsync-worker.yaml");
const USER_PVC_TEMPLATE: &str = include_str!("../../templates/user-pvc-template.yaml");
const VOLUME_PVC_TEMPLATE: &str = include_str!("../../templates/volume-pvc-template.yaml");

fn taokan_labels(role: &str, pvc_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (ROLE_LABEL.to_string(), role.to_string()),
        (MOUNT_PVC_LABEL.to_string(), pvc_name.to_string()),
    ])
}

/// Build the receiver pod + its companion Service from `rsync-server.yaml`,
/// stamping name/namespace/labels and the PVC volume claim name.
pub fn build_receiver_pod(
    namespace: &str,
    dest_pvc_name: &str,
) -> Result<(Pod, Service), TemplateError> {
    let mut docs = serde_yaml::Deserializer::from_str(RSYNC_SERVER_TEMPLATE);
    let pod_doc = docs
        .next()
        .ok_or(TemplateError::NoContainer("rsync-server.yaml"))?;
    let svc_doc = docs
        .next()
        .ok_or(TemplateError::NoContainer("rsync-server.yaml"))?;

    let mut pod: Pod =
        serde::Deserialize::deserialize(pod_doc).map_err(|source| TemplateError::Parse {
            name: "rsync-server.yaml",
            source,
        })?;
    let mut service: Service =
        serde::Deserialize::deserialize(svc_doc).map_err(|source| TemplateError::Parse {
            name: "rsync-server.yaml",
            source,
        })?;

    let pod_name = crate::model::receiver_pod_name(dest_pvc_name);

    pod.metadata = ObjectMeta {
        name: Some(pod_name.clone()),
        namespace: Some(namespace.to_string()),
        labels: Some(taokan_labels(ROLE_RSYNC_SERVER, dest_pvc_name)),
        ..Default::default()
    };
    let spec = pod.spec.get_or_insert(Default::default());
    let volumes = spec.volumes.get_or_insert(Default::default());
    if let Some(v) = volumes.first_mut() {
        v.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
            claim_name: dest_pvc_name.to_string(),
            read_only: Some(false),
        });
    }

    service.metadata = ObjectMeta {
        name: Some(pod_name),
        namespace: Some(namespace.to_string()),
        labels: Some(taokan_labels(ROLE_RSYNC_SERVER, dest_pvc_name)),
        ..Default::default()
    };

    Ok((pod, service))
}

/// Build the sender pod from `rsync-worker.yaml`, stamping name/namespace/
/// labels, the PVC volume, env vars, and the restart policy.
pub fn build_sender_pod(
    namespace: &str,
    source_pvc_name: &str,
    remote_host: &str,
    remote_namespace: &str,
    retry: u32,
) -> Result<Pod, TemplateError> {
    let mut pod: Pod = serde_yaml::from_str(RSYNC_WORKER_TEMPLATE).map_err(|source| {
        TemplateError::Parse {
            name: "rsync-worker.yaml",
            source,
        }
    })?;

    let pod_name = crate::model::sender_pod_name(source_pvc_name);
    pod.metadata = ObjectMeta {
        name: Some(pod_name.clone()),
        namespace: Some(namespace.to_string()),
        labels: Some(taokan_labels(ROLE_RSYNC_WORKER, source_pvc_name)),
        ..Default::default()
    };

    let spec = pod.spec.get_or_insert(Default::default());
    let volumes = spec.volumes.get_or_insert(Default::default());
    if let Some(v) = volumes.first_mut() {
        v.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
            claim_name: source_pvc_name.to_string(),
            read_only: Some(false),
        });
    }

    if retry == 0 {
        spec.restart_policy = Some("Never".to_string());
    }

    let remote_server_name = crate::model::receiver_pod_name(source_pvc_name);
    for container in &mut spec.containers {
        let env = container.env.get_or_insert(Default::default());
        set_env(env, "REMOTE_K8S_CLUSTER", remote_host);
        set_env(env, "REMOTE_SERVER_NAME", &remote_server_name);
        set_env(env, "REMOTE_NAMESPACE", remote_namespace);
    }

    Ok(pod)
}

fn set_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    if let Some(existing) = env.iter_mut().find(|e| e.name == name) {
        existing.value = Some(value.to_string());
    } else {
        env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        });
    }
}

/// Rewrite a sender pod's container image to `<registry>/<image>:<tag>`
/// using the process's registry/tag configuration.
pub fn rewrite_image(pod: &mut Pod, registry: &str, tag: &str, pull_policy: &str) {
    if let Some(spec) = pod.spec.as_mut() {
        for container in &mut spec.containers {
            if let Some(image) = &container.image {
                let base_name = image.rsplit('/').next().unwrap_or(image);
                let repo_name = base_name.split(':').next().unwrap_or(base_name);
                container.image = Some(format!("{registry}/{repo_name}:{tag}"));
            }
            container.image_pull_policy = Some(pull_policy.to_string());
        }
    }
}

/// Stamp a PVC template (`user-pvc-template.yaml` for [`PvcKind::User`],
/// `volume-pvc-template.yaml` for everything else) with name/namespace/
/// labels/capacity/access-mode. The storage class is left to the caller
/// (`KubeFacade::create_pvc`).
pub fn build_pvc_template(
    kind: PvcKind,
    namespace: &str,
    dest_name: &str,
    capacity: &str,
    access_mode: Option<&str>,
) -> Result<PersistentVolumeClaim, TemplateError> {
    let (template, template_name) = match kind {
        PvcKind::User => (USER_PVC_TEMPLATE, "user-pvc-template.yaml"),
        PvcKind::Project | PvcKind::Dataset | PvcKind::Raw => {
            (VOLUME_PVC_TEMPLATE, "volume-pvc-template.yaml")
        }
    };

    let mut pvc: PersistentVolumeClaim = serde_yaml::from_str(template).map_err(|source| {
        TemplateError::Parse {
            name: template_name,
            source,
        }
    })?;

    pvc.metadata = ObjectMeta {
        name: Some(dest_name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    };

    let spec = pvc.spec.get_or_insert(Default::default());
    let requests = spec
        .resources
        .get_or_insert(Default::default())
        .requests
        .get_or_insert(Default::default());
    requests.insert("storage".to_string(), Quantity(capacity.to_string()));

    if let Some(mode) = access_mode {
        spec.access_modes = Some(vec![mode.to_string()]);
    }

    Ok(pvc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sender_pod_stamps_env_and_names() {
        let pod = build_sender_pod("hub", "claim-alice", "10.0.0.5", "hub", 3).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("rsync-worker-claim-alice"));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
        let env = spec.containers[0].env.as_ref().unwrap();
        let get = |n: &str| env.iter().find(|e| e.name == n).unwrap().value.clone().unwrap();
        assert_eq!(get("REMOTE_K8S_CLUSTER"), "10.0.0.5");
        assert_eq!(get("REMOTE_SERVER_NAME"), "rsync-server-claim-alice");
        assert_eq!(get("REMOTE_NAMESPACE"), "hub");
    }

    #[test]
    fn build_sender_pod_forces_never_restart_when_retry_is_zero() {
        let pod = build_sender_pod("hub", "claim-alice", "10.0.0.5", "hub", 0).unwrap();
        assert_eq!(
            pod.spec.unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn build_pvc_template_stamps_capacity_and_access_mode() {
        let pvc =
            build_pvc_template(PvcKind::Raw, "hub", "raw-claim", "1Gi", Some("ReadWriteMany"))
                .unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("raw-claim"));
        let spec = pvc.spec.unwrap();
        assert_eq!(
            spec.access_modes.as_ref().unwrap(),
            &vec!["ReadWriteMany".to_string()]
        );
        let q = spec.resources.unwrap().requests.unwrap();
        assert_eq!(q.get("storage").unwrap().0, "1Gi");
    }

    #[test]
    fn rewrite_image_uses_registry_and_tag() {
        let mut pod = build_sender_pod("hub", "claim-alice", "host", "hub", 1).unwrap();
        rewrite_image(&mut pod, "myregistry.io", "v1.2.3", "IfNotPresent");
        let image = pod.spec.unwrap().containers[0].image.clone().unwrap();
        assert_eq!(image, "myregistry.io/rsync-worker:v1.2.3");
    }

    #[test]
    fn build_receiver_pod_parses_both_documents() {
        let (pod, service) = build_receiver_pod("hub", "claim-alice").unwrap();
        assert_eq!(
            pod.metadata.name.as_deref(),
            Some("rsync-server-claim-alice")
        );
        assert_eq!(
            service.metadata.name.as_deref(),
            Some("rsync-server-claim-alice")
        );
    }
}
