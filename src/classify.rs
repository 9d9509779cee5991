//! PVC classifier: a pure function from a Kubernetes PVC's annotations,
//! labels, access modes and storage request to a [`PvcRef`].

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

use crate::error::ClassifyError;
use crate::model::{PvcKind, PvcRef};

const JUPYTER_USERNAME_ANNOTATION: &str = "hub.jupyter.org/username";
const PRIMEHUB_GROUP_LABEL: &str = "primehub-group";
const DATASET_GROUP_PREFIX: &str = "dataset-";

fn annotation<'a>(pvc: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    pvc.metadata
        .annotations
        .as_ref()?
        .get(key)
        .map(String::as_str)
}

fn label<'a>(pvc: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    pvc.metadata.labels.as_ref()?.get(key).map(String::as_str)
}

fn capacity(pvc: &PersistentVolumeClaim) -> Result<String, ClassifyError> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.clone())
        .ok_or_else(|| ClassifyError::MissingCapacity(pvc.name_any()))
}

fn first_access_mode(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.access_modes.as_ref())
        .and_then(|modes| modes.first())
        .cloned()
}

/// Classify a source PVC by the ordered rules: Jupyter username annotation
/// wins first, then a PrimeHub group label (split into dataset vs.
/// project), else falls back to `Raw`. Never fails on an unrecognized
/// PVC, but can fail if the PVC carries no storage request at all
/// (treated as a hard classification error by the caller, which skips
/// the PVC).
pub fn classify(pvc: &PersistentVolumeClaim) -> Result<PvcRef, ClassifyError> {
    let namespace = pvc.namespace().unwrap_or_default();
    let source_name = pvc.name_any();
    let cap = capacity(pvc)?;

    if let Some(username) = annotation(pvc, JUPYTER_USERNAME_ANNOTATION) {
        return Ok(PvcRef {
            namespace,
            source_name,
            logical_name: username.to_string(),
            kind: PvcKind::User,
            capacity: cap,
            access_mode: None,
        });
    }

    if let Some(group) = label(pvc, PRIMEHUB_GROUP_LABEL) {
        if let Some(dataset) = group.strip_prefix(DATASET_GROUP_PREFIX) {
            return Ok(PvcRef {
                namespace,
                source_name,
                logical_name: dataset.to_string(),
                kind: PvcKind::Dataset,
                capacity: cap,
                access_mode: None,
            });
        }
        return Ok(PvcRef {
            namespace,
            source_name: source_name.clone(),
            logical_name: group.to_string(),
            kind: PvcKind::Project,
            capacity: cap,
            access_mode: None,
        });
    }

    Ok(PvcRef {
        namespace,
        logical_name: source_name.clone(),
        source_name,
        kind: PvcKind::Raw,
        capacity: cap,
        access_mode: first_access_mode(pvc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pvc_with(
        name: &str,
        annotations: &[(&str, &str)],
        labels: &[(&str, &str)],
        access_modes: &[&str],
        capacity: &str,
    ) -> PersistentVolumeClaim {
        let mut reqs = BTreeMap::new();
        reqs.insert("storage".to_string(), Quantity(capacity.to_string()));

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("hub".to_string()),
                annotations: (!annotations.is_empty()).then(|| {
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                }),
                labels: (!labels.is_empty()).then(|| {
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                }),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: (!access_modes.is_empty())
                    .then(|| access_modes.iter().map(|s| s.to_string()).collect()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(reqs),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn user_pvc_by_jupyter_annotation() {
        let pvc = pvc_with(
            "claim-alice",
            &[(JUPYTER_USERNAME_ANNOTATION, "alice")],
            &[],
            &[],
            "10Gi",
        );
        let r = classify(&pvc).unwrap();
        assert_eq!(r.kind, PvcKind::User);
        assert_eq!(r.logical_name, "alice");
        assert_eq!(r.capacity, "10Gi");
        assert_eq!(r.dest_name(), "claim-alice");
    }

    #[test]
    fn dataset_pvc_strips_prefix() {
        let pvc = pvc_with(
            "data-nfs-dataset-imagenet-0",
            &[],
            &[(PRIMEHUB_GROUP_LABEL, "dataset-imagenet")],
            &[],
            "500Gi",
        );
        let r = classify(&pvc).unwrap();
        assert_eq!(r.kind, PvcKind::Dataset);
        assert_eq!(r.logical_name, "imagenet");
        assert_eq!(r.dest_name(), "data-nfs-dataset-imagenet-0");
    }

    #[test]
    fn project_pvc_keeps_full_group_name() {
        let pvc = pvc_with(
            "some-claim",
            &[],
            &[(PRIMEHUB_GROUP_LABEL, "teamA")],
            &[],
            "20Gi",
        );
        let r = classify(&pvc).unwrap();
        assert_eq!(r.kind, PvcKind::Project);
        assert_eq!(r.logical_name, "teamA");
    }

    #[test]
    fn raw_pvc_falls_back_with_access_mode() {
        let pvc = pvc_with("opaque-claim", &[], &[], &["ReadWriteMany"], "1Gi");
        let r = classify(&pvc).unwrap();
        assert_eq!(r.kind, PvcKind::Raw);
        assert_eq!(r.logical_name, "opaque-claim");
        assert_eq!(r.access_mode.as_deref(), Some("ReadWriteMany"));
        assert_eq!(r.dest_name(), "opaque-claim");
    }

    #[test]
    fn missing_capacity_is_an_error() {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("no-size".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec::default()),
            ..Default::default()
        };
        assert!(classify(&pvc).is_err());
    }
}
