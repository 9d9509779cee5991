//! The pod watch engine: a single routine that consumes a retry-capable
//! watch stream for one named pod and returns a terminal Success/Failure
//! decision.
//!
//! The retry-watcher itself is `kube::runtime::watcher::watcher`, which
//! resumes from the last observed resource version after transient
//! disconnects and re-lists on `410 Gone`. The per-event decision logic
//! is modeled as a pure state-machine step: one decision per event, no
//! unbounded accumulation.

use std::time::Duration;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::ListParams,
    runtime::watcher::{self, Event},
    Api, Client, ResourceExt,
};
use tracing::{info, warn};

use crate::error::WatchError;

/// The phase a watch is driven towards. The receiver pod watches until
/// `Running`; the sender pod watches until `Succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Running,
    Succeeded,
}

impl WatchTarget {
    fn phase(self) -> &'static str {
        match self {
            WatchTarget::Running => "Running",
            WatchTarget::Succeeded => "Succeeded",
        }
    }
}

/// Status derived from the first container's state, together with the
/// fields the engine needs to decide retry/failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Pending,
    Waiting {
        reason: String,
        message: String,
    },
    Running,
    Terminated {
        reason: String,
        message: String,
        restart_count: i32,
    },
}

/// One step of the watch state machine: what should happen after observing
/// this pod phase/container status combination.
#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Continue,
    Success,
    Failure,
}

/// Derive a [`ContainerStatus`] from the first container in `pod`'s status,
/// along with its restart count. Pure function, unit-tested without a live
/// cluster.
pub fn derive_container_status(pod: &Pod) -> ContainerStatus {
    let Some(status) = pod.status.as_ref() else {
        return ContainerStatus::Pending;
    };
    let Some(first) = status
        .container_statuses
        .as_ref()
        .and_then(|cs| cs.first())
    else {
        return ContainerStatus::Pending;
    };

    let restart_count = first.restart_count;
    let Some(state) = first.state.as_ref() else {
        return ContainerStatus::Pending;
    };

    if state.running.is_some() {
        return ContainerStatus::Running;
    }
    if let Some(waiting) = &state.waiting {
        return ContainerStatus::Waiting {
            reason: waiting.reason.clone().unwrap_or_default(),
            message: waiting.message.clone().unwrap_or_default(),
        };
    }
    if let Some(terminated) = &state.terminated {
        return ContainerStatus::Terminated {
            reason: terminated.reason.clone().unwrap_or_default(),
            message: terminated.message.clone().unwrap_or_default(),
            restart_count,
        };
    }
    ContainerStatus::Pending
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

fn pending_message(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    let message = status.message.as_deref();
    match message {
        Some(m) if !m.is_empty() => Some(m.to_string()),
        _ => None,
    }
}

/// Apply the decision rules to a single observed pod.
fn decide(pod: &Pod, until: WatchTarget, max_retries: u32) -> Decision {
    let name = pod.name_any();
    let phase = pod_phase(pod).unwrap_or("");
    let container = derive_container_status(pod);

    match phase {
        "Pending" => match pending_message(pod) {
            Some(message) => {
                warn!(pod = %name, %message, "[Failed] pod stuck Pending with fatal message");
                Decision::Failure
            }
            None => Decision::Continue,
        },
        "Running" => {
            if until == WatchTarget::Running {
                return Decision::Success;
            }
            match container {
                ContainerStatus::Terminated {
                    restart_count,
                    reason,
                    ..
                } => {
                    info!(pod = %name, restart_count, %reason, "[Retry] container terminated, counting towards restarts");
                    if restart_count as u32 >= max_retries {
                        Decision::Failure
                    } else {
                        Decision::Continue
                    }
                }
                ContainerStatus::Waiting { reason, message } => {
                    info!(pod = %name, %reason, %message, "container waiting");
                    Decision::Continue
                }
                _ => Decision::Continue,
            }
        }
        "Succeeded" => {
            if until == WatchTarget::Succeeded {
                Decision::Success
            } else {
                warn!(pod = %name, "[Failed] pod reached Succeeded while watching for Running");
                Decision::Failure
            }
        }
        "Failed" => {
            warn!(pod = %name, "[Failed] pod phase Failed");
            Decision::Failure
        }
        other => {
            warn!(pod = %name, phase = %other, "[Failed] unhandled pod phase");
            Decision::Failure
        }
    }
}

fn restart_count_of(pod: &Pod) -> i32 {
    match derive_container_status(pod) {
        ContainerStatus::Terminated { restart_count, .. } => restart_count,
        _ => 0,
    }
}

/// Watch `pod_name` in `namespace` until it reaches `until`'s target phase,
/// or returns a [`WatchError`] on a terminal failure. `session_timeout`
/// bounds each re-list window (5 minutes by default); the retry-watcher
/// may be re-entered across many windows until a terminal decision is
/// reached.
pub async fn watch_pod(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    until: WatchTarget,
    max_retries: u32,
    session_timeout: Duration,
) -> Result<(), WatchError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let field_selector = format!("metadata.name={pod_name}");
    let watch_config = watcher::Config::default().fields(&field_selector);

    let stream = watcher::watcher(api, watch_config);
    tokio::pin!(stream);

    loop {
        let next = tokio::time::timeout(session_timeout, stream.try_next())
            .await
            .map_err(|_| WatchError::TimedOut(pod_name.to_string()))?
            .map_err(|e| WatchError::Kube {
                pod: pod_name.to_string(),
                message: e.to_string(),
            })?;

        let Some(event) = next else {
            return Err(WatchError::TimedOut(pod_name.to_string()));
        };

        let pods: Vec<Pod> = match event {
            Event::Applied(pod) => vec![pod],
            Event::Restarted(pods) => pods,
            Event::Deleted(_) => continue,
        };

        for pod in pods {
            match decide(&pod, until, max_retries) {
                Decision::Success => {
                    info!(pod = %pod_name, phase = until.phase(), "[Completed] watch reached target phase");
                    return Ok(());
                }
                Decision::Failure => {
                    return Err(classify_failure(&pod, pod_name, until, max_retries));
                }
                Decision::Continue => {}
            }
        }
    }
}

fn classify_failure(
    pod: &Pod,
    pod_name: &str,
    until: WatchTarget,
    max_retries: u32,
) -> WatchError {
    let phase = pod_phase(pod).unwrap_or("");
    if phase == "Failed" {
        return WatchError::Failed(pod_name.to_string());
    }
    if phase == "Pending" {
        if let Some(message) = pending_message(pod) {
            return WatchError::PendingFatal {
                pod: pod_name.to_string(),
                message,
            };
        }
    }
    if phase == "Running" && until != WatchTarget::Running {
        let restarts = restart_count_of(pod);
        if restarts as u32 >= max_retries {
            return WatchError::RetriesExhausted {
                pod: pod_name.to_string(),
                restarts,
                max: max_retries,
            };
        }
    }
    WatchError::UnhandledPhase(pod_name.to_string(), phase.to_string())
}

/// Poll for the receiver's companion Kubernetes Service, 3 attempts 5s
/// apart, because the Service and pod may propagate at different times.
pub async fn await_service_ready(client: &Client, namespace: &str, name: &str) -> bool {
    use k8s_openapi::api::core::v1::Service;

    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    for attempt in 0..3 {
        if api.get_opt(name).await.ok().flatten().is_some() {
            return true;
        }
        if attempt < 2 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus as K8sContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_with(phase: &str, container_state: Option<ContainerState>, message: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("rsync-server-claim-alice".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                message: message.map(str::to_string),
                container_statuses: container_state.map(|state| {
                    vec![K8sContainerStatus {
                        name: "main".to_string(),
                        restart_count: 0,
                        state: Some(state),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pending_without_message_continues() {
        let pod = pod_with("Pending", None, None);
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Continue);
    }

    #[test]
    fn pending_with_message_fails() {
        let pod = pod_with("Pending", None, Some("image pull error"));
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Failure);
    }

    #[test]
    fn running_succeeds_when_target_is_running() {
        let state = ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        };
        let pod = pod_with("Running", Some(state), None);
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Success);
    }

    #[test]
    fn running_continues_when_target_is_succeeded_and_no_terminated_container() {
        let state = ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        };
        let pod = pod_with("Running", Some(state), None);
        assert_eq!(decide(&pod, WatchTarget::Succeeded, 3), Decision::Continue);
    }

    #[test]
    fn succeeded_is_success_only_for_succeeded_target() {
        let pod = pod_with("Succeeded", None, None);
        assert_eq!(decide(&pod, WatchTarget::Succeeded, 3), Decision::Success);
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Failure);
    }

    #[test]
    fn failed_phase_always_fails() {
        let pod = pod_with("Failed", None, None);
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Failure);
        assert_eq!(decide(&pod, WatchTarget::Succeeded, 3), Decision::Failure);
    }

    #[test]
    fn unhandled_phase_fails() {
        let pod = pod_with("Unknown", None, None);
        assert_eq!(decide(&pod, WatchTarget::Running, 3), Decision::Failure);
    }

    #[test]
    fn derive_container_status_reads_waiting_state() {
        let state = ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ImagePullBackOff".to_string()),
                message: Some("rpc error".to_string()),
            }),
            ..Default::default()
        };
        let pod = pod_with("Pending", Some(state), None);
        match derive_container_status(&pod) {
            ContainerStatus::Waiting { reason, message } => {
                assert_eq!(reason, "ImagePullBackOff");
                assert_eq!(message, "rpc error");
            }
            other => panic!("expected Waiting, got {other:?}"),
        }
    }

    #[test]
    fn derive_container_status_reads_terminated_state() {
        let state = ContainerState {
            terminated: Some(ContainerStateTerminated {
                reason: Some("Error".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let pod = pod_with("Running", Some(state), None);
        match derive_container_status(&pod) {
            ContainerStatus::Terminated { reason, .. } => assert_eq!(reason, "Error"),
            other => panic!("expected Terminated, got {other:?}"),
        }
    }
}
