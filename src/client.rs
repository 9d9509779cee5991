//! Client orchestrator: builds the BackupSet, opens one [`ControlSession`]
//! per remote action (connect → run → close, no long-lived channel), and
//! drives the per-PVC pipeline.
//!
//! The transport uses agent-based SSH auth with host key verification
//! disabled, on the assumption that the control channel only ever runs
//! over a private operator network.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use russh::client::{self, Handle};
use russh::ChannelMsg;
use tracing::{info, warn};

use crate::k8s::{watch::WatchTarget, KubeFacade};
use crate::model::{BackupSet, PvcKind, PvcRef};
use crate::protocol::{contains_ready_token, Command};

/// Accepts any host key — the client trusts the operator network rather
/// than verifying server identity.
struct InsecureClientHandler;

#[async_trait::async_trait]
impl client::Handler for InsecureClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One SSH connection, opened for a single command, then closed:
/// connect → run → close, no long-lived channel.
pub struct ControlSession {
    handle: Handle<InsecureClientHandler>,
}

impl ControlSession {
    pub async fn connect(remote: &str, port: u16) -> Result<Self> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (remote, port), InsecureClientHandler)
            .await
            .with_context(|| format!("connect to {remote}:{port}"))?;

        let mut agent = russh_keys::agent::client::AgentClient::connect_env()
            .await
            .context("connect to ssh-agent")?;
        let identities = agent
            .request_identities()
            .await
            .context("list ssh-agent identities")?;
        let key = identities
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no identities available in ssh-agent"))?;

        let (_agent, authenticated) = handle
            .authenticate_future("rsync", key, agent)
            .await;
        if !authenticated.unwrap_or(false) {
            bail!("ssh agent authentication to {remote}:{port} failed");
        }

        Ok(Self { handle })
    }

    /// Run one command and return its collected stdout, then close the
    /// channel (not the connection — each action gets its own fresh
    /// connection via [`ControlSession::connect`]).
    pub async fn run(&mut self, command: &Command) -> Result<String> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command.to_line().as_bytes()).await?;

        let mut output = String::new();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.push_str(&String::from_utf8_lossy(&data));
                }
                Some(ChannelMsg::ExitStatus { .. }) | None => break,
                _ => {}
            }
        }
        Ok(output)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .context("close ssh session")
    }
}

/// Open a fresh [`ControlSession`], run one command, close it.
async fn run_remote(remote: &str, port: u16, command: Command) -> Result<String> {
    let mut session = ControlSession::connect(remote, port).await?;
    let result = session.run(&command).await;
    let _ = session.close().await;
    result
}

pub enum PvcOutcome {
    Completed,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Default)]
pub struct SweepReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &PvcOutcome, pvc: &PvcRef) {
        match outcome {
            PvcOutcome::Completed => {
                self.completed += 1;
                info!(pvc = pvc.source_name, "[Completed]");
            }
            PvcOutcome::Skipped { reason } => {
                self.skipped += 1;
                warn!(pvc = pvc.source_name, %reason, "[Skip]");
            }
            PvcOutcome::Failed { reason } => {
                self.failed += 1;
                warn!(pvc = pvc.source_name, %reason, "[Failed]");
            }
        }
    }
}

/// The per-PVC pipeline: touch → mount → launch sender → umount. Each
/// step can only skip or fail the remaining steps; a single PVC's
/// failure never aborts the sweep.
pub async fn run_pvc_pipeline(
    facade: &KubeFacade,
    local_namespace: &str,
    remote: &str,
    remote_port: u16,
    remote_namespace: &str,
    registry: &str,
    image_tag: &str,
    image_pull_policy: &str,
    retry: u32,
    pvc: &PvcRef,
) -> PvcOutcome {
    let dest_name = pvc.dest_name();

    let touch = Command::Touch {
        kind: pvc.kind.to_string(),
        name: pvc.logical_name.clone(),
        capacity: pvc.capacity.clone(),
        access_mode: pvc.access_mode.clone(),
    };
    if let Err(e) = run_remote(remote, remote_port, touch).await {
        return PvcOutcome::Skipped {
            reason: format!("touch failed: {e}"),
        };
    }

    let mount = Command::Mount {
        pvc: dest_name.clone(),
    };
    let mount_response = match run_remote(remote, remote_port, mount).await {
        Ok(resp) => resp,
        Err(e) => {
            return PvcOutcome::Skipped {
                reason: format!("mount failed: {e}"),
            }
        }
    };
    if !contains_ready_token(&mount_response) {
        return PvcOutcome::Skipped {
            reason: "mount response did not contain readiness token".to_string(),
        };
    }

    if let Err(e) = launch_rsync_worker_pod(
        facade,
        local_namespace,
        &dest_name,
        remote,
        remote_namespace,
        registry,
        image_tag,
        image_pull_policy,
        retry,
    )
    .await
    {
        let _ = run_remote(remote, remote_port, Command::Umount { pvc: dest_name }).await;
        return PvcOutcome::Failed {
            reason: format!("sender pod failed: {e}"),
        };
    }

    if let Err(e) = run_remote(remote, remote_port, Command::Umount { pvc: dest_name }).await {
        warn!(error = %e, "umount failed, continuing");
    }

    PvcOutcome::Completed
}

/// Build, launch, watch, and (on failure) tear down the sender pod.
#[allow(clippy::too_many_arguments)]
async fn launch_rsync_worker_pod(
    facade: &KubeFacade,
    namespace: &str,
    dest_pvc_name: &str,
    remote_host: &str,
    remote_namespace: &str,
    registry: &str,
    image_tag: &str,
    image_pull_policy: &str,
    retry: u32,
) -> Result<()> {
    let mut pod = crate::k8s::templates::build_sender_pod(
        namespace,
        dest_pvc_name,
        remote_host,
        remote_namespace,
        retry,
    )?;
    crate::k8s::templates::rewrite_image(&mut pod, registry, image_tag, image_pull_policy);

    let pod_name = crate::model::sender_pod_name(dest_pvc_name);
    facade.delete_pod(namespace, &pod_name).await?;
    facade.create_pod(namespace, &pod).await?;

    let watch_result = crate::k8s::watch_pod(
        facade.client(),
        namespace,
        &pod_name,
        WatchTarget::Succeeded,
        retry,
        std::time::Duration::from_secs(300),
    )
    .await;

    if let Err(e) = watch_result {
        let restart_policy_never = pod
            .spec
            .as_ref()
            .and_then(|s| s.restart_policy.as_deref())
            == Some("Never");
        if restart_policy_never {
            facade.delete_pod(namespace, &pod_name).await?;
        }
        return Err(anyhow!(e));
    }

    Ok(())
}

/// Drive all three groups sequentially: users, then projects, then
/// datasets, each PVC strictly sequential within a group.
#[allow(clippy::too_many_arguments)]
pub async fn run_backup_set(
    facade: &KubeFacade,
    local_namespace: &str,
    remote: &str,
    remote_port: u16,
    remote_namespace: &str,
    registry: &str,
    image_tag: &str,
    image_pull_policy: &str,
    retry: u32,
    backup_set: &BackupSet,
) -> SweepReport {
    let mut report = SweepReport::default();
    for (_kind, pvcs) in backup_set.groups() {
        for pvc in pvcs {
            let outcome = run_pvc_pipeline(
                facade,
                local_namespace,
                remote,
                remote_port,
                remote_namespace,
                registry,
                image_tag,
                image_pull_policy,
                retry,
                pvc,
            )
            .await;
            report.record(&outcome, pvc);
        }
    }
    report
}

/// Classify every PVC in `namespace`, logging and skipping any that fail
/// classification.
pub async fn classify_namespace(facade: &KubeFacade, namespace: &str) -> Result<Vec<PvcRef>> {
    let pvcs = facade.list_pvc(namespace).await?;
    let mut refs = Vec::with_capacity(pvcs.len());
    for pvc in &pvcs {
        match crate::classify::classify(pvc) {
            Ok(r) => refs.push(r),
            Err(e) => {
                warn!(pvc = kube::ResourceExt::name_any(pvc), error = %e, "[Skip] classification failed");
            }
        }
    }
    Ok(refs)
}

pub fn group_by_kind(refs: Vec<PvcRef>, kind: PvcKind) -> Vec<PvcRef> {
    refs.into_iter().filter(|r| r.kind == kind).collect()
}
