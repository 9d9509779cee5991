//! Server dispatcher: listens on SSH, routes each inbound exec payload
//! through [`dispatch`] to a handler that manipulates the local
//! Kubernetes cluster.
//!
//! The command table is a Rust tagged sum (see [`crate::protocol::Command`])
//! rather than a string-keyed lookup. Transport is `russh`, an async SSH
//! server implementation (see DESIGN.md for why it was added).

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::KeyPair;
use tracing::{error, info};

use crate::k8s::{watch::WatchTarget, KubeFacade};
use crate::model::{self, PvcKind};
use crate::protocol::{Command, WELCOME_BANNER};

/// Run the dispatch for one parsed [`Command`], returning the response
/// text to write back over the channel.
pub async fn dispatch(
    facade: &KubeFacade,
    namespace: &str,
    retry: u32,
    command: Command,
) -> Result<String> {
    match command {
        Command::Status => handle_status(facade, namespace).await,
        Command::Touch {
            kind,
            name,
            capacity,
            access_mode,
        } => handle_touch(facade, namespace, &kind, &name, &capacity, access_mode.as_deref()).await,
        Command::Mount { pvc } => handle_mount(facade, namespace, &pvc, retry).await,
        Command::Umount { pvc } => handle_umount(facade, namespace, &pvc).await,
    }
}

async fn handle_status(facade: &KubeFacade, namespace: &str) -> Result<String> {
    let mut out = String::from("TaoKan Server Status\n");
    for (label, pvcs) in [
        ("user", facade.list_user_pvc(namespace).await?),
        ("project", facade.list_project_pvc(namespace).await?),
        ("dataset", facade.list_dataset_pvc(namespace).await?),
    ] {
        for pvc in pvcs {
            let name = kube::ResourceExt::name_any(&pvc);
            let mounters = facade.list_pods_using_pvc(namespace, &name).await?;
            let pods: Vec<_> = mounters.iter().map(kube::ResourceExt::name_any).collect();
            out.push_str(&format!(
                "[{label}] {name} (mounted by: {})\n",
                if pods.is_empty() {
                    "none".to_string()
                } else {
                    pods.join(",")
                }
            ));
        }
    }
    Ok(out)
}

async fn handle_touch(
    facade: &KubeFacade,
    namespace: &str,
    kind: &str,
    name: &str,
    capacity: &str,
    access_mode: Option<&str>,
) -> Result<String> {
    let kind = PvcKind::from_str(kind).map_err(|e| anyhow!(e))?;
    let dest_name = model::PvcRef {
        namespace: namespace.to_string(),
        source_name: name.to_string(),
        logical_name: name.to_string(),
        kind,
        capacity: capacity.to_string(),
        access_mode: access_mode.map(str::to_string),
    }
    .dest_name();

    facade
        .create_typed_pvc(kind, namespace, &dest_name, capacity, access_mode)
        .await
        .with_context(|| format!("touch {kind} {name} {capacity}"))?;

    info!(%kind, name, dest_name, "[Completed] touch");
    Ok(format!("Touched pvc {dest_name}\n"))
}

async fn handle_mount(facade: &KubeFacade, namespace: &str, pvc: &str, retry: u32) -> Result<String> {
    let pod_name = model::receiver_pod_name(pvc);

    if let Some(existing) = facade.get_taokan_pod(namespace, &pod_name).await? {
        let phase = existing
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("");
        if phase == "Running" {
            info!(pod = pod_name, "[Skip] receiver already Running");
            return Ok(format!("{} {}\n", crate::protocol::READY_TOKEN, pod_name));
        }
        info!(pod = pod_name, phase, "[Restart] deleting non-Running receiver");
        facade.delete_pod(namespace, &pod_name).await?;
    }

    let (pod, service) = crate::k8s::templates::build_receiver_pod(namespace, pvc)?;
    facade.create_pod(namespace, &pod).await?;
    facade.create_service(namespace, &service).await?;

    if !crate::k8s::watch::await_service_ready(facade.client(), namespace, &pod_name).await {
        return Err(anyhow!(
            "companion service {pod_name} did not appear within the retry window"
        ));
    }

    crate::k8s::watch_pod(
        facade.client(),
        namespace,
        &pod_name,
        WatchTarget::Running,
        retry,
        std::time::Duration::from_secs(300),
    )
    .await
    .with_context(|| format!("mount {pvc}"))?;

    info!(pod = pod_name, "[Completed] receiver Running");
    Ok(format!("{} {}\n", crate::protocol::READY_TOKEN, pod_name))
}

async fn handle_umount(facade: &KubeFacade, namespace: &str, pvc: &str) -> Result<String> {
    let pod_name = model::receiver_pod_name(pvc);
    if facade.get_taokan_pod(namespace, &pod_name).await?.is_none() {
        info!(pod = pod_name, "[Skip] no TaoKan receiver to unmount");
        return Ok(format!("No receiver for {pvc}\n"));
    }
    facade.delete_pod(namespace, &pod_name).await?;
    info!(pod = pod_name, "[Completed] unmount");
    Ok(format!("Unmounted {pvc}\n"))
}

/// Top-level SSH server. One [`SessionHandler`] is created per inbound
/// connection; all handlers share the same [`KubeFacade`] (cheap-clone
/// `kube::Client` underneath).
#[derive(Clone)]
pub struct TaoKanServer {
    facade: KubeFacade,
    namespace: String,
    retry: u32,
}

impl TaoKanServer {
    pub fn new(facade: KubeFacade, namespace: String, retry: u32) -> Self {
        Self {
            facade,
            namespace,
            retry,
        }
    }

    pub async fn listen(self, port: u16) -> Result<()> {
        let config = russh::server::Config {
            keys: vec![KeyPair::generate_ed25519().context("generate host key")?],
            ..Default::default()
        };
        let config = Arc::new(config);
        info!(port, "Start ssh server");
        russh::server::run(config, ("0.0.0.0", port), self)
            .await
            .context("ssh server exited")
    }
}

impl russh::server::Server for TaoKanServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, _addr: Option<std::net::SocketAddr>) -> SessionHandler {
        SessionHandler {
            facade: self.facade.clone(),
            namespace: self.namespace.clone(),
            retry: self.retry,
            command: None,
        }
    }
}

pub struct SessionHandler {
    facade: KubeFacade,
    namespace: String,
    retry: u32,
    command: Option<String>,
}

#[async_trait::async_trait]
impl Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        // Authentication is by SSH key; key authorization itself is
        // delegated to the operator's authorized_keys, not re-checked here.
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let _ = session;
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let line = String::from_utf8_lossy(data).to_string();
        self.command = Some(line.clone());
        session.data(channel, WELCOME_BANNER.as_bytes().to_vec().into());

        info!(command = %line, "[Receive] command");

        let tokens = crate::protocol::tokenize(&line);
        let response = match Command::parse(&tokens) {
            Ok(cmd) => match dispatch(&self.facade, &self.namespace, self.retry, cmd).await {
                Ok(out) => out,
                Err(e) => {
                    error!(error = %e, "[Error] handler failed");
                    format!("[Error] {e}\n")
                }
            },
            Err(e) => format!("[Error] {e}\n"),
        };

        session.data(channel, response.into_bytes().into());
        session.exit_status_request(channel, 0);
        session.close(channel);

        info!(command = %line, "[Closed]");
        Ok(())
    }
}
