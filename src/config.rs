//! CLI surface: the top-level flags and the `server`/`client`/`cleanup`
//! subcommand tree.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Migrate PVC data between two Kubernetes clusters", long_about = None)]
pub struct Cli {
    /// Absolute path to the kubeconfig file. Falls back to in-cluster config
    /// when unset.
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Default namespace of the Kubernetes cluster.
    #[arg(long, short = 'n', global = true, default_value = "hub")]
    pub namespace: String,

    /// Enable debug-level logging.
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Container image pull registry.
    #[arg(long, global = true, env = "PRIMEHUB_AIRGAPPED_IMAGE_PREFIX", default_value = "docker.io")]
    pub registry: String,

    /// Container image tag.
    #[arg(long = "image-tag", global = true, env = "IMAGE_TAG", default_value = "latest")]
    pub image_tag: String,

    /// Container image pull policy.
    #[arg(long = "image-pull-policy", global = true, env = "IMAGE_PULL_POLICY", default_value = "Always")]
    pub image_pull_policy: String,

    #[command(subcommand)]
    pub command: TopCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TopCommand {
    /// Run the server dispatcher: listens on SSH and provisions destination
    /// PVCs/pods on this cluster.
    Server(ServerArgs),
    /// Run the client orchestrator: builds a BackupSet and drives the
    /// per-PVC pipeline against a remote server.
    Client(ClientArgs),
    /// Delete local sender/receiver pods without talking to the remote
    /// cluster.
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TCP port to listen on for inbound control-protocol SSH sessions.
    #[arg(long, default_value_t = 2022)]
    pub port: u16,

    /// Default storage class for ReadWriteOnce PVCs.
    #[arg(long = "storage-class")]
    pub storage_class: Option<String>,

    /// Default storage class for ReadWriteMany PVCs.
    #[arg(long = "storage-class-rwx")]
    pub storage_class_rwx: Option<String>,

    /// Max container restarts before a watched pod is considered failed.
    #[arg(long, default_value_t = 3)]
    pub retry: u32,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Hostname or IP of the remote (server) cluster's control channel.
    #[arg(long)]
    pub remote: String,

    /// TCP port of the remote control channel.
    #[arg(long, default_value_t = 2022)]
    pub port: u16,

    #[arg(long = "user-list")]
    pub user_list: Option<PathBuf>,
    #[arg(long = "project-list")]
    pub project_list: Option<PathBuf>,
    #[arg(long = "dataset-list")]
    pub dataset_list: Option<PathBuf>,

    #[arg(long = "user-exclusive-list")]
    pub user_exclusive_list: Option<PathBuf>,
    #[arg(long = "project-exclusive-list")]
    pub project_exclusive_list: Option<PathBuf>,
    #[arg(long = "dataset-exclusive-list")]
    pub dataset_exclusive_list: Option<PathBuf>,

    #[arg(long = "disable-user", default_value_t = false)]
    pub disable_user: bool,
    #[arg(long = "disable-project", default_value_t = false)]
    pub disable_project: bool,
    #[arg(long = "disable-dataset", default_value_t = false)]
    pub disable_dataset: bool,

    /// Sender-pod restart budget. 0 forces restartPolicy: Never.
    #[arg(long, default_value_t = 0)]
    pub retry: u32,

    /// Run the sweep in a background task and then block forever, instead
    /// of exiting after one pass. This does not re-run the sweep
    /// periodically — one pass per process lifetime.
    #[arg(long, default_value_t = false)]
    pub daemon: bool,

    /// Single-PVC variant: `client rsync <pvc>` instead of a full sweep.
    #[command(subcommand)]
    pub single: Option<ClientSingle>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientSingle {
    /// Migrate exactly one PVC by name, skipping selection/exclusion.
    Rsync { pvc: String },
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// PVC name to clean up, or the literal `ALL` to delete every
    /// TaoKan-managed pod in the namespace.
    pub target: String,
}
