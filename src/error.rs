//! Typed error enums for each module boundary. The orchestration layer
//! (pipeline steps, `main`) wraps these in `anyhow::Result` and attaches
//! context; callers that need to branch on a specific failure (idempotent
//! "already exists", missing pod, ...) match on the variants directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("PVC {0} has no storage request in spec.resources.requests")]
    MissingCapacity(String),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse embedded template {name}: {source}")]
    Parse {
        name: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("template {0} has no container to stamp")]
    NoContainer(&'static str),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("pod {0} reached phase Failed")]
    Failed(String),
    #[error("pod {pod} container restart count {restarts} reached max retries {max}")]
    RetriesExhausted {
        pod: String,
        restarts: i32,
        max: u32,
    },
    #[error("pod {pod} is stuck Pending: {message}")]
    PendingFatal { pod: String, message: String },
    #[error("pod {0} reported an unhandled phase {1}")]
    UnhandledPhase(String, String),
    #[error("watch for pod {0} timed out")]
    TimedOut(String),
    #[error("kube API error while watching {pod}: {message}")]
    Kube { pod: String, message: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no command provided")]
    Empty,
    #[error("unsupported command '{0}'")]
    Unsupported(String),
    #[error("command '{command}' requires {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("'raw' touch requires an explicit access mode")]
    RawRequiresAccessMode,
}

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}
