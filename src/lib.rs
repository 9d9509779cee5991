//! Library surface for the PVC migration tool: the data model, the
//! classification and selection engines, the Kubernetes facade and pod
//! watch engine, the SSH control protocol, and the server/client/cleanup
//! roles built on top of them.

pub mod classify;
pub mod client;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod k8s;
pub mod model;
pub mod protocol;
pub mod selection;
pub mod server;

pub use config::{Cli, TopCommand};
