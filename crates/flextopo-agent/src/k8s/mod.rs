//! Kubernetes integration: client setup, node pod listing and FlexTopo publication.

use core::error::Error;

mod kube_client;
mod pods;
mod reporter;

pub(crate) use kube_client::init_kube_client;
pub(crate) use pods::allocation_request;
pub(crate) use pods::list_node_pods;
pub(crate) use pods::running_containers;
pub(crate) use pods::workload_id;
pub(crate) use reporter::Reporter;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub(crate) enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to list pods on node {node_name}")]
    ListFailed { node_name: String },
    #[display("Failed to publish FlexTopo {name}: {message}")]
    PublishFailed { name: String, message: String },
}

impl Error for KubernetesError {}
