use api_types::FlexTopo;
use api_types::FlexTopoSpec;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::info;

use super::KubernetesError;

/// What [`Reporter::report`] did to the node's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub(crate) enum ReportOutcome {
    #[display("created")]
    Created,
    #[display("updated")]
    Updated,
    #[display("unchanged")]
    Unchanged,
}

/// Publishes the topology of one node as the cluster-scoped `FlexTopo`
/// resource named after the node.
pub(crate) struct Reporter {
    api: Api<FlexTopo>,
    node_name: String,
}

impl Reporter {
    pub(crate) fn new(client: Client, node_name: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            node_name: node_name.into(),
        }
    }

    /// Creates the resource, or replaces the spec of the existing one.
    ///
    /// The existing object keeps its metadata; only the spec is replaced.
    /// No request is made when the stored spec already matches.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::PublishFailed`] if reading, creating or replacing fails
    #[tracing::instrument(skip(self, spec), fields(node_name = %self.node_name))]
    pub(crate) async fn report(
        &self,
        spec: FlexTopoSpec,
    ) -> Result<ReportOutcome, Report<KubernetesError>> {
        let params = PostParams::default();

        let existing = self
            .api
            .get_opt(&self.node_name)
            .await
            .change_context(self.publish_failed("failed to read existing resource"))?;

        match existing {
            None => {
                let flextopo = FlexTopo::new(&self.node_name, spec);
                self.api
                    .create(&params, &flextopo)
                    .await
                    .change_context(self.publish_failed("failed to create resource"))?;
                info!("Created FlexTopo for node {}", self.node_name);
                Ok(ReportOutcome::Created)
            }
            Some(existing) if existing.spec == spec => {
                debug!("FlexTopo spec unchanged, skipping update");
                Ok(ReportOutcome::Unchanged)
            }
            Some(mut existing) => {
                existing.spec = spec;
                self.api
                    .replace(&self.node_name, &params, &existing)
                    .await
                    .change_context(self.publish_failed("failed to replace resource"))?;
                info!("Updated FlexTopo for node {}", self.node_name);
                Ok(ReportOutcome::Updated)
            }
        }
    }

    fn publish_failed(&self, message: &str) -> KubernetesError {
        KubernetesError::PublishFailed {
            name: self.node_name.clone(),
            message: message.to_string(),
        }
    }
}
