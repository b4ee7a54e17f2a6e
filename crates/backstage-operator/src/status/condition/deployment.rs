use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

use crate::status::condition::{
    ClusterCondition, ClusterConditionSet, ClusterConditionStatus, ClusterConditionType,
    ConditionBuilder,
};

/// Builds the `RuntimeRunning` condition from the applied Backstage
/// Deployment.
pub struct DeploymentConditionBuilder {
    deployment: Deployment,
}

impl ConditionBuilder for DeploymentConditionBuilder {
    fn build_conditions(&self) -> ClusterConditionSet {
        vec![self.running()].into()
    }
}

impl DeploymentConditionBuilder {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    fn running(&self) -> ClusterCondition {
        let name = self.deployment.name_any();
        let requested_replicas = self
            .deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);

        let (status, reason, message) = match &self.deployment.status {
            None => (
                ClusterConditionStatus::Unknown,
                "DeploymentStatusUnknown",
                format!("Deployment {name} reports no status yet."),
            ),
            Some(status) => {
                let available_replicas = status.available_replicas.unwrap_or_default();
                let message = format!(
                    "Deployment {name} has {available_replicas}/{requested_replicas} available replicas."
                );
                if available_replicas >= requested_replicas {
                    (ClusterConditionStatus::True, "DeploymentReady", message)
                } else {
                    (ClusterConditionStatus::False, "DeploymentNotReady", message)
                }
            }
        };

        ClusterCondition {
            reason: Some(reason.to_owned()),
            message: Some(message),
            status,
            type_: ClusterConditionType::RuntimeRunning,
            last_transition_time: None,
        }
    }
}
