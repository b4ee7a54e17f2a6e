use crate::status::condition::{
    ClusterCondition, ClusterConditionSet, ClusterConditionStatus, ClusterConditionType,
    ConditionBuilder,
};

pub const REASON_SYNCED: &str = "Synced";
pub const REASON_SYNCED_WITHOUT_OWNERSHIP: &str = "SyncedWithoutOwnership";
pub const REASON_SYNC_FAILED: &str = "SyncFailed";

/// Outcome of applying the runtime objects of one reconcile pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Synced { owns_runtime: bool },
    Failed { message: String },
}

/// Builds the `RuntimeSyncedWithConfig` condition.
pub struct SyncConditionBuilder {
    outcome: SyncOutcome,
}

impl ConditionBuilder for SyncConditionBuilder {
    fn build_conditions(&self) -> ClusterConditionSet {
        vec![self.synced()].into()
    }
}

impl SyncConditionBuilder {
    pub fn new(outcome: SyncOutcome) -> Self {
        Self { outcome }
    }

    fn synced(&self) -> ClusterCondition {
        let (status, reason, message) = match &self.outcome {
            SyncOutcome::Synced { owns_runtime: true } => (
                ClusterConditionStatus::True,
                REASON_SYNCED,
                "Runtime objects are owned and synced with the configuration.".to_owned(),
            ),
            SyncOutcome::Synced {
                owns_runtime: false,
            } => (
                ClusterConditionStatus::True,
                REASON_SYNCED_WITHOUT_OWNERSHIP,
                "Runtime objects are synced with the configuration but not owned.".to_owned(),
            ),
            SyncOutcome::Failed { message } => (
                ClusterConditionStatus::False,
                REASON_SYNC_FAILED,
                message.clone(),
            ),
        };

        ClusterCondition {
            reason: Some(reason.to_owned()),
            message: Some(message),
            status,
            type_: ClusterConditionType::RuntimeSyncedWithConfig,
            last_transition_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SyncOutcome::Synced { owns_runtime: true }, ClusterConditionStatus::True, REASON_SYNCED)]
    #[case(
        SyncOutcome::Synced { owns_runtime: false },
        ClusterConditionStatus::True,
        REASON_SYNCED_WITHOUT_OWNERSHIP
    )]
    #[case(
        SyncOutcome::Failed { message: "boom".to_owned() },
        ClusterConditionStatus::False,
        REASON_SYNC_FAILED
    )]
    fn synced(
        #[case] outcome: SyncOutcome,
        #[case] expected_status: ClusterConditionStatus,
        #[case] expected_reason: &str,
    ) {
        let conditions: Vec<ClusterCondition> =
            SyncConditionBuilder::new(outcome).build_conditions().into();

        assert_eq!(conditions[0].status, expected_status);
        assert_eq!(conditions[0].reason.as_deref(), Some(expected_reason));
    }
}
