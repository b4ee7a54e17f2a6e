//! Conditions reported on the `Backstage` status.
pub mod deployment;
pub mod sync;

use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use strum::EnumCount;

/// A **data structure** that contains a vector of `ClusterCondition`s.
/// Should usually be implemented on the status of a `CustomResource` or the `CustomResource` itself.
pub trait HasStatusCondition {
    fn conditions(&self) -> Vec<ClusterCondition>;
}

/// A **data structure** that produces a `ClusterConditionSet` containing all required
/// `ClusterCondition`s.
pub trait ConditionBuilder {
    fn build_conditions(&self) -> ClusterConditionSet;
}

/// Computes the final conditions to be set in the status condition field.
///
/// Conditions no builder reports keep their current value. A condition whose
/// status did not change keeps its `lastTransitionTime`, so computing the
/// conditions twice for an unchanged cluster yields identical results.
pub fn compute_conditions<T: HasStatusCondition>(
    resource: &T,
    condition_builders: &[&dyn ConditionBuilder],
) -> Vec<ClusterCondition> {
    let mut new_resource_conditions = ClusterConditionSet::new();
    for cb in condition_builders {
        let conditions: ClusterConditionSet = cb.build_conditions();
        new_resource_conditions = new_resource_conditions.merge(conditions, update_message);
    }

    let old_resource_conditions: ClusterConditionSet = resource.conditions().into();

    old_resource_conditions
        .merge(new_resource_conditions, update_timestamps)
        .into_conditions()
        .map(|condition| ClusterCondition {
            last_transition_time: condition
                .last_transition_time
                .or_else(|| Some(Time(Timestamp::now()))),
            ..condition
        })
        .collect()
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// A human readable message indicating details about the transition.
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// The reason for the condition's last transition.
    pub reason: Option<String>,
    /// Status of the condition, one of True, False, Unknown.
    pub status: ClusterConditionStatus,
    /// Type of the condition.
    #[serde(rename = "type")]
    pub type_: ClusterConditionType,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    EnumCount,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "PascalCase")]
pub enum ClusterConditionType {
    #[default]
    /// The Backstage Deployment has all requested replicas available.
    RuntimeRunning,
    /// The runtime objects were reconciled with the desired configuration.
    RuntimeSyncedWithConfig,
}

#[derive(
    Clone, Debug, Default, Deserialize, Eq, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "PascalCase")]
pub enum ClusterConditionStatus {
    #[default]
    /// True means a resource is in the condition.
    True,
    /// False means a resource is not in the condition.
    False,
    /// Unknown means kubernetes cannot decide if a resource is in the condition or not.
    Unknown,
}

#[derive(Clone, Default)]
/// Helper struct to order and merge `ClusterCondition` objects.
pub struct ClusterConditionSet {
    conditions: Vec<Option<ClusterCondition>>,
}

impl ClusterConditionSet {
    pub fn new() -> Self {
        Self {
            // Each ClusterConditionType has its fixed position, which keeps the
            // order stable and rules out a condition stored under the wrong type.
            conditions: vec![None; ClusterConditionType::COUNT],
        }
    }

    /// Adds a [`ClusterCondition`] to its assigned index in the conditions vector.
    fn put(&mut self, condition: ClusterCondition) {
        let index = condition.type_ as usize;
        if let Some(slot) = self.conditions.get_mut(index) {
            *slot = Some(condition);
        }
    }

    /// Merges two [`ClusterConditionSet`]s. The condition_combiner implements the strategy used to merge two conditions of
    /// of the same type_.
    fn merge(
        self,
        other: Self,
        condition_combiner: fn(ClusterCondition, ClusterCondition) -> ClusterCondition,
    ) -> Self {
        let mut result = Self::new();

        for (old_condition, new_condition) in
            self.conditions.into_iter().zip(other.conditions)
        {
            if let Some(condition) = match (old_condition, new_condition) {
                (Some(old), Some(new)) => Some(condition_combiner(old, new)),
                (Some(old), None) => Some(old),
                (None, Some(new)) => Some(new),
                _ => None,
            } {
                result.put(condition);
            }
        }

        result
    }

    fn into_conditions(self) -> impl Iterator<Item = ClusterCondition> {
        self.conditions.into_iter().flatten()
    }
}

/// A condition combiner strategy which keeps `last_transition_time` unless
/// the status changed.
fn update_timestamps(
    old_condition: ClusterCondition,
    new_condition: ClusterCondition,
) -> ClusterCondition {
    if old_condition.status == new_condition.status {
        ClusterCondition {
            last_transition_time: old_condition.last_transition_time,
            ..new_condition
        }
    } else {
        ClusterCondition {
            last_transition_time: Some(Time(Timestamp::now())),
            ..new_condition
        }
    }
}

/// A condition combiner strategy with the following properties:
/// 1. It preserves the condition with the highest status.
/// 2. It joins the previous messages to the current one if both conditions
///    have the same status.
fn update_message(
    old_condition: ClusterCondition,
    new_condition: ClusterCondition,
) -> ClusterCondition {
    match old_condition.status.cmp(&new_condition.status) {
        std::cmp::Ordering::Equal => {
            let message = Some(
                [old_condition.message, new_condition.message]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<String>>()
                    .join("\n"),
            );

            ClusterCondition {
                message,
                ..new_condition
            }
        }
        std::cmp::Ordering::Less => new_condition,
        std::cmp::Ordering::Greater => old_condition,
    }
}

impl From<ClusterConditionSet> for Vec<ClusterCondition> {
    fn from(value: ClusterConditionSet) -> Self {
        value.into_conditions().collect()
    }
}

impl From<Vec<ClusterCondition>> for ClusterConditionSet {
    fn from(value: Vec<ClusterCondition>) -> Self {
        let mut result = Self::new();
        for c in value {
            result.put(c);
        }
        result
    }
}
