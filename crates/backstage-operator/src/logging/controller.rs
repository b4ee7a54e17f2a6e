//! Logging of reconcile outcomes reported by the Backstage controller stream.
use std::error::Error;

use kube::{
    Resource,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

/// A reconcile error that can name the class of failure it belongs to.
pub trait ReconcilerError: Error {
    /// Stable `PascalCase` name of the failure class, logged as
    /// `error.category` so failures can be grouped in log queries.
    fn category(&self) -> &'static str;
}

/// Logs one item of the controller stream.
///
/// Successful reconciles are logged at `INFO`. Failures of the reconciler
/// carry their category, failures of the queue itself (watch errors, missing
/// objects) are logged without one.
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    match result {
        Ok((backstage, action)) => tracing::info!(
            controller.name = controller_name,
            object = %backstage,
            ?action,
            "reconciled Backstage"
        ),
        Err(controller::Error::ReconcilerFailed(error, backstage)) => tracing::error!(
            controller.name = controller_name,
            object = %backstage,
            error.category = error.category(),
            error = error as &dyn Error,
            "failed to reconcile Backstage"
        ),
        Err(error) => tracing::error!(
            controller.name = controller_name,
            error = error as &dyn Error,
            "controller queue failed"
        ),
    }
}
