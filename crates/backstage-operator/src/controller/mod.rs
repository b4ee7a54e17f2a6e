//! Reconciles `Backstage` objects with the runtime objects they describe.
use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Secret, Service},
};
use kube::{
    Resource, ResourceExt,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};
use snafu::{ErrorCompat, OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument, warn};

use crate::{
    client::{self, Client, ClusterClient, NamespacedObject},
    crd::{Backstage, BackstageStatus, route::Route},
    external_config,
    kvp::{APPLIED_HASH_KEY, BACKSTAGE_NAME_KEY, ext_config_sync_selector},
    logging::controller::{ReconcilerError, report_controller_reconciled},
    merge::{fingerprint, is_subset},
    model::{self, BackstageModel, ModelOptions, Registry, RuntimeKind, RuntimeObject, for_each_runtime_object},
    namespace::WatchNamespace,
    status::condition::{
        ConditionBuilder, compute_conditions,
        deployment::DeploymentConditionBuilder,
        sync::{SyncConditionBuilder, SyncOutcome},
    },
};

pub const CONTROLLER_NAME: &str = "backstage";

/// Delay before retrying after a concurrent modification of a runtime object.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// Delay before retrying after a referenced object was not found.
const CONFIG_NOT_FOUND_REQUEUE: Duration = Duration::from_secs(30);

const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Period of the drift check after a successful reconcile.
const RESYNC_PERIOD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, EnumDiscriminants, Snafu)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to get Backstage {namespace}/{name}"))]
    GetBackstage {
        source: client::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to collect external config"))]
    CollectExternalConfig { source: external_config::Error },

    #[snafu(display("failed to build the runtime objects"))]
    BuildModel { source: model::Error },

    #[snafu(display("failed to label external config for syncing"))]
    SyncLabels { source: external_config::Error },

    #[snafu(display("failed to serialize {kind} {name:?}"))]
    SerializeObject {
        source: serde_json::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to apply {kind} {name:?}"))]
    ApplyObject {
        source: client::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to get the Backstage Deployment"))]
    GetDeployment { source: client::Error },

    #[snafu(display("failed to update the Backstage status"))]
    UpdateStatus { source: client::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApplyObject { source, .. } if source.is_conflict())
    }

    /// How long to wait before retrying, [`None`] if only a change of the
    /// `Backstage` or its templates can fix the error.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::ObjectHasNoNamespace | Self::BuildModel { .. } | Self::SerializeObject { .. } => {
                None
            }
            Self::CollectExternalConfig {
                source: external_config::Error::ConfigNotFound { .. },
            } => Some(CONFIG_NOT_FOUND_REQUEUE),
            _ => Some(ERROR_REQUEUE),
        }
    }
}

/// Operator wide settings, taken from the command line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OperatorConfig {
    pub owns_runtime: bool,
    /// Value of the `ext-config-sync` label put on referenced objects.
    pub auto_sync: bool,
    pub backstage_image: Option<String>,
    pub postgresql_image: Option<String>,
    pub is_openshift: bool,
}

impl OperatorConfig {
    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            owns_runtime: self.owns_runtime,
            is_openshift: self.is_openshift,
            backstage_image: self.backstage_image.clone(),
            postgresql_image: self.postgresql_image.clone(),
        }
    }
}

pub struct Ctx<C> {
    pub client: C,
    pub config: OperatorConfig,
    pub registry: Registry,
}

enum SyncResult {
    Synced,
    Conflict,
}

/// What applying a single object did.
#[derive(Debug, Eq, PartialEq)]
enum Applied {
    Created,
    Updated,
    Unchanged,
}

pub async fn reconcile<C: ClusterClient>(backstage: Arc<Backstage>, ctx: Arc<Ctx<C>>) -> Result<Action> {
    let namespace = backstage.namespace().context(ObjectHasNoNamespaceSnafu)?;
    reconcile_backstage(&*ctx, &namespace, &backstage.name_any()).await
}

pub fn error_policy<C>(_backstage: Arc<Backstage>, error: &Error, _ctx: Arc<Ctx<C>>) -> Action {
    match error.requeue_after() {
        Some(duration) => Action::requeue(duration),
        None => Action::await_change(),
    }
}

/// Brings the runtime objects of the `Backstage` `namespace/name` in line
/// with its spec and records the outcome on its status.
#[instrument(skip(ctx))]
pub async fn reconcile_backstage<C: ClusterClient>(
    ctx: &Ctx<C>,
    namespace: &str,
    name: &str,
) -> Result<Action> {
    let Some(backstage) = ctx
        .client
        .get_opt::<Backstage>(name, namespace)
        .await
        .context(GetBackstageSnafu { namespace, name })?
    else {
        info!("Backstage no longer exists, owned objects are garbage collected");
        return Ok(Action::await_change());
    };

    match sync(ctx, &backstage, namespace).await {
        Ok(SyncResult::Synced) => {
            update_status(ctx, &backstage, SyncOutcome::Synced {
                owns_runtime: ctx.config.owns_runtime,
            })
            .await?;
            Ok(Action::requeue(RESYNC_PERIOD))
        }
        Ok(SyncResult::Conflict) => Ok(Action::requeue(CONFLICT_REQUEUE)),
        Err(error) => {
            let message = error
                .iter_chain()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(": ");
            if let Err(status_error) =
                update_status(ctx, &backstage, SyncOutcome::Failed { message }).await
            {
                warn!(
                    error = &status_error as &dyn std::error::Error,
                    "failed to report the sync failure on the status"
                );
            }
            Err(error)
        }
    }
}

/// Builds the model and applies it. Nothing is written before the model
/// was built successfully.
async fn sync<C: ClusterClient>(ctx: &Ctx<C>, backstage: &Backstage, namespace: &str) -> Result<SyncResult> {
    let external_config = external_config::collect(&ctx.client, backstage)
        .await
        .context(CollectExternalConfigSnafu)?;
    let model = BackstageModel::build(
        &ctx.registry,
        backstage,
        &external_config,
        &ctx.config.model_options(),
    )
    .context(BuildModelSnafu)?;

    external_config
        .sync_labels(&ctx.client, &backstage.name_any(), namespace, ctx.config.auto_sync)
        .await
        .context(SyncLabelsSnafu)?;

    for object in &model.objects {
        match apply_object(&ctx.client, object).await {
            Ok(applied) => debug!(
                object.kind = %object.kind(),
                object.name = object.name(),
                ?applied,
                "applied object"
            ),
            Err(error) if error.is_conflict() => {
                info!(
                    object.kind = %object.kind(),
                    object.name = object.name(),
                    "object was modified concurrently, requeueing"
                );
                return Ok(SyncResult::Conflict);
            }
            Err(error) => return Err(error),
        }
    }

    delete_obsolete(&ctx.client, &model).await;
    Ok(SyncResult::Synced)
}

async fn apply_object<C: ClusterClient>(client: &C, object: &RuntimeObject) -> Result<Applied> {
    let create_only = object.is_create_only();
    for_each_runtime_object!(object, desired => create_or_update(client, desired, create_only).await)
}

/// Creates `desired` if it does not exist, otherwise replaces the live
/// object unless `create_only` is set.
///
/// Every written object carries the fingerprint of its desired state in
/// [`APPLIED_HASH_KEY`]. The replace is skipped only when the live object
/// was written from the same desired state and still contains it, so
/// fields dropped from `desired` are removed from the live object.
async fn create_or_update<C, K>(client: &C, desired: &K, create_only: bool) -> Result<Applied>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    let kind = K::kind(&()).into_owned();
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();

    let desired_value =
        serde_json::to_value(desired).context(SerializeObjectSnafu { kind: &kind, name: &name })?;
    let applied_hash = fingerprint(&desired_value);
    let mut desired = desired.clone();
    desired
        .annotations_mut()
        .insert(APPLIED_HASH_KEY.to_owned(), applied_hash.clone());

    let live = client
        .get_opt::<K>(&name, &namespace)
        .await
        .context(ApplyObjectSnafu { kind: &kind, name: &name })?;
    let Some(live) = live else {
        client
            .create(&desired)
            .await
            .context(ApplyObjectSnafu { kind: &kind, name: &name })?;
        return Ok(Applied::Created);
    };
    if create_only {
        return Ok(Applied::Unchanged);
    }

    if live.annotations().get(APPLIED_HASH_KEY) == Some(&applied_hash) {
        let live_value =
            serde_json::to_value(&live).context(SerializeObjectSnafu { kind: &kind, name: &name })?;
        if is_subset(&desired_value, &live_value) {
            return Ok(Applied::Unchanged);
        }
    }

    desired.meta_mut().resource_version = live.meta().resource_version.clone();
    client
        .replace(&desired)
        .await
        .context(ApplyObjectSnafu { kind: &kind, name: &name })?;
    Ok(Applied::Updated)
}

/// Deletes objects a previous configuration needed. Best effort, failures
/// are logged and retried on the next reconcile.
async fn delete_obsolete<C: ClusterClient>(client: &C, model: &BackstageModel) {
    for object in &model.obsolete {
        let result = for_each_runtime_object!(object, obsolete => delete_object(client, obsolete).await);
        match result {
            Ok(true) => info!(
                object.kind = %object.kind(),
                object.name = object.name(),
                "deleted obsolete object"
            ),
            Ok(false) => {}
            Err(error) => warn!(
                object.kind = %object.kind(),
                object.name = object.name(),
                error = &error as &dyn std::error::Error,
                "failed to delete obsolete object"
            ),
        }
    }
}

async fn delete_object<C, K>(client: &C, object: &K) -> client::Result<bool>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    client
        .delete::<K>(&object.name_any(), &object.namespace().unwrap_or_default())
        .await
}

/// Writes the conditions for `outcome` and the current Backstage Deployment,
/// unless they are already set.
async fn update_status<C: ClusterClient>(
    ctx: &Ctx<C>,
    backstage: &Backstage,
    outcome: SyncOutcome,
) -> Result<()> {
    let namespace = backstage.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let name = backstage.name_any();
    let deployment = ctx
        .client
        .get_opt::<Deployment>(&RuntimeKind::Deployment.object_name(&name, ""), &namespace)
        .await
        .context(GetDeploymentSnafu)?;

    let status = desired_status(backstage, outcome, deployment);
    if backstage.status.as_ref() == Some(&status) {
        debug!("status is up to date");
        return Ok(());
    }

    ctx.client
        .patch_status::<Backstage, _>(&name, &namespace, &status)
        .await
        .context(UpdateStatusSnafu)?;
    Ok(())
}

fn desired_status(
    backstage: &Backstage,
    outcome: SyncOutcome,
    deployment: Option<Deployment>,
) -> BackstageStatus {
    let sync = SyncConditionBuilder::new(outcome);
    let running = deployment.map(DeploymentConditionBuilder::new);
    let mut builders: Vec<&dyn ConditionBuilder> = vec![&sync];
    if let Some(running) = &running {
        builders.push(running);
    }

    BackstageStatus {
        conditions: compute_conditions(backstage, &builders),
    }
}

/// The `Backstage` an external ConfigMap or Secret was labelled for.
fn backstage_for_external_object<K: Resource>(object: &K) -> Option<ObjectRef<Backstage>> {
    let name = object.annotations().get(BACKSTAGE_NAME_KEY)?;
    let namespace = object.namespace()?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// Runs the controller until the process receives a termination signal.
pub async fn run(client: Client, config: OperatorConfig, watch_namespace: WatchNamespace) {
    let watcher_config = watcher::Config::default();
    let external_config_watcher = watcher::Config::default().labels(&ext_config_sync_selector());

    let mut controller = Controller::new(
        watch_namespace.get_api::<Backstage>(&client),
        watcher_config.clone(),
    )
    .watches(
        watch_namespace.get_api::<ConfigMap>(&client),
        external_config_watcher.clone(),
        |config_map| backstage_for_external_object(&config_map),
    )
    .watches(
        watch_namespace.get_api::<Secret>(&client),
        external_config_watcher,
        |secret| backstage_for_external_object(&secret),
    );

    if config.owns_runtime {
        controller = controller
            .owns(watch_namespace.get_api::<Deployment>(&client), watcher_config.clone())
            .owns(watch_namespace.get_api::<Service>(&client), watcher_config.clone())
            .owns(watch_namespace.get_api::<StatefulSet>(&client), watcher_config.clone())
            .owns(watch_namespace.get_api::<ConfigMap>(&client), watcher_config.clone())
            .owns(watch_namespace.get_api::<Secret>(&client), watcher_config.clone());
        if config.is_openshift {
            controller = controller.owns(watch_namespace.get_api::<Route>(&client), watcher_config);
        }
    }

    info!(
        controller.name = CONTROLLER_NAME,
        owns_runtime = config.owns_runtime,
        is_openshift = config.is_openshift,
        "starting controller"
    );
    let ctx = Arc::new(Ctx {
        client,
        config,
        registry: Registry::default(),
    });
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            report_controller_reconciled(CONTROLLER_NAME, &result);
            futures::future::ready(())
        })
        .await;
}
