//! The runtime objects a `Backstage` is made of.
use std::collections::BTreeMap;

use k8s_openapi::{
    ByteString,
    api::{
        apps::v1::{Deployment, StatefulSet},
        core::v1::{
            ConfigMap, EnvFromSource, LocalObjectReference, PersistentVolumeClaim,
            SecretEnvSource, Secret, Service,
        },
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use kube::Resource;
use snafu::{ResultExt, Snafu};
use strum::Display;

use crate::{
    builder::{
        meta::{self, ObjectMetaBuilder},
        pod::{self, BackstagePod},
    },
    crd::{
        Backstage, DEFAULT_MOUNT_PATH, ObjectKind,
        route::{Route, RouteSpec, TlsConfig},
    },
    external_config::{config_map_keys, secret_keys},
    kvp::{APP_KEY, backstage_app_label, database_app_label, recommended_labels, selector_labels},
    model::contribution::Contribution,
    template::{self, read_all_or_default, read_config_or_default},
    utils::generate_password,
};

/// Mount path of PVCs, followed by the claim name.
pub const PVC_MOUNT_PATH: &str = "/opt/app-root/src";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to wrap the pod of the Backstage Deployment"))]
    WrapPod { source: pod::Error },

    #[snafu(display("failed to add owner reference to {kind} {name:?}"))]
    OwnerReference {
        source: meta::Error,
        kind: RuntimeKind,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Kinds of runtime objects. Each kind is bound to one Kubernetes type and
/// to one role within the Backstage instance.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RuntimeKind {
    Deployment,
    Service,
    Route,
    DbStatefulSet,
    DbService,
    DbHeadlessService,
    DbSecret,
    BackendAuthConfig,
    DynamicPlugins,
    ConfigMapFiles,
    ConfigMapEnvs,
    SecretFiles,
    SecretEnvs,
    Pvc,
}

/// A Kubernetes object produced for a `Backstage`, tagged with its role.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeObject {
    Deployment(Deployment),
    Service(Service),
    Route(Route),
    DbStatefulSet(StatefulSet),
    DbService(Service),
    DbHeadlessService(Service),
    DbSecret(Secret),
    BackendAuthConfig(ConfigMap),
    DynamicPlugins(ConfigMap),
    ConfigMapFiles(ConfigMap),
    ConfigMapEnvs(ConfigMap),
    SecretFiles(Secret),
    SecretEnvs(Secret),
    Pvc(PersistentVolumeClaim),
}

/// Evaluates `$body` with `$object` bound to the typed object inside a
/// [`RuntimeObject`], whatever its variant.
macro_rules! for_each_runtime_object {
    ($value:expr, $object:ident => $body:expr) => {
        match $value {
            $crate::model::RuntimeObject::Deployment($object) => $body,
            $crate::model::RuntimeObject::Service($object)
            | $crate::model::RuntimeObject::DbService($object)
            | $crate::model::RuntimeObject::DbHeadlessService($object) => $body,
            $crate::model::RuntimeObject::Route($object) => $body,
            $crate::model::RuntimeObject::DbStatefulSet($object) => $body,
            $crate::model::RuntimeObject::DbSecret($object)
            | $crate::model::RuntimeObject::SecretFiles($object)
            | $crate::model::RuntimeObject::SecretEnvs($object) => $body,
            $crate::model::RuntimeObject::BackendAuthConfig($object)
            | $crate::model::RuntimeObject::DynamicPlugins($object)
            | $crate::model::RuntimeObject::ConfigMapFiles($object)
            | $crate::model::RuntimeObject::ConfigMapEnvs($object) => $body,
            $crate::model::RuntimeObject::Pvc($object) => $body,
        }
    };
}
pub(crate) use for_each_runtime_object;

/// Everything the per object build steps need to know about the instance.
pub struct BuildContext<'a> {
    pub backstage: &'a Backstage,
    pub cr_name: &'a str,
    pub namespace: &'a str,
    pub backstage_image: Option<&'a str>,
    pub postgresql_image: Option<&'a str>,
}

impl RuntimeKind {
    /// Whether the object belongs to the local database.
    pub fn is_local_db(self) -> bool {
        matches!(
            self,
            Self::DbStatefulSet | Self::DbService | Self::DbHeadlessService | Self::DbSecret
        )
    }

    /// Name of the object of this kind generated for `cr_name`.
    ///
    /// `template_name` is only used for kinds where several objects may
    /// exist, currently PVCs.
    pub fn object_name(self, cr_name: &str, template_name: &str) -> String {
        match self {
            Self::Deployment => format!("{cr_name}-deployment"),
            Self::Service => format!("{cr_name}-service"),
            Self::Route => backstage_app_label(cr_name),
            Self::DbStatefulSet | Self::DbService => database_app_label(cr_name),
            Self::DbHeadlessService => format!("{}-hl", database_app_label(cr_name)),
            Self::DbSecret => format!("backstage-psql-secret-{cr_name}"),
            Self::BackendAuthConfig => format!("{cr_name}-auth-app-config"),
            Self::DynamicPlugins => format!("{cr_name}-dynamic-plugins"),
            Self::ConfigMapFiles => format!("{cr_name}-default-configmap-files"),
            Self::ConfigMapEnvs => format!("{cr_name}-default-configmap-envs"),
            Self::SecretFiles => format!("{cr_name}-default-secret-files"),
            Self::SecretEnvs => format!("{cr_name}-default-secret-envs"),
            Self::Pvc => format!("{cr_name}-{template_name}"),
        }
    }

    /// Loads the objects of this kind from the template `key`.
    pub fn load(
        self,
        key: &str,
        raw_config: &BTreeMap<String, String>,
    ) -> Result<Vec<RuntimeObject>, template::Error> {
        let object = match self {
            Self::Deployment => read_config_or_default(key, raw_config)?.map(RuntimeObject::Deployment),
            Self::Service => read_config_or_default(key, raw_config)?.map(RuntimeObject::Service),
            Self::Route => read_config_or_default(key, raw_config)?.map(RuntimeObject::Route),
            Self::DbStatefulSet => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::DbStatefulSet)
            }
            Self::DbService => read_config_or_default(key, raw_config)?.map(RuntimeObject::DbService),
            Self::DbHeadlessService => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::DbHeadlessService)
            }
            Self::DbSecret => read_config_or_default(key, raw_config)?.map(RuntimeObject::DbSecret),
            Self::BackendAuthConfig => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::BackendAuthConfig)
            }
            Self::DynamicPlugins => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::DynamicPlugins)
            }
            Self::ConfigMapFiles => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::ConfigMapFiles)
            }
            Self::ConfigMapEnvs => {
                read_config_or_default(key, raw_config)?.map(RuntimeObject::ConfigMapEnvs)
            }
            Self::SecretFiles => read_config_or_default(key, raw_config)?.map(RuntimeObject::SecretFiles),
            Self::SecretEnvs => read_config_or_default(key, raw_config)?.map(RuntimeObject::SecretEnvs),
            Self::Pvc => {
                return Ok(read_all_or_default(key, raw_config)?
                    .into_iter()
                    .map(RuntimeObject::Pvc)
                    .collect());
            }
        };
        Ok(object.into_iter().collect())
    }

    /// An empty object of this kind, only carrying a name and namespace.
    ///
    /// Used to look up or delete objects without building them.
    pub fn empty_object(self, name: &str, namespace: &str) -> RuntimeObject {
        let metadata = ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        };
        match self {
            Self::Deployment => RuntimeObject::Deployment(Deployment {
                metadata,
                ..Deployment::default()
            }),
            Self::Service => RuntimeObject::Service(Service {
                metadata,
                ..Service::default()
            }),
            Self::Route => RuntimeObject::Route(Route {
                metadata,
                spec: RouteSpec::default(),
            }),
            Self::DbStatefulSet => RuntimeObject::DbStatefulSet(StatefulSet {
                metadata,
                ..StatefulSet::default()
            }),
            Self::DbService => RuntimeObject::DbService(Service {
                metadata,
                ..Service::default()
            }),
            Self::DbHeadlessService => RuntimeObject::DbHeadlessService(Service {
                metadata,
                ..Service::default()
            }),
            Self::DbSecret => RuntimeObject::DbSecret(Secret {
                metadata,
                ..Secret::default()
            }),
            Self::BackendAuthConfig => RuntimeObject::BackendAuthConfig(ConfigMap {
                metadata,
                ..ConfigMap::default()
            }),
            Self::DynamicPlugins => RuntimeObject::DynamicPlugins(ConfigMap {
                metadata,
                ..ConfigMap::default()
            }),
            Self::ConfigMapFiles => RuntimeObject::ConfigMapFiles(ConfigMap {
                metadata,
                ..ConfigMap::default()
            }),
            Self::ConfigMapEnvs => RuntimeObject::ConfigMapEnvs(ConfigMap {
                metadata,
                ..ConfigMap::default()
            }),
            Self::SecretFiles => RuntimeObject::SecretFiles(Secret {
                metadata,
                ..Secret::default()
            }),
            Self::SecretEnvs => RuntimeObject::SecretEnvs(Secret {
                metadata,
                ..Secret::default()
            }),
            Self::Pvc => RuntimeObject::Pvc(PersistentVolumeClaim {
                metadata,
                ..PersistentVolumeClaim::default()
            }),
        }
    }
}

impl RuntimeObject {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            Self::Deployment(_) => RuntimeKind::Deployment,
            Self::Service(_) => RuntimeKind::Service,
            Self::Route(_) => RuntimeKind::Route,
            Self::DbStatefulSet(_) => RuntimeKind::DbStatefulSet,
            Self::DbService(_) => RuntimeKind::DbService,
            Self::DbHeadlessService(_) => RuntimeKind::DbHeadlessService,
            Self::DbSecret(_) => RuntimeKind::DbSecret,
            Self::BackendAuthConfig(_) => RuntimeKind::BackendAuthConfig,
            Self::DynamicPlugins(_) => RuntimeKind::DynamicPlugins,
            Self::ConfigMapFiles(_) => RuntimeKind::ConfigMapFiles,
            Self::ConfigMapEnvs(_) => RuntimeKind::ConfigMapEnvs,
            Self::SecretFiles(_) => RuntimeKind::SecretFiles,
            Self::SecretEnvs(_) => RuntimeKind::SecretEnvs,
            Self::Pvc(_) => RuntimeKind::Pvc,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        for_each_runtime_object!(self, object => object.meta())
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        for_each_runtime_object!(self, object => object.meta_mut())
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Names the object after `cr_name` and adds the common labels.
    pub fn set_meta_info(&mut self, ctx: &BuildContext<'_>) {
        let kind = self.kind();
        let template_name = self.name().to_owned();
        let app_label = if kind.is_local_db() {
            database_app_label(ctx.cr_name)
        } else {
            backstage_app_label(ctx.cr_name)
        };

        let template_meta = std::mem::take(self.meta_mut());
        *self.meta_mut() = ObjectMetaBuilder::from_template(template_meta)
            .name(kind.object_name(ctx.cr_name, &template_name))
            .namespace(ctx.namespace)
            .with_labels(recommended_labels(ctx.cr_name))
            .with_label(APP_KEY, app_label)
            .build();
    }

    /// Applies the fields of the `Backstage` that belong to this object alone.
    pub fn apply_spec(&mut self, ctx: &BuildContext<'_>) -> Result<()> {
        let spec = &ctx.backstage.spec;
        match self {
            Self::Deployment(deployment) => {
                let labels = selector_labels(&backstage_app_label(ctx.cr_name));
                if let Some(deployment_spec) = deployment.spec.as_mut() {
                    deployment_spec.selector = LabelSelector {
                        match_labels: Some(labels.clone()),
                        ..LabelSelector::default()
                    };
                    deployment_spec
                        .template
                        .metadata
                        .get_or_insert_with(ObjectMeta::default)
                        .labels
                        .get_or_insert_with(BTreeMap::new)
                        .extend(labels);
                    if let Some(replicas) = spec.application.as_ref().and_then(|app| app.replicas) {
                        deployment_spec.replicas = Some(replicas);
                    }
                }

                let mut pod = BackstagePod::new(deployment).context(WrapPodSnafu)?;
                if let Some(image) = ctx.backstage_image {
                    pod.set_image(image);
                }
                if let Some(application) = &spec.application {
                    if let Some(image) = &application.image {
                        pod.set_image(image);
                    }
                    if !application.image_pull_secrets.is_empty() {
                        pod.set_image_pull_secrets(&application.image_pull_secrets);
                    }
                }
            }
            Self::Service(service) => {
                if let Some(service_spec) = service.spec.as_mut() {
                    service_spec.selector = Some(selector_labels(&backstage_app_label(ctx.cr_name)));
                }
            }
            Self::DbService(service) | Self::DbHeadlessService(service) => {
                if let Some(service_spec) = service.spec.as_mut() {
                    service_spec.selector = Some(selector_labels(&database_app_label(ctx.cr_name)));
                }
            }
            Self::Route(route) => {
                route.spec.to.kind = "Service".to_owned();
                route.spec.to.name = RuntimeKind::Service.object_name(ctx.cr_name, "");
                if let Some(config) = spec.route() {
                    if let Some(host) = &config.host {
                        route.spec.host = Some(host.clone());
                    }
                    if let Some(subdomain) = &config.subdomain {
                        route.spec.subdomain = Some(subdomain.clone());
                    }
                    if let Some(tls_config) = &config.tls {
                        let tls = route.spec.tls.get_or_insert_with(|| TlsConfig {
                            termination: "edge".to_owned(),
                            ..TlsConfig::default()
                        });
                        if let Some(certificate) = &tls_config.certificate {
                            tls.certificate = Some(certificate.clone());
                        }
                        if let Some(key) = &tls_config.key {
                            tls.key = Some(key.clone());
                        }
                        if let Some(ca_certificate) = &tls_config.ca_certificate {
                            tls.ca_certificate = Some(ca_certificate.clone());
                        }
                        if let Some(name) = &tls_config.external_certificate_secret_name {
                            tls.external_certificate =
                                Some(LocalObjectReference { name: name.clone() });
                        }
                    }
                }
            }
            Self::DbStatefulSet(stateful_set) => {
                let labels = selector_labels(&database_app_label(ctx.cr_name));
                let secret_name = spec.auth_secret_name().map_or_else(
                    || RuntimeKind::DbSecret.object_name(ctx.cr_name, ""),
                    str::to_owned,
                );
                if let Some(sts_spec) = stateful_set.spec.as_mut() {
                    sts_spec.selector = LabelSelector {
                        match_labels: Some(labels.clone()),
                        ..LabelSelector::default()
                    };
                    sts_spec.service_name =
                        Some(RuntimeKind::DbHeadlessService.object_name(ctx.cr_name, ""));
                    sts_spec
                        .template
                        .metadata
                        .get_or_insert_with(ObjectMeta::default)
                        .labels
                        .get_or_insert_with(BTreeMap::new)
                        .extend(labels);

                    if let Some(container) = sts_spec
                        .template
                        .spec
                        .as_mut()
                        .and_then(|pod| pod.containers.first_mut())
                    {
                        if let Some(image) = ctx.postgresql_image {
                            container.image = Some(image.to_owned());
                        }
                        let env_from = container.env_from.get_or_insert_with(Vec::new);
                        env_from.retain(|source| source.secret_ref.is_none());
                        env_from.push(EnvFromSource {
                            secret_ref: Some(SecretEnvSource {
                                name: secret_name,
                                ..SecretEnvSource::default()
                            }),
                            ..EnvFromSource::default()
                        });
                    }
                }
            }
            Self::DbSecret(secret) => {
                let password = generate_password();
                let string_data = secret.string_data.get_or_insert_with(BTreeMap::new);
                string_data.insert("POSTGRES_PASSWORD".to_owned(), password.clone());
                string_data.insert("POSTGRESQL_ADMIN_PASSWORD".to_owned(), password);
                string_data.insert(
                    "POSTGRES_HOST".to_owned(),
                    RuntimeKind::DbService.object_name(ctx.cr_name, ""),
                );
            }
            Self::BackendAuthConfig(_)
            | Self::DynamicPlugins(_)
            | Self::ConfigMapFiles(_)
            | Self::ConfigMapEnvs(_)
            | Self::SecretFiles(_)
            | Self::SecretEnvs(_)
            | Self::Pvc(_) => {}
        }
        Ok(())
    }

    /// What this object adds to the pod of the Backstage Deployment, if anything.
    pub fn contribution(&self) -> Option<Contribution> {
        let name = self.name().to_owned();
        match self {
            Self::DbSecret(_) => Some(Contribution::EnvFrom {
                kind: ObjectKind::Secret,
                name,
                key: None,
            }),
            Self::BackendAuthConfig(config_map) => Some(Contribution::Files {
                kind: ObjectKind::ConfigMap,
                name,
                mount_path: DEFAULT_MOUNT_PATH.to_owned(),
                key: None,
                keys: config_map_keys(config_map),
                app_config: true,
            }),
            Self::DynamicPlugins(_) => Some(Contribution::DynamicPlugins { config_map: name }),
            Self::ConfigMapFiles(config_map) => Some(Contribution::Files {
                kind: ObjectKind::ConfigMap,
                name,
                mount_path: DEFAULT_MOUNT_PATH.to_owned(),
                key: None,
                keys: config_map_keys(config_map),
                app_config: false,
            }),
            Self::SecretFiles(secret) => Some(Contribution::Files {
                kind: ObjectKind::Secret,
                name,
                mount_path: DEFAULT_MOUNT_PATH.to_owned(),
                key: None,
                keys: secret_keys(secret),
                app_config: false,
            }),
            Self::ConfigMapEnvs(_) => Some(Contribution::EnvFrom {
                kind: ObjectKind::ConfigMap,
                name,
                key: None,
            }),
            Self::SecretEnvs(_) => Some(Contribution::EnvFrom {
                kind: ObjectKind::Secret,
                name,
                key: None,
            }),
            Self::Pvc(_) => Some(Contribution::Volume {
                mount_path: format!("{PVC_MOUNT_PATH}/{name}"),
                claim: name,
            }),
            Self::Deployment(_)
            | Self::Service(_)
            | Self::Route(_)
            | Self::DbStatefulSet(_)
            | Self::DbService(_)
            | Self::DbHeadlessService(_) => None,
        }
    }

    /// Adds a controlling owner reference to `backstage`.
    pub fn set_owner(&mut self, backstage: &Backstage) -> Result<()> {
        let kind = self.kind();
        let name = self.name().to_owned();
        let meta = std::mem::take(self.meta_mut());
        *self.meta_mut() = ObjectMetaBuilder::from_template(meta)
            .ownerreference_from_resource(backstage)
            .context(OwnerReferenceSnafu { kind, name })?
            .build();
        Ok(())
    }

    /// Moves `stringData` of Secrets into `data`, which is what the API
    /// server stores.
    pub fn normalize(&mut self) {
        if let Self::DbSecret(secret) | Self::SecretFiles(secret) | Self::SecretEnvs(secret) = self
            && let Some(string_data) = secret.string_data.take()
        {
            let data = secret.data.get_or_insert_with(BTreeMap::new);
            for (key, value) in string_data {
                data.insert(key, ByteString(value.into_bytes()));
            }
        }
    }

    /// Whether a changed object must be left as it is in the cluster.
    ///
    /// The generated database password and PVCs are only ever created.
    pub fn is_create_only(&self) -> bool {
        matches!(self, Self::DbSecret(_) | Self::Pvc(_))
    }
}
