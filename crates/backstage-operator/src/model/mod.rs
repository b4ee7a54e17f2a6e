//! Builds the desired runtime objects of a `Backstage` from the object
//! templates, the `Backstage` fields and the collected external config.
//!
//! [`BackstageModel::build`] never talks to the cluster. It walks the
//! [`Registry`] in order, loads every requested object from its template,
//! names and labels it, applies the fields of the `Backstage` and finally
//! lets every contributor edit the pod of the Backstage Deployment, one
//! after another. The resulting model is validated before it is returned.
use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::PodSpec};
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, warn};

use crate::{
    builder::pod::{self, BACKSTAGE_CONTAINER_NAME, BackstagePod, DYNAMIC_PLUGINS_INIT_CONTAINER_NAME},
    crd::{Backstage, route::Route},
    external_config::{self, ExternalConfig, dynamic_plugins_config_map_name},
    kvp::EXT_CONFIG_HASH_KEY,
    merge,
    model::{
        contribution::{Contribution, spec_contributions},
        object::BuildContext,
    },
    template,
    utils::to_rfc1123_label,
};

pub mod contribution;
pub mod object;
pub mod registry;

pub(crate) use self::object::for_each_runtime_object;
pub use self::{
    object::{RuntimeKind, RuntimeObject},
    registry::{Need, ObjectConfig, Registry},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to load object template"))]
    LoadTemplate { source: template::Error },

    #[snafu(display("mandatory template {key:?} is missing"))]
    MissingMandatoryTemplate { key: &'static str },

    #[snafu(display("failed to build object from template {key:?}"))]
    BuildObject {
        source: object::Error,
        key: &'static str,
    },

    #[snafu(display("failed to set the owner of a runtime object"))]
    SetOwner { source: object::Error },

    #[snafu(display("failed to edit the pod of the Backstage Deployment"))]
    MutatePod { source: pod::Error },

    #[snafu(display("invalid reference to external config"))]
    ExternalConfig { source: external_config::Error },

    #[snafu(display("failed to apply the deployment patch"))]
    DeploymentPatch { source: merge::Error },

    #[snafu(display("invalid model: {message}"))]
    Validation { message: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Operator level settings the model depends on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModelOptions {
    /// Sets a controlling owner reference to the `Backstage` on every object.
    pub owns_runtime: bool,
    pub is_openshift: bool,
    /// Overrides the image of the Backstage containers.
    pub backstage_image: Option<String>,
    /// Overrides the image of the PostgreSQL container.
    pub postgresql_image: Option<String>,
}

/// The desired state of one `Backstage`.
#[derive(Clone, Debug, PartialEq)]
pub struct BackstageModel {
    /// Objects to apply, in registry order.
    pub objects: Vec<RuntimeObject>,
    /// Objects of a previous configuration to delete, e.g. the database
    /// objects once the local database is disabled.
    pub obsolete: Vec<RuntimeObject>,
    pub local_db_enabled: bool,
    /// ConfigMap mounted into the dynamic plugins init container.
    pub dynamic_plugins_config_map: Option<String>,
}

impl BackstageModel {
    pub fn build(
        registry: &Registry,
        backstage: &Backstage,
        external_config: &ExternalConfig,
        options: &ModelOptions,
    ) -> Result<Self> {
        let namespace = backstage.namespace().context(ObjectHasNoNamespaceSnafu)?;
        let cr_name = backstage.name_any();
        let spec = &backstage.spec;
        let ctx = BuildContext {
            backstage,
            cr_name: &cr_name,
            namespace: &namespace,
            backstage_image: options.backstage_image.as_deref(),
            postgresql_image: options.postgresql_image.as_deref(),
        };

        let local_db_enabled = spec.local_db_enabled();
        let route_enabled = options.is_openshift && spec.route_enabled();
        let user_dynamic_plugins =
            dynamic_plugins_config_map_name(spec).context(ExternalConfigSnafu)?;

        let mut objects = vec![];
        let mut obsolete = vec![];
        for config in registry.iter() {
            let kind = config.kind;
            let retired = match config.need {
                Need::ForLocalDatabase => !local_db_enabled,
                Need::ForOpenshift if !options.is_openshift => continue,
                Need::ForOpenshift => !route_enabled,
                Need::Mandatory | Need::Optional => false,
            };
            let generated_name = kind.object_name(&cr_name, "");
            if retired {
                if spec.auth_secret_name() != Some(generated_name.as_str()) {
                    obsolete.push(kind.empty_object(&generated_name, &namespace));
                }
                continue;
            }

            match kind {
                RuntimeKind::BackendAuthConfig if spec.backend_auth_secret_ref.is_none() => continue,
                RuntimeKind::DynamicPlugins if user_dynamic_plugins.is_some() => continue,
                RuntimeKind::DbSecret => {
                    if let Some(auth_secret_name) = spec.auth_secret_name() {
                        if auth_secret_name != generated_name {
                            obsolete.push(kind.empty_object(&generated_name, &namespace));
                        }
                        continue;
                    }
                }
                _ => {}
            }

            let raw_config = if kind.is_local_db() {
                &external_config.raw_db_config
            } else {
                &external_config.raw_config
            };
            let loaded = kind.load(config.key, raw_config).context(LoadTemplateSnafu)?;
            ensure!(
                !loaded.is_empty() || config.need != Need::Mandatory,
                MissingMandatoryTemplateSnafu { key: config.key }
            );

            for mut object in loaded {
                object.set_meta_info(&ctx);
                object
                    .apply_spec(&ctx)
                    .context(BuildObjectSnafu { key: config.key })?;
                debug!(object.kind = %kind, object.name = object.name(), "added object to model");
                objects.push(object);
            }
        }

        let mut contributions: Vec<Contribution> = objects
            .iter()
            .filter_map(RuntimeObject::contribution)
            .collect();
        contributions.extend(spec_contributions(spec, external_config).context(ExternalConfigSnafu)?);

        let external_config_hash = external_config.content_hash();
        let deployment = objects
            .iter_mut()
            .find_map(|object| match object {
                RuntimeObject::Deployment(deployment) => Some(deployment),
                _ => None,
            })
            .context(MissingMandatoryTemplateSnafu {
                key: template::DEPLOYMENT,
            })?;
        update_deployment(deployment, &contributions, &external_config_hash)?;
        if let Some(patch) = spec.deployment_patch() {
            *deployment = merge::patch_object(deployment, patch).context(DeploymentPatchSnafu)?;
        }

        for object in &mut objects {
            object.normalize();
            if options.owns_runtime {
                object.set_owner(backstage).context(SetOwnerSnafu)?;
            }
        }

        let dynamic_plugins_config_map = user_dynamic_plugins.map(str::to_owned).or_else(|| {
            objects
                .iter()
                .find(|object| object.kind() == RuntimeKind::DynamicPlugins)
                .map(|object| object.name().to_owned())
        });

        let model = Self {
            objects,
            obsolete,
            local_db_enabled,
            dynamic_plugins_config_map,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn find(&self, kind: RuntimeKind) -> Option<&RuntimeObject> {
        self.objects.iter().find(|object| object.kind() == kind)
    }

    pub fn deployment(&self) -> Option<&Deployment> {
        self.objects.iter().find_map(|object| match object {
            RuntimeObject::Deployment(deployment) => Some(deployment),
            _ => None,
        })
    }

    pub fn route(&self) -> Option<&Route> {
        self.objects.iter().find_map(|object| match object {
            RuntimeObject::Route(route) => Some(route),
            _ => None,
        })
    }

    /// Checks the references between the objects of the model.
    fn validate(&self) -> Result<()> {
        let pod = self
            .deployment()
            .and_then(|deployment| deployment.spec.as_ref())
            .and_then(|spec| spec.template.spec.as_ref())
            .context(ValidationSnafu {
                message: "the Backstage Deployment has no pod spec",
            })?;
        ensure!(
            pod.containers.iter().any(|c| c.name == BACKSTAGE_CONTAINER_NAME),
            ValidationSnafu {
                message: format!("the Backstage Deployment has no {BACKSTAGE_CONTAINER_NAME:?} container"),
            }
        );

        if let Some(config_map) = &self.dynamic_plugins_config_map {
            validate_dynamic_plugins(pod, config_map)?;
        }

        if let Some(route) = self.route() {
            let service = self.find(RuntimeKind::Service).map(RuntimeObject::name);
            ensure!(
                service == Some(route.spec.to.name.as_str()),
                ValidationSnafu {
                    message: format!(
                        "route {:?} points to unknown service {:?}",
                        route.name_any(),
                        route.spec.to.name
                    ),
                }
            );
        }

        Ok(())
    }
}

/// Runs every contributor on the pod of `deployment` and stamps it with
/// the external config hash.
fn update_deployment(
    deployment: &mut Deployment,
    contributions: &[Contribution],
    external_config_hash: &str,
) -> Result<()> {
    let mut pod = BackstagePod::new(deployment).context(MutatePodSnafu)?;
    if !pod.has_backstage_container() {
        warn!(
            container.name = BACKSTAGE_CONTAINER_NAME,
            "container not found, skipping pod mutation"
        );
    }
    for contribution in contributions {
        contribution.update_pod(&mut pod).context(MutatePodSnafu)?;
    }

    if let Some(spec) = deployment.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(EXT_CONFIG_HASH_KEY.to_owned(), external_config_hash.to_owned());
    }
    Ok(())
}

/// The dynamic plugins ConfigMap must be a declared volume, and so must be
/// every volume the init container mounts.
fn validate_dynamic_plugins(pod: &PodSpec, config_map: &str) -> Result<()> {
    let declared: BTreeSet<&str> = pod
        .volumes
        .iter()
        .flatten()
        .map(|volume| volume.name.as_str())
        .collect();

    let volume_name = to_rfc1123_label(config_map);
    ensure!(
        declared.contains(volume_name.as_str()),
        ValidationSnafu {
            message: format!("dynamic plugins volume {volume_name:?} is not declared"),
        }
    );

    let init_container = pod
        .init_containers
        .iter()
        .flatten()
        .find(|c| c.name == DYNAMIC_PLUGINS_INIT_CONTAINER_NAME);
    for mount in init_container
        .iter()
        .flat_map(|container| container.volume_mounts.iter().flatten())
    {
        ensure!(
            declared.contains(mount.name.as_str()),
            ValidationSnafu {
                message: format!(
                    "{DYNAMIC_PLUGINS_INIT_CONTAINER_NAME:?} mounts undeclared volume {:?}",
                    mount.name
                ),
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::{
        ByteString,
        api::{
            apps::v1::StatefulSet,
            core::v1::{ConfigMap, Container, Secret},
        },
    };
    use rstest::rstest;

    use super::*;
    use crate::{crd::BackstageSpec, kvp::APP_KEY};

    fn backstage(spec: &str) -> Backstage {
        let spec: BackstageSpec = serde_yaml::from_str(spec).expect("test YAML is valid");
        let mut backstage = Backstage::new("bs1", spec);
        backstage.metadata.namespace = Some("ns1".to_owned());
        backstage.metadata.uid = Some("c8a1d3e0-uid".to_owned());
        backstage
    }

    fn build(backstage: &Backstage, external_config: &ExternalConfig, options: &ModelOptions) -> BackstageModel {
        BackstageModel::build(&Registry::default(), backstage, external_config, options)
            .expect("model is valid")
    }

    fn build_default(spec: &str) -> BackstageModel {
        build(&backstage(spec), &ExternalConfig::default(), &ModelOptions::default())
    }

    fn backstage_container(model: &BackstageModel) -> &Container {
        model
            .deployment()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.iter().find(|c| c.name == BACKSTAGE_CONTAINER_NAME))
            .expect("backstage container exists")
    }

    fn db_stateful_set(model: &BackstageModel) -> &StatefulSet {
        model
            .objects
            .iter()
            .find_map(|object| match object {
                RuntimeObject::DbStatefulSet(sts) => Some(sts),
                _ => None,
            })
            .expect("database StatefulSet exists")
    }

    fn db_secret(model: &BackstageModel) -> &Secret {
        model
            .objects
            .iter()
            .find_map(|object| match object {
                RuntimeObject::DbSecret(secret) => Some(secret),
                _ => None,
            })
            .expect("database Secret exists")
    }

    fn kinds_and_names(objects: &[RuntimeObject]) -> Vec<(RuntimeKind, &str)> {
        objects.iter().map(|o| (o.kind(), o.name())).collect()
    }

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn default_model() {
        let model = build_default("{}");

        assert_eq!(kinds_and_names(&model.objects), vec![
            (RuntimeKind::Deployment, "bs1-deployment"),
            (RuntimeKind::Service, "bs1-service"),
            (RuntimeKind::DbStatefulSet, "backstage-psql-bs1"),
            (RuntimeKind::DbService, "backstage-psql-bs1"),
            (RuntimeKind::DbHeadlessService, "backstage-psql-bs1-hl"),
            (RuntimeKind::DbSecret, "backstage-psql-secret-bs1"),
            (RuntimeKind::DynamicPlugins, "bs1-dynamic-plugins"),
        ]);
        assert!(model.obsolete.is_empty());
        assert!(model.local_db_enabled);
        assert_eq!(model.dynamic_plugins_config_map.as_deref(), Some("bs1-dynamic-plugins"));

        for object in &model.objects {
            assert_eq!(object.meta().namespace.as_deref(), Some("ns1"));
            assert!(object.meta().owner_references.is_none());
        }

        let deployment = model.deployment().expect("deployment exists");
        let spec = deployment.spec.as_ref().expect("deployment has a spec");
        let selector = spec.selector.match_labels.as_ref().expect("selector is set");
        assert_eq!(selector.get(APP_KEY).map(String::as_str), Some("backstage-bs1"));
        let annotations = spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .expect("pod template is annotated");
        assert_eq!(
            annotations.get(EXT_CONFIG_HASH_KEY),
            Some(&ExternalConfig::default().content_hash())
        );
    }

    #[rstest]
    #[case::enabled("{}", true)]
    #[case::disabled("application: {route: {enabled: false}}", false)]
    fn route_on_openshift(#[case] spec: &str, #[case] expected: bool) {
        let options = ModelOptions {
            is_openshift: true,
            ..ModelOptions::default()
        };
        let model = build(&backstage(spec), &ExternalConfig::default(), &options);

        assert_eq!(model.route().is_some(), expected);
        assert_eq!(
            model.obsolete.iter().any(|o| o.kind() == RuntimeKind::Route),
            !expected
        );
        if let Some(route) = model.route() {
            assert_eq!(route.name_any(), "backstage-bs1");
            assert_eq!(route.spec.to.name, "bs1-service");
            assert_eq!(kinds_and_names(&model.objects)[2], (RuntimeKind::Route, "backstage-bs1"));
        }
    }

    #[test]
    fn route_is_left_alone_outside_openshift() {
        let model = build_default("application: {route: {enabled: false}}");

        assert!(model.route().is_none());
        assert!(model.obsolete.is_empty());
    }

    #[test]
    fn route_host_and_tls_from_spec() {
        let options = ModelOptions {
            is_openshift: true,
            ..ModelOptions::default()
        };
        let model = build(
            &backstage(indoc! {"
                application:
                  route:
                    host: portal.example.com
                    tls:
                      certificate: CERT
                      externalCertificateSecretName: tls-secret
            "}),
            &ExternalConfig::default(),
            &options,
        );

        let route = model.route().expect("route exists");
        assert_eq!(route.spec.host.as_deref(), Some("portal.example.com"));
        let tls = route.spec.tls.as_ref().expect("tls is set");
        assert_eq!(tls.termination, "edge");
        assert_eq!(tls.certificate.as_deref(), Some("CERT"));
        assert_eq!(
            tls.external_certificate.as_ref().map(|r| r.name.as_str()),
            Some("tls-secret")
        );
    }

    #[test]
    fn app_configs_are_mounted_and_passed_in_order() {
        let backstage = backstage(indoc! {"
            application:
              appConfig:
                mountPath: /my/mount/path
                configMaps:
                  - name: app-config1
        "});
        let external_config = ExternalConfig {
            app_configs: BTreeMap::from([(
                "app-config1".to_owned(),
                config_map(&[("key12", "b"), ("key11", "a")]),
            )]),
            ..ExternalConfig::default()
        };
        let model = build(&backstage, &external_config, &ModelOptions::default());
        let container = backstage_container(&model);

        let mounts: Vec<&str> = container
            .volume_mounts
            .iter()
            .flatten()
            .filter(|m| m.name == "app-config1")
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(mounts, ["/my/mount/path/key11", "/my/mount/path/key12"]);

        let args = container.args.as_ref().expect("args are set");
        let tail: Vec<&str> = args.iter().rev().take(4).rev().map(String::as_str).collect();
        assert_eq!(tail, [
            "--config",
            "/my/mount/path/key11",
            "--config",
            "/my/mount/path/key12"
        ]);
    }

    #[test]
    fn backend_auth_config_comes_before_user_app_configs() {
        let backstage = backstage(indoc! {"
            backendAuthSecretRef:
              name: auth
            application:
              appConfig:
                configMaps:
                  - name: my-config
        "});
        let external_config = ExternalConfig {
            app_configs: BTreeMap::from([("my-config".to_owned(), config_map(&[("app.yaml", "")]))]),
            ..ExternalConfig::default()
        };
        let model = build(&backstage, &external_config, &ModelOptions::default());
        let container = backstage_container(&model);

        assert!(model.find(RuntimeKind::BackendAuthConfig).is_some());
        let configs: Vec<&str> = container
            .args
            .iter()
            .flatten()
            .skip_while(|arg| *arg != "/opt/app-root/src/app-config.backend-auth.default.yaml")
            .map(String::as_str)
            .collect();
        assert_eq!(configs, [
            "/opt/app-root/src/app-config.backend-auth.default.yaml",
            "--config",
            "/opt/app-root/src/app.yaml"
        ]);

        let env = container
            .env
            .iter()
            .flatten()
            .find(|e| e.name == "BACKEND_SECRET")
            .and_then(|e| e.value_from.as_ref())
            .and_then(|v| v.secret_key_ref.as_ref())
            .expect("BACKEND_SECRET is set");
        assert_eq!((env.name.as_str(), env.key.as_str()), ("auth", "backend-secret"));
    }

    #[test]
    fn local_db_disabled() {
        let model = build_default("database: {enableLocalDb: false}");

        assert!(!model.local_db_enabled);
        assert!(model.objects.iter().all(|o| !o.kind().is_local_db()));
        assert_eq!(kinds_and_names(&model.obsolete), vec![
            (RuntimeKind::DbStatefulSet, "backstage-psql-bs1"),
            (RuntimeKind::DbService, "backstage-psql-bs1"),
            (RuntimeKind::DbHeadlessService, "backstage-psql-bs1-hl"),
            (RuntimeKind::DbSecret, "backstage-psql-secret-bs1"),
        ]);
    }

    #[test]
    fn local_db_generates_password() {
        let model = build_default("{}");

        let secret = db_secret(&model);
        assert!(secret.string_data.is_none());
        let data = secret.data.as_ref().expect("secret has data");
        let password = data.get("POSTGRES_PASSWORD").expect("password is set");
        assert_eq!(password.0.len(), 32);
        assert_eq!(data.get("POSTGRESQL_ADMIN_PASSWORD"), Some(password));
        assert_eq!(
            data.get("POSTGRES_HOST"),
            Some(&ByteString(b"backstage-psql-bs1".to_vec()))
        );

        let sts = db_stateful_set(&model);
        let sts_spec = sts.spec.as_ref().expect("sts has a spec");
        assert_eq!(sts_spec.service_name.as_deref(), Some("backstage-psql-bs1-hl"));
        let env_from: Vec<&str> = sts_spec
            .template
            .spec
            .iter()
            .flat_map(|pod| pod.containers.iter())
            .flat_map(|c| c.env_from.iter().flatten())
            .filter_map(|e| e.secret_ref.as_ref().map(|s| s.name.as_str()))
            .collect();
        assert_eq!(env_from, ["backstage-psql-secret-bs1"]);

        let backstage_env_from: Vec<&str> = backstage_container(&model)
            .env_from
            .iter()
            .flatten()
            .filter_map(|e| e.secret_ref.as_ref().map(|s| s.name.as_str()))
            .collect();
        assert_eq!(backstage_env_from, ["backstage-psql-secret-bs1"]);
    }

    #[test]
    fn existing_auth_secret_is_used() {
        let model = build_default("database: {authSecretName: my-db-creds}");

        assert!(model.find(RuntimeKind::DbSecret).is_none());
        assert_eq!(kinds_and_names(&model.obsolete), vec![(
            RuntimeKind::DbSecret,
            "backstage-psql-secret-bs1"
        )]);

        let env_from: Vec<&str> = db_stateful_set(&model)
            .spec
            .iter()
            .flat_map(|s| s.template.spec.iter())
            .flat_map(|pod| pod.containers.iter())
            .flat_map(|c| c.env_from.iter().flatten())
            .filter_map(|e| e.secret_ref.as_ref().map(|s| s.name.as_str()))
            .collect();
        assert_eq!(env_from, ["my-db-creds"]);
    }

    #[rstest]
    #[case::override_only(None, None, "quay.io/override:1")]
    #[case::spec_beats_override(Some("quay.io/spec:2"), None, "quay.io/spec:2")]
    #[case::patch_beats_spec(Some("quay.io/spec:2"), Some("quay.io/patched:3"), "quay.io/patched:3")]
    fn image_precedence(
        #[case] spec_image: Option<&str>,
        #[case] patch_image: Option<&str>,
        #[case] expected: &str,
    ) {
        let mut backstage = backstage("{}");
        if let Some(image) = spec_image {
            backstage.spec.application = Some(crate::crd::Application {
                image: Some(image.to_owned()),
                ..crate::crd::Application::default()
            });
        }
        if let Some(image) = patch_image {
            backstage.spec.deployment = Some(crate::crd::BackstageDeployment {
                patch: Some(serde_json::json!({
                    "spec": {"template": {"spec": {"containers": [
                        {"name": BACKSTAGE_CONTAINER_NAME, "image": image}
                    ]}}}
                })),
            });
        }
        let options = ModelOptions {
            backstage_image: Some("quay.io/override:1".to_owned()),
            ..ModelOptions::default()
        };

        let model = build(&backstage, &ExternalConfig::default(), &options);

        assert_eq!(backstage_container(&model).image.as_deref(), Some(expected));
    }

    #[test]
    fn owner_references_when_owning_runtime() {
        let options = ModelOptions {
            owns_runtime: true,
            ..ModelOptions::default()
        };
        let model = build(&backstage("{}"), &ExternalConfig::default(), &options);

        for object in &model.objects {
            let owners = object.meta().owner_references.as_ref().expect("owner is set");
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].uid, "c8a1d3e0-uid");
            assert_eq!(owners[0].controller, Some(true));
        }
    }

    #[test]
    fn build_is_deterministic() {
        let backstage = backstage(indoc! {"
            application:
              extraFiles:
                configMaps:
                  - name: files
        "});
        let external_config = ExternalConfig {
            extra_file_config_maps: BTreeMap::from([(
                "files".to_owned(),
                config_map(&[("z.txt", ""), ("a.txt", ""), ("m.txt", "")]),
            )]),
            ..ExternalConfig::default()
        };

        let first = build(&backstage, &external_config, &ModelOptions::default());
        let second = build(&backstage, &external_config, &ModelOptions::default());

        assert_eq!(first.deployment(), second.deployment());
    }

    #[test]
    fn user_dynamic_plugins_replace_default() {
        let model = build_default("application: {dynamicPluginsConfigMapName: my-plugins}");

        assert!(model.find(RuntimeKind::DynamicPlugins).is_none());
        assert_eq!(model.dynamic_plugins_config_map.as_deref(), Some("my-plugins"));
        let volumes = model
            .deployment()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.volumes.as_ref())
            .expect("volumes are set");
        assert!(volumes.iter().any(|v| v.name == "my-plugins"));
    }

    #[test]
    fn undeclared_init_container_volume_is_rejected() {
        let backstage = backstage(indoc! {"
            deployment:
              patch:
                spec:
                  template:
                    spec:
                      initContainers:
                        - name: install-dynamic-plugins
                          volumeMounts:
                            - name: ghost
                              mountPath: /ghost
        "});

        let error = BackstageModel::build(
            &Registry::default(),
            &backstage,
            &ExternalConfig::default(),
            &ModelOptions::default(),
        )
        .expect_err("undeclared volume is rejected");

        assert!(matches!(error, Error::Validation { .. }), "{error}");
    }

    #[test]
    fn deployment_template_with_two_containers_is_rejected() {
        let external_config = ExternalConfig {
            raw_config: BTreeMap::from([(
                template::DEPLOYMENT.to_owned(),
                indoc! {"
                    apiVersion: apps/v1
                    kind: Deployment
                    metadata:
                      name: backstage
                    spec:
                      selector: {}
                      template:
                        spec:
                          containers:
                            - name: backstage-backend
                            - name: sidecar
                "}
                .to_owned(),
            )]),
            ..ExternalConfig::default()
        };

        let error = BackstageModel::build(
            &Registry::default(),
            &backstage("{}"),
            &external_config,
            &ModelOptions::default(),
        )
        .expect_err("two containers are rejected");

        assert!(
            matches!(error, Error::BuildObject {
                source: object::Error::WrapPod {
                    source: pod::Error::InvalidPodShape { containers: 2 }
                },
                ..
            }),
            "{error}"
        );
    }

    #[test]
    fn pvcs_are_mounted() {
        let external_config = ExternalConfig {
            raw_config: BTreeMap::from([(
                template::PVCS.to_owned(),
                indoc! {"
                    apiVersion: v1
                    kind: PersistentVolumeClaim
                    metadata:
                      name: cache
                    spec:
                      accessModes: [ReadWriteOnce]
                "}
                .to_owned(),
            )]),
            ..ExternalConfig::default()
        };

        let model = build(&backstage("{}"), &external_config, &ModelOptions::default());

        let pvc = model.find(RuntimeKind::Pvc).expect("pvc exists");
        assert_eq!(pvc.name(), "bs1-cache");
        assert!(pvc.is_create_only());
        let mount = backstage_container(&model)
            .volume_mounts
            .iter()
            .flatten()
            .find(|m| m.name == "bs1-cache")
            .expect("pvc is mounted");
        assert_eq!(mount.mount_path, "/opt/app-root/src/bs1-cache");
    }

    #[test]
    fn missing_namespace_is_rejected() {
        let mut backstage = backstage("{}");
        backstage.metadata.namespace = None;

        let error = BackstageModel::build(
            &Registry::default(),
            &backstage,
            &ExternalConfig::default(),
            &ModelOptions::default(),
        )
        .expect_err("namespace is required");

        assert!(matches!(error, Error::ObjectHasNoNamespace));
    }
}
