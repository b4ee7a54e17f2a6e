//! Edits the pod of the Backstage Deployment: volumes, mounts, env and
//! arguments of the `backstage-backend` container.
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{
        ConfigMapEnvSource, ConfigMapKeySelector, Container, EnvFromSource, EnvVar,
        EnvVarSource, LocalObjectReference, PodSpec, SecretEnvSource, SecretKeySelector, Volume,
        VolumeMount,
    },
};
use snafu::{OptionExt, Snafu, ensure};
use tracing::{instrument, warn};

use self::volume::{VolumeBuilder, volume_mount};
use crate::{crd::ObjectKind, utils::to_rfc1123_label};

pub mod volume;

pub const BACKSTAGE_CONTAINER_NAME: &str = "backstage-backend";
pub const DYNAMIC_PLUGINS_INIT_CONTAINER_NAME: &str = "install-dynamic-plugins";
pub const DYNAMIC_PLUGINS_FILE: &str = "dynamic-plugins.yaml";
pub const DYNAMIC_PLUGINS_MOUNT_PATH: &str = "/opt/app-root/src/dynamic-plugins.yaml";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("deployment template has no pod spec"))]
    MissingPodTemplate,

    #[snafu(display(
        "deployment template must have exactly one container, found {containers}"
    ))]
    InvalidPodShape { containers: usize },

    #[snafu(display(
        "Colliding volume name {colliding_volume_name:?} in volumes with different content"
    ))]
    VolumeNameCollision { colliding_volume_name: String },
}

/// Mutable view on the pod of the Backstage Deployment.
///
/// Every contributor goes through this type, one after another, so the
/// resulting order of volumes, mounts, env vars and arguments only depends
/// on the order of the calls.
pub struct BackstagePod<'a> {
    spec: &'a mut PodSpec,
    has_backstage_container: bool,
}

impl<'a> BackstagePod<'a> {
    /// Wraps the pod of `deployment`, which must have exactly one container.
    pub fn new(deployment: &'a mut Deployment) -> Result<Self> {
        let spec = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .context(MissingPodTemplateSnafu)?;

        ensure!(
            spec.containers.len() == 1,
            InvalidPodShapeSnafu {
                containers: spec.containers.len()
            }
        );

        let has_backstage_container = spec
            .containers
            .iter()
            .any(|c| c.name == BACKSTAGE_CONTAINER_NAME);
        Ok(Self {
            spec,
            has_backstage_container,
        })
    }

    pub fn spec(&self) -> &PodSpec {
        self.spec
    }

    /// Whether the pod has a `backstage-backend` container. Without one every
    /// container edit is skipped.
    pub fn has_backstage_container(&self) -> bool {
        self.has_backstage_container
    }

    /// The `backstage-backend` container, if the template has one.
    pub fn backstage_container(&mut self) -> Option<&mut Container> {
        if !self.has_backstage_container {
            return None;
        }
        self.spec
            .containers
            .iter_mut()
            .find(|c| c.name == BACKSTAGE_CONTAINER_NAME)
    }

    pub fn init_container(&mut self, name: &str) -> Option<&mut Container> {
        self.spec
            .init_containers
            .iter_mut()
            .flatten()
            .find(|c| c.name == name)
    }

    /// Adds a [`Volume`] to the pod.
    ///
    /// Adding a volume twice is fine, adding a different volume under an
    /// existing name is an error.
    pub fn add_volume(&mut self, volume: Volume) -> Result<&mut Self> {
        let volumes = self.spec.volumes.get_or_insert_with(Vec::new);
        match volumes.iter().find(|existing| existing.name == volume.name) {
            Some(existing) if existing != &volume => {
                let colliding_volume_name = &volume.name;
                tracing::error!(
                    colliding_volume_name,
                    ?existing,
                    "Colliding volume name in volumes with different content"
                );
                return VolumeNameCollisionSnafu {
                    colliding_volume_name,
                }
                .fail();
            }
            Some(_) => {}
            None => volumes.push(volume),
        }

        Ok(self)
    }

    /// Mounts files of the ConfigMap or Secret `object_name` into the
    /// Backstage container below `mount_path`.
    ///
    /// With `single_key` only that key is mounted, otherwise every one of
    /// `data_keys`, in the given order. Each file gets its own mount with
    /// `subPath` set to the key. Returns the paths of the mounted files.
    #[instrument(skip(self, data_keys))]
    pub fn mount_files_from(
        &mut self,
        kind: ObjectKind,
        object_name: &str,
        mount_path: &str,
        single_key: Option<&str>,
        data_keys: &[String],
    ) -> Result<Vec<String>> {
        let keys: Vec<&str> = match single_key {
            Some(key) => vec![key],
            None => data_keys.iter().map(String::as_str).collect(),
        };
        if keys.is_empty() || self.backstage_container().is_none() {
            return Ok(vec![]);
        }

        let volume_name = to_rfc1123_label(object_name);
        let mut volume = VolumeBuilder::new(&volume_name);
        match kind {
            ObjectKind::ConfigMap => volume.with_config_map(object_name),
            ObjectKind::Secret => volume.with_secret(object_name, false),
        };
        self.add_volume(volume.build())?;

        let paths: Vec<String> = keys
            .iter()
            .map(|key| format!("{}/{key}", mount_path.trim_end_matches('/')))
            .collect();
        if let Some(container) = self.backstage_container() {
            for (key, path) in keys.iter().zip(&paths) {
                add_volume_mount(container, volume_mount(&volume_name, path, Some(*key)));
            }
        }

        Ok(paths)
    }

    /// Mounts a whole volume (e.g. a PVC) into the Backstage container.
    pub fn mount_volume(&mut self, volume: Volume, mount_path: &str) -> Result<&mut Self> {
        let volume_name = volume.name.clone();
        self.add_volume(volume)?;
        if let Some(container) = self.backstage_container() {
            add_volume_mount(container, volume_mount(volume_name, mount_path, None));
        }
        Ok(self)
    }

    /// Appends a `--config <path>` argument pair per path, in order.
    pub fn add_app_config_args(&mut self, paths: &[String]) -> &mut Self {
        if let Some(container) = self.backstage_container() {
            let args = container.args.get_or_insert_with(Vec::new);
            for path in paths {
                args.push("--config".to_owned());
                args.push(path.clone());
            }
        }
        self
    }

    /// Injects the ConfigMap or Secret `object_name` as environment.
    ///
    /// With `single_key` a single variable named after the key is added,
    /// otherwise an `envFrom` entry importing every key.
    #[instrument(skip(self))]
    pub fn add_env_vars_from(
        &mut self,
        kind: ObjectKind,
        object_name: &str,
        single_key: Option<&str>,
    ) -> &mut Self {
        match single_key {
            Some(key) => {
                let value_from = match kind {
                    ObjectKind::ConfigMap => EnvVarSource {
                        config_map_key_ref: Some(ConfigMapKeySelector {
                            key: key.to_owned(),
                            name: object_name.to_owned(),
                            ..ConfigMapKeySelector::default()
                        }),
                        ..EnvVarSource::default()
                    },
                    ObjectKind::Secret => EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            key: key.to_owned(),
                            name: object_name.to_owned(),
                            ..SecretKeySelector::default()
                        }),
                        ..EnvVarSource::default()
                    },
                };
                self.add_env_var(EnvVar {
                    name: key.to_owned(),
                    value_from: Some(value_from),
                    ..EnvVar::default()
                })
            }
            None => {
                let env_from = match kind {
                    ObjectKind::ConfigMap => EnvFromSource {
                        config_map_ref: Some(ConfigMapEnvSource {
                            name: object_name.to_owned(),
                            ..ConfigMapEnvSource::default()
                        }),
                        ..EnvFromSource::default()
                    },
                    ObjectKind::Secret => EnvFromSource {
                        secret_ref: Some(SecretEnvSource {
                            name: object_name.to_owned(),
                            ..SecretEnvSource::default()
                        }),
                        ..EnvFromSource::default()
                    },
                };
                if let Some(container) = self.backstage_container() {
                    let env_from_list = container.env_from.get_or_insert_with(Vec::new);
                    if !env_from_list.contains(&env_from) {
                        env_from_list.push(env_from);
                    }
                }
                self
            }
        }
    }

    /// Adds `env` to the Backstage container, replacing a variable of the same name.
    pub fn add_env_var(&mut self, env: EnvVar) -> &mut Self {
        if let Some(container) = self.backstage_container() {
            let envs = container.env.get_or_insert_with(Vec::new);
            match envs.iter_mut().find(|existing| existing.name == env.name) {
                Some(existing) => *existing = env,
                None => envs.push(env),
            }
        }
        self
    }

    /// Adds a variable named `name` read from `key` of the Secret `secret_name`.
    pub fn add_env_var_from_secret(&mut self, name: &str, secret_name: &str, key: &str) -> &mut Self {
        self.add_env_var(EnvVar {
            name: name.to_owned(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    key: key.to_owned(),
                    name: secret_name.to_owned(),
                    ..SecretKeySelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        })
    }

    /// Sets the image of the Backstage container and of the dynamic plugins
    /// init container, which run the same image.
    pub fn set_image(&mut self, image: &str) -> &mut Self {
        if let Some(container) = self.backstage_container() {
            container.image = Some(image.to_owned());
        }
        if let Some(container) = self.init_container(DYNAMIC_PLUGINS_INIT_CONTAINER_NAME) {
            container.image = Some(image.to_owned());
        }
        self
    }

    pub fn set_image_pull_secrets(&mut self, secrets: &[String]) -> &mut Self {
        self.spec.image_pull_secrets = Some(
            secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        );
        self
    }

    /// Mounts `dynamic-plugins.yaml` of the ConfigMap `config_map_name` into
    /// the dynamic plugins init container.
    pub fn mount_dynamic_plugins(&mut self, config_map_name: &str) -> Result<&mut Self> {
        let volume_name = to_rfc1123_label(config_map_name);
        self.add_volume(
            VolumeBuilder::new(&volume_name)
                .with_config_map(config_map_name)
                .build(),
        )?;

        match self.init_container(DYNAMIC_PLUGINS_INIT_CONTAINER_NAME) {
            Some(container) => add_volume_mount(
                container,
                volume_mount(
                    volume_name,
                    DYNAMIC_PLUGINS_MOUNT_PATH,
                    Some(DYNAMIC_PLUGINS_FILE),
                ),
            ),
            None => warn!(
                container.name = DYNAMIC_PLUGINS_INIT_CONTAINER_NAME,
                "init container not found, dynamic plugins are not mounted"
            ),
        }
        Ok(self)
    }
}

/// Adds `mount` unless the container already has a mount at that path.
fn add_volume_mount(container: &mut Container, mount: VolumeMount) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts.iter_mut().find(|m| m.mount_path == mount.mount_path) {
        Some(existing) => *existing = mount,
        None => mounts.push(mount),
    }
}
