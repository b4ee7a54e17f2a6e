//! Edits of the Backstage pod, contributed by runtime objects and by the
//! fields of a `Backstage`.
use k8s_openapi::api::core::v1::EnvVar;

use crate::{
    builder::pod::{self, BackstagePod, volume::VolumeBuilder},
    crd::{BackstageSpec, DEFAULT_MOUNT_PATH, ObjectKind},
    external_config::{ExternalConfig, config_map_keys, dynamic_plugins_config_map_name, secret_keys},
    utils::to_rfc1123_label,
};

/// Name of the env var holding the backend auth secret.
pub const BACKEND_SECRET_ENV: &str = "BACKEND_SECRET";

/// A single edit of the Backstage pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Contribution {
    /// Mounts files of a ConfigMap or Secret. App-configs are also passed
    /// to Backstage as `--config` arguments.
    Files {
        kind: ObjectKind,
        name: String,
        mount_path: String,
        key: Option<String>,
        keys: Vec<String>,
        app_config: bool,
    },
    /// Injects a ConfigMap or Secret as environment.
    EnvFrom {
        kind: ObjectKind,
        name: String,
        key: Option<String>,
    },
    Env {
        name: String,
        value: String,
    },
    /// An env var read from a single key of a Secret.
    SecretKeyEnv {
        env: String,
        secret: String,
        key: String,
    },
    DynamicPlugins {
        config_map: String,
    },
    Volume {
        claim: String,
        mount_path: String,
    },
}

impl Contribution {
    pub fn update_pod(&self, pod: &mut BackstagePod<'_>) -> Result<(), pod::Error> {
        match self {
            Self::Files {
                kind,
                name,
                mount_path,
                key,
                keys,
                app_config,
            } => {
                let paths = pod.mount_files_from(*kind, name, mount_path, key.as_deref(), keys)?;
                if *app_config {
                    pod.add_app_config_args(&paths);
                }
            }
            Self::EnvFrom { kind, name, key } => {
                pod.add_env_vars_from(*kind, name, key.as_deref());
            }
            Self::Env { name, value } => {
                pod.add_env_var(EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    ..EnvVar::default()
                });
            }
            Self::SecretKeyEnv { env, secret, key } => {
                pod.add_env_var_from_secret(env, secret, key);
            }
            Self::DynamicPlugins { config_map } => {
                pod.mount_dynamic_plugins(config_map)?;
            }
            Self::Volume { claim, mount_path } => {
                let volume = VolumeBuilder::new(to_rfc1123_label(claim))
                    .with_persistent_volume_claim(claim, false)
                    .build();
                pod.mount_volume(volume, mount_path)?;
            }
        }
        Ok(())
    }
}

/// The edits asked for by the fields of `spec`, in the order they are applied:
/// app-configs, extra files, extra envs, dynamic plugins and secrets last.
///
/// The data keys of referenced objects are taken from `external_config`.
pub fn spec_contributions(
    spec: &BackstageSpec,
    external_config: &ExternalConfig,
) -> Result<Vec<Contribution>, crate::external_config::Error> {
    let mut contributions = vec![];

    for reference in &spec.app_configs {
        let keys = match reference.kind {
            ObjectKind::ConfigMap => external_config
                .app_configs
                .get(&reference.name)
                .map(config_map_keys),
            ObjectKind::Secret => external_config
                .app_config_secrets
                .get(&reference.name)
                .map(secret_keys),
        };
        contributions.push(Contribution::Files {
            kind: reference.kind,
            name: reference.name.clone(),
            mount_path: DEFAULT_MOUNT_PATH.to_owned(),
            key: None,
            keys: keys.unwrap_or_default(),
            app_config: true,
        });
    }

    if let Some(application) = &spec.application {
        if let Some(app_config) = &application.app_config {
            for reference in &app_config.config_maps {
                contributions.push(Contribution::Files {
                    kind: ObjectKind::ConfigMap,
                    name: reference.name.clone(),
                    mount_path: app_config.mount_path().to_owned(),
                    key: reference.key.clone(),
                    keys: external_config
                        .app_configs
                        .get(&reference.name)
                        .map(config_map_keys)
                        .unwrap_or_default(),
                    app_config: true,
                });
            }
        }

        if let Some(extra_files) = &application.extra_files {
            for reference in &extra_files.config_maps {
                contributions.push(Contribution::Files {
                    kind: ObjectKind::ConfigMap,
                    name: reference.name.clone(),
                    mount_path: extra_files.mount_path().to_owned(),
                    key: reference.key.clone(),
                    keys: external_config
                        .extra_file_config_maps
                        .get(&reference.name)
                        .map(config_map_keys)
                        .unwrap_or_default(),
                    app_config: false,
                });
            }
            for reference in &extra_files.secrets {
                contributions.push(Contribution::Files {
                    kind: ObjectKind::Secret,
                    name: reference.name.clone(),
                    mount_path: extra_files.mount_path().to_owned(),
                    key: reference.key.clone(),
                    keys: external_config
                        .extra_file_secrets
                        .get(&reference.name)
                        .map(secret_keys)
                        .unwrap_or_default(),
                    app_config: false,
                });
            }
        }

        if let Some(extra_envs) = &application.extra_envs {
            for reference in &extra_envs.config_maps {
                contributions.push(Contribution::EnvFrom {
                    kind: ObjectKind::ConfigMap,
                    name: reference.name.clone(),
                    key: reference.key.clone(),
                });
            }
            for reference in &extra_envs.secrets {
                contributions.push(Contribution::EnvFrom {
                    kind: ObjectKind::Secret,
                    name: reference.name.clone(),
                    key: reference.key.clone(),
                });
            }
            for env in &extra_envs.envs {
                contributions.push(Contribution::Env {
                    name: env.name.clone(),
                    value: env.value.clone(),
                });
            }
        }
    }

    if let Some(name) = dynamic_plugins_config_map_name(spec)? {
        contributions.push(Contribution::DynamicPlugins {
            config_map: name.to_owned(),
        });
    }

    if let Some(name) = spec.auth_secret_name()
        && spec.local_db_enabled()
    {
        contributions.push(Contribution::EnvFrom {
            kind: ObjectKind::Secret,
            name: name.to_owned(),
            key: None,
        });
    }

    if let Some(secret_ref) = &spec.backend_auth_secret_ref {
        contributions.push(Contribution::SecretKeyEnv {
            env: BACKEND_SECRET_ENV.to_owned(),
            secret: secret_ref.name.clone(),
            key: secret_ref.key().to_owned(),
        });
    }

    Ok(contributions)
}
