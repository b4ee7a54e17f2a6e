//! Collects the ConfigMaps and Secrets a `Backstage` references.
use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::ResourceExt;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    client::{self, ClusterClient, NamespacedObject},
    crd::{Backstage, BackstageSpec, ObjectKeyRef, ObjectKind},
    kvp::{BACKSTAGE_NAME_KEY, EXT_CONFIG_SYNC_KEY},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("{kind} {name:?} referenced by the Backstage does not exist"))]
    ConfigNotFound { kind: ObjectKind, name: String },

    #[snafu(display("failed to fetch {kind} {name:?}"))]
    FetchObject {
        source: client::Error,
        kind: ObjectKind,
        name: String,
    },

    #[snafu(display("{kind} {name:?} has no key {key:?}"))]
    MissingKey {
        kind: ObjectKind,
        name: String,
        key: String,
    },

    #[snafu(display("dynamic plugins config must be a ConfigMap, {name:?} is a {kind}"))]
    UnsupportedDynamicPluginsKind { kind: ObjectKind, name: String },

    #[snafu(display("failed to label {kind} {name:?} for config sync"))]
    LabelObject {
        source: client::Error,
        kind: ObjectKind,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Snapshot of every external object a `Backstage` references, taken once
/// per reconcile.
#[derive(Clone, Debug, Default)]
pub struct ExternalConfig {
    /// Template overrides for the Backstage objects, by template key.
    pub raw_config: BTreeMap<String, String>,
    /// Template overrides for the local database objects, by template key.
    pub raw_db_config: BTreeMap<String, String>,
    pub app_configs: BTreeMap<String, ConfigMap>,
    pub app_config_secrets: BTreeMap<String, Secret>,
    pub extra_file_config_maps: BTreeMap<String, ConfigMap>,
    pub extra_file_secrets: BTreeMap<String, Secret>,
    pub extra_env_config_maps: BTreeMap<String, ConfigMap>,
    pub extra_env_secrets: BTreeMap<String, Secret>,
    pub dynamic_plugins: Option<ConfigMap>,
    pub(crate) referenced: BTreeMap<(ObjectKind, String), ObjectMeta>,
}

/// The data keys of a ConfigMap, sorted.
pub fn config_map_keys(config_map: &ConfigMap) -> Vec<String> {
    let keys: BTreeSet<&String> = config_map
        .data
        .iter()
        .flat_map(BTreeMap::keys)
        .chain(config_map.binary_data.iter().flat_map(BTreeMap::keys))
        .collect();
    keys.into_iter().cloned().collect()
}

/// The data keys of a Secret, sorted.
pub fn secret_keys(secret: &Secret) -> Vec<String> {
    let keys: BTreeSet<&String> = secret
        .data
        .iter()
        .flat_map(BTreeMap::keys)
        .chain(secret.string_data.iter().flat_map(BTreeMap::keys))
        .collect();
    keys.into_iter().cloned().collect()
}

/// Fetches everything `backstage` references. Fails on the first missing
/// object, nothing is written to the cluster.
pub async fn collect<C: ClusterClient>(client: &C, backstage: &Backstage) -> Result<ExternalConfig> {
    let namespace = backstage.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let spec = &backstage.spec;
    let mut config = ExternalConfig::default();

    if let Some(name) = spec.backstage_raw_config() {
        let raw: ConfigMap = config.fetch(client, name, &namespace).await?;
        config.raw_config = raw.data.unwrap_or_default();
    }
    if let Some(name) = spec.local_db_raw_config() {
        let raw: ConfigMap = config.fetch(client, name, &namespace).await?;
        config.raw_db_config = raw.data.unwrap_or_default();
    }

    for reference in &spec.app_configs {
        match reference.kind {
            ObjectKind::ConfigMap => {
                let cm = config.fetch(client, &reference.name, &namespace).await?;
                config.app_configs.insert(reference.name.clone(), cm);
            }
            ObjectKind::Secret => {
                let secret = config.fetch(client, &reference.name, &namespace).await?;
                config.app_config_secrets.insert(reference.name.clone(), secret);
            }
        }
    }

    if let Some(application) = &spec.application {
        if let Some(app_config) = &application.app_config {
            for reference in &app_config.config_maps {
                let cm = config.fetch_config_map(client, reference, &namespace).await?;
                config.app_configs.insert(reference.name.clone(), cm);
            }
        }

        if let Some(extra_files) = &application.extra_files {
            for reference in &extra_files.config_maps {
                let cm = config.fetch_config_map(client, reference, &namespace).await?;
                config.extra_file_config_maps.insert(reference.name.clone(), cm);
            }
            for reference in &extra_files.secrets {
                let secret = config.fetch_secret(client, reference, &namespace).await?;
                config.extra_file_secrets.insert(reference.name.clone(), secret);
            }
        }

        if let Some(extra_envs) = &application.extra_envs {
            for reference in &extra_envs.config_maps {
                let cm = config.fetch_config_map(client, reference, &namespace).await?;
                config.extra_env_config_maps.insert(reference.name.clone(), cm);
            }
            for reference in &extra_envs.secrets {
                let secret = config.fetch_secret(client, reference, &namespace).await?;
                config.extra_env_secrets.insert(reference.name.clone(), secret);
            }
        }
    }

    if let Some(name) = dynamic_plugins_config_map_name(spec)? {
        config.dynamic_plugins = Some(config.fetch(client, name, &namespace).await?);
    }

    tracing::debug!(
        backstage = %backstage.name_any(),
        objects = config.referenced.len(),
        "collected external config"
    );
    Ok(config)
}

/// Name of the ConfigMap holding `dynamic-plugins.yaml`, if any.
pub fn dynamic_plugins_config_map_name(spec: &BackstageSpec) -> Result<Option<&str>> {
    if let Some(name) = spec
        .application
        .as_ref()
        .and_then(|app| app.dynamic_plugins_config_map_name.as_deref())
    {
        return Ok(Some(name));
    }

    match &spec.dynamic_plugins_config {
        Some(reference) => {
            ensure!(
                reference.kind == ObjectKind::ConfigMap,
                UnsupportedDynamicPluginsKindSnafu {
                    kind: reference.kind,
                    name: &reference.name,
                }
            );
            Ok(Some(&reference.name))
        }
        None => Ok(None),
    }
}

trait ExternalObject: NamespacedObject {
    const KIND: ObjectKind;
}

impl ExternalObject for ConfigMap {
    const KIND: ObjectKind = ObjectKind::ConfigMap;
}

impl ExternalObject for Secret {
    const KIND: ObjectKind = ObjectKind::Secret;
}

impl ExternalConfig {
    async fn fetch<C, K>(&mut self, client: &C, name: &str, namespace: &str) -> Result<K>
    where
        C: ClusterClient,
        K: ExternalObject,
    {
        let object: K = client
            .get_opt(name, namespace)
            .await
            .context(FetchObjectSnafu { kind: K::KIND, name })?
            .context(ConfigNotFoundSnafu { kind: K::KIND, name })?;

        self.referenced
            .insert((K::KIND, name.to_owned()), object.meta().clone());
        Ok(object)
    }

    async fn fetch_config_map<C: ClusterClient>(
        &mut self,
        client: &C,
        reference: &ObjectKeyRef,
        namespace: &str,
    ) -> Result<ConfigMap> {
        let cm: ConfigMap = self.fetch(client, &reference.name, namespace).await?;
        ensure_key(ObjectKind::ConfigMap, reference, &config_map_keys(&cm))?;
        Ok(cm)
    }

    async fn fetch_secret<C: ClusterClient>(
        &mut self,
        client: &C,
        reference: &ObjectKeyRef,
        namespace: &str,
    ) -> Result<Secret> {
        let secret: Secret = self.fetch(client, &reference.name, namespace).await?;
        ensure_key(ObjectKind::Secret, reference, &secret_keys(&secret))?;
        Ok(secret)
    }

    /// SHA-256 over the data of every referenced app-config, extra file,
    /// extra env and dynamic plugins object.
    ///
    /// The input is serialized from sorted maps, so the hash only changes
    /// when the data does.
    pub fn content_hash(&self) -> String {
        let mut payload: BTreeMap<String, Value> = BTreeMap::new();

        let config_maps = [
            ("app-config", &self.app_configs),
            ("extra-files", &self.extra_file_config_maps),
            ("extra-envs", &self.extra_env_config_maps),
        ];
        for (category, objects) in config_maps {
            for (name, cm) in objects {
                payload.insert(
                    format!("{category}/ConfigMap/{name}"),
                    json!({"data": cm.data, "binaryData": cm.binary_data}),
                );
            }
        }

        let secrets = [
            ("app-config", &self.app_config_secrets),
            ("extra-files", &self.extra_file_secrets),
            ("extra-envs", &self.extra_env_secrets),
        ];
        for (category, objects) in secrets {
            for (name, secret) in objects {
                payload.insert(
                    format!("{category}/Secret/{name}"),
                    json!({"data": secret.data, "stringData": secret.string_data}),
                );
            }
        }

        if let Some(cm) = &self.dynamic_plugins {
            payload.insert(
                format!("dynamic-plugins/ConfigMap/{}", cm.name_any()),
                json!({"data": cm.data, "binaryData": cm.binary_data}),
            );
        }

        // serde_json::Value objects keep their keys sorted, and the payload
        // itself is a BTreeMap.
        let serialized = Value::from_iter(payload).to_string();
        format!("{:x}", Sha256::digest(serialized.as_bytes()))
    }

    /// Marks every referenced object with the `ext-config-sync` label and the
    /// `backstage-name` annotation. Objects already carrying both are left
    /// untouched.
    pub async fn sync_labels<C: ClusterClient>(
        &self,
        client: &C,
        backstage_name: &str,
        namespace: &str,
        auto_sync: bool,
    ) -> Result<()> {
        let sync_value = auto_sync.to_string();

        for ((kind, name), meta) in &self.referenced {
            let labelled = meta.labels.as_ref().and_then(|l| l.get(EXT_CONFIG_SYNC_KEY))
                == Some(&sync_value);
            let annotated = meta
                .annotations
                .as_ref()
                .and_then(|a| a.get(BACKSTAGE_NAME_KEY))
                .map(String::as_str)
                == Some(backstage_name);
            if labelled && annotated {
                continue;
            }

            let labels = BTreeMap::from([(EXT_CONFIG_SYNC_KEY.to_owned(), sync_value.clone())]);
            let annotations =
                BTreeMap::from([(BACKSTAGE_NAME_KEY.to_owned(), backstage_name.to_owned())]);

            match kind {
                ObjectKind::ConfigMap => client
                    .merge_metadata::<ConfigMap>(name, namespace, &labels, &annotations)
                    .await
                    .map(drop),
                ObjectKind::Secret => client
                    .merge_metadata::<Secret>(name, namespace, &labels, &annotations)
                    .await
                    .map(drop),
            }
            .context(LabelObjectSnafu { kind: *kind, name })?;

            tracing::debug!(%kind, %name, "labelled external config object");
        }

        Ok(())
    }
}

fn ensure_key(kind: ObjectKind, reference: &ObjectKeyRef, keys: &[String]) -> Result<()> {
    if let Some(key) = &reference.key {
        ensure!(
            keys.contains(key),
            MissingKeySnafu {
                kind,
                name: &reference.name,
                key,
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::ByteString;

    use super::*;
    use crate::client::fake::FakeClient;

    const NAMESPACE: &str = "ns1";

    fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(NAMESPACE.to_owned()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
            ..ConfigMap::default()
        }
    }

    fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(NAMESPACE.to_owned()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_owned(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }

    fn backstage(spec: &str) -> Backstage {
        let mut backstage: Backstage = serde_yaml::from_str(&format!(
            "apiVersion: rhdh.redhat.com/v1alpha1\nkind: Backstage\nmetadata:\n  name: bs1\n  namespace: {NAMESPACE}\n{spec}"
        ))
        .expect("test YAML is valid");
        backstage.metadata.uid = Some("bs1-uid".to_owned());
        backstage
    }

    fn full_backstage() -> Backstage {
        backstage(indoc! {"
            spec:
              application:
                appConfig:
                  configMaps:
                    - name: app-config1
                extraFiles:
                  secrets:
                    - name: file-secret
                      key: cert.pem
                extraEnvs:
                  configMaps:
                    - name: env-cm
                dynamicPluginsConfigMapName: plugins
        "})
    }

    fn seeded_client() -> FakeClient {
        let client = FakeClient::new();
        client.insert(config_map("app-config1", &[("key11", "a"), ("key12", "b")]));
        client.insert(secret("file-secret", &[("cert.pem", "pem"), ("other", "x")]));
        client.insert(config_map("env-cm", &[("ENV1", "1")]));
        client.insert(config_map("plugins", &[("dynamic-plugins.yaml", "plugins: []")]));
        client
    }

    #[tokio::test]
    async fn collects_every_reference() {
        let client = seeded_client();

        let config = collect(&client, &full_backstage())
            .await
            .expect("all references exist");

        assert!(config.app_configs.contains_key("app-config1"));
        assert!(config.extra_file_secrets.contains_key("file-secret"));
        assert!(config.extra_env_config_maps.contains_key("env-cm"));
        assert!(config.dynamic_plugins.is_some());
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn missing_object_fails() {
        let client = FakeClient::new();
        client.insert(config_map("app-config1", &[("key11", "a")]));

        let error = collect(&client, &full_backstage())
            .await
            .expect_err("file-secret is missing");

        assert!(matches!(
            error,
            Error::ConfigNotFound { kind: ObjectKind::Secret, ref name } if name == "file-secret"
        ));
    }

    #[tokio::test]
    async fn missing_key_fails() {
        let client = seeded_client();
        client.insert(secret("file-secret", &[("other", "x")]));

        let error = collect(&client, &full_backstage())
            .await
            .expect_err("cert.pem is missing");

        assert!(matches!(error, Error::MissingKey { .. }));
    }

    #[tokio::test]
    async fn hash_changes_with_data_only() {
        let client = seeded_client();
        let backstage = full_backstage();

        let first = collect(&client, &backstage).await.expect("collects");
        let second = collect(&client, &backstage).await.expect("collects");
        assert_eq!(first.content_hash(), second.content_hash());

        client.insert(config_map("env-cm", &[("ENV1", "2")]));
        let changed = collect(&client, &backstage).await.expect("collects");
        assert_ne!(first.content_hash(), changed.content_hash());
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let forward = config_map("cm", &[("a", "1"), ("b", "2")]);
        let backward = config_map("cm", &[("b", "2"), ("a", "1")]);

        let mut first = ExternalConfig::default();
        first.app_configs.insert("cm".to_owned(), forward);
        first.extra_env_config_maps.insert("x".to_owned(), config_map("x", &[]));
        let mut second = ExternalConfig::default();
        second.extra_env_config_maps.insert("x".to_owned(), config_map("x", &[]));
        second.app_configs.insert("cm".to_owned(), backward);

        assert_eq!(first.content_hash(), second.content_hash());
    }

    #[tokio::test]
    async fn labels_are_written_once() {
        let client = seeded_client();
        let backstage = full_backstage();

        let config = collect(&client, &backstage).await.expect("collects");
        config
            .sync_labels(&client, "bs1", NAMESPACE, true)
            .await
            .expect("labels");
        assert_eq!(client.writes(), 4);

        let cm: ConfigMap = client.get("env-cm", NAMESPACE).expect("exists");
        assert_eq!(
            cm.labels().get(EXT_CONFIG_SYNC_KEY).map(String::as_str),
            Some("true")
        );
        assert_eq!(
            cm.annotations().get(BACKSTAGE_NAME_KEY).map(String::as_str),
            Some("bs1")
        );

        let config = collect(&client, &backstage).await.expect("collects");
        config
            .sync_labels(&client, "bs1", NAMESPACE, true)
            .await
            .expect("labels");
        assert_eq!(client.writes(), 4);
    }

    #[test]
    fn legacy_dynamic_plugins_must_be_config_map() {
        let spec = backstage(indoc! {"
            spec:
              dynamicPluginsConfig:
                name: plugins
                kind: Secret
        "})
        .spec;

        assert!(matches!(
            dynamic_plugins_config_map_name(&spec),
            Err(Error::UnsupportedDynamicPluginsKind { .. })
        ));
    }
}
