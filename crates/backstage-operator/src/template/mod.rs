//! Object templates, either compiled in or overridden through a raw runtime
//! config ConfigMap.
use std::collections::BTreeMap;

use kube::Resource;
use serde::{Deserialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu, ensure};

pub const DEPLOYMENT: &str = "deployment.yaml";
pub const SERVICE: &str = "service.yaml";
pub const ROUTE: &str = "route.yaml";
pub const DB_STATEFULSET: &str = "db-statefulset.yaml";
pub const DB_SERVICE: &str = "db-service.yaml";
pub const DB_SERVICE_HEADLESS: &str = "db-service-hl.yaml";
pub const DB_SECRET: &str = "db-secret.yaml";
pub const BACKEND_AUTH_CONFIGMAP: &str = "backend-auth-configmap.yaml";
pub const DYNAMIC_PLUGINS_CONFIGMAP: &str = "dynamic-plugins-configmap.yaml";
pub const CONFIGMAP_FILES: &str = "configmap-files.yaml";
pub const CONFIGMAP_ENVS: &str = "configmap-envs.yaml";
pub const SECRET_FILES: &str = "secret-files.yaml";
pub const SECRET_ENVS: &str = "secret-envs.yaml";
pub const PVCS: &str = "pvcs.yaml";

/// The compiled-in default bundle. Keys without an entry have no default.
const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (DEPLOYMENT, include_str!("../../default-config/deployment.yaml")),
    (SERVICE, include_str!("../../default-config/service.yaml")),
    (ROUTE, include_str!("../../default-config/route.yaml")),
    (DB_STATEFULSET, include_str!("../../default-config/db-statefulset.yaml")),
    (DB_SERVICE, include_str!("../../default-config/db-service.yaml")),
    (DB_SERVICE_HEADLESS, include_str!("../../default-config/db-service-hl.yaml")),
    (DB_SECRET, include_str!("../../default-config/db-secret.yaml")),
    (
        BACKEND_AUTH_CONFIGMAP,
        include_str!("../../default-config/backend-auth-configmap.yaml"),
    ),
    (
        DYNAMIC_PLUGINS_CONFIGMAP,
        include_str!("../../default-config/dynamic-plugins-configmap.yaml"),
    ),
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse template {key:?}"))]
    TemplateParse {
        source: serde_yaml::Error,
        key: String,
    },

    #[snafu(display("template {key:?} describes a {found:?}, expected a {expected:?}"))]
    KindMismatch {
        key: String,
        found: String,
        expected: String,
    },
}

pub fn default_template(key: &str) -> Option<&'static str> {
    DEFAULT_TEMPLATES
        .iter()
        .find(|(default_key, _)| *default_key == key)
        .map(|(_, template)| *template)
}

/// Looks up the template source for `key`: the raw runtime config entry if
/// there is one, otherwise the compiled-in default.
fn template_source<'a>(key: &str, raw_config: &'a BTreeMap<String, String>) -> Option<&'a str> {
    raw_config
        .get(key)
        .map(String::as_str)
        .or_else(|| default_template(key))
}

/// Reads the object stored under `key` in `raw_config`, falling back to the
/// compiled-in default. Returns [`None`] if neither exists.
pub fn read_config_or_default<K>(
    key: &str,
    raw_config: &BTreeMap<String, String>,
) -> Result<Option<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let objects = read_all_or_default::<K>(key, raw_config)?;
    if objects.len() > 1 {
        tracing::warn!(
            template.key = key,
            documents = objects.len(),
            "template holds more than one document, using the first"
        );
    }
    Ok(objects.into_iter().next())
}

/// Like [`read_config_or_default`], but for templates holding several
/// objects as separate YAML documents.
pub fn read_all_or_default<K>(
    key: &str,
    raw_config: &BTreeMap<String, String>,
) -> Result<Vec<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let Some(source) = template_source(key, raw_config) else {
        return Ok(vec![]);
    };

    let mut objects = vec![];
    for document in serde_yaml::Deserializer::from_str(source) {
        let value = serde_yaml::Value::deserialize(document).context(TemplateParseSnafu { key })?;
        if value.is_null() {
            continue;
        }

        let expected = K::kind(&());
        if let Some(found) = value.get("kind").and_then(serde_yaml::Value::as_str) {
            ensure!(
                found == expected,
                KindMismatchSnafu {
                    key,
                    found,
                    expected: expected.to_string(),
                }
            );
        }

        objects.push(serde_yaml::from_value(value).context(TemplateParseSnafu { key })?);
    }

    Ok(objects)
}
