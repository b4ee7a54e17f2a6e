//! The `Backstage` custom resource.
use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::status::condition::{ClusterCondition, HasStatusCondition};

pub mod route;

pub const APP_GROUP: &str = "rhdh.redhat.com";

/// Where app-config and extra files are mounted unless the resource says otherwise.
pub const DEFAULT_MOUNT_PATH: &str = "/opt/app-root/src";

/// Key of the backend auth secret used when `backendAuthSecretRef.key` is not set.
pub const DEFAULT_BACKEND_AUTH_SECRET_KEY: &str = "backend-secret";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CRD"))]
    SerializeCrd { source: serde_yaml::Error },
}

/// A Backstage developer portal, together with its optional local PostgreSQL
/// database and the configuration objects it is built from.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "rhdh.redhat.com",
    version = "v1alpha1",
    kind = "Backstage",
    namespaced,
    status = "BackstageStatus",
    shortname = "bs",
    printcolumn = r#"{"name":"Running","type":"string","jsonPath":".status.conditions[?(@.type==\"RuntimeRunning\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackstageSpec {
    /// Settings of the Backstage application itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Application>,

    /// Deprecated: app-config objects, mounted before `application.appConfig`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_configs: Vec<ObjectRef>,

    /// Secret holding the backend auth secret, exposed as `BACKEND_SECRET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_auth_secret_ref: Option<BackendAuthSecretRef>,

    /// Deprecated: use `application.dynamicPluginsConfigMapName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_plugins_config: Option<ObjectRef>,

    /// ConfigMaps overriding the default object templates, by template key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_runtime_config: Option<RuntimeConfig>,

    /// Deprecated: use `database.enableLocalDb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_local_db: Option<bool>,

    /// Settings of the database Backstage connects to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<Database>,

    /// Overrides applied to the generated Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<BackstageDeployment>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Image of the `backstage-backend` container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Names of Secrets used to pull the Backstage image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_config: Option<AppConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files: Option<ExtraFiles>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_envs: Option<ExtraEnvs>,

    /// ConfigMap holding the `dynamic-plugins.yaml` file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_plugins_config_map_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,
}

/// App-config files, passed to Backstage as `--config` arguments in the
/// order they are listed.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ObjectKeyRef>,
}

impl AppConfig {
    pub fn mount_path(&self) -> &str {
        self.mount_path.as_deref().unwrap_or(DEFAULT_MOUNT_PATH)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraFiles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ObjectKeyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<ObjectKeyRef>,
}

impl ExtraFiles {
    pub fn mount_path(&self) -> &str {
        self.mount_path.as_deref().unwrap_or(DEFAULT_MOUNT_PATH)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraEnvs {
    /// Plain environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<Env>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ObjectKeyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<ObjectKeyRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub name: String,
    pub value: String,
}

/// A ConfigMap or Secret, optionally narrowed down to one of its keys.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKeyRef {
    pub name: String,

    /// Only this key is used when set, otherwise every key of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A ConfigMap or Secret by name and kind.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,

    #[serde(default)]
    pub kind: ObjectKind,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
)]
pub enum ObjectKind {
    #[default]
    ConfigMap,
    Secret,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAuthSecretRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl BackendAuthSecretRef {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_BACKEND_AUTH_SECRET_KEY)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// ConfigMap with templates for the Backstage objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstage_config: Option<String>,

    /// ConfigMap with templates for the local database objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_db_config: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    /// Deploy a PostgreSQL StatefulSet next to Backstage, defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_local_db: Option<bool>,

    /// Existing Secret with the database credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Create a Route on OpenShift, defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,

    /// Secret holding the certificate, instead of inlining it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_certificate_secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackstageDeployment {
    /// Merged into the generated Deployment after all other settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub patch: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackstageStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

impl HasStatusCondition for Backstage {
    fn conditions(&self) -> Vec<ClusterCondition> {
        match &self.status {
            Some(status) => status.conditions.clone(),
            None => vec![],
        }
    }
}

impl BackstageSpec {
    pub fn local_db_enabled(&self) -> bool {
        self.database
            .as_ref()
            .and_then(|db| db.enable_local_db)
            .unwrap_or(!self.skip_local_db.unwrap_or(false))
    }

    pub fn auth_secret_name(&self) -> Option<&str> {
        self.database
            .as_ref()
            .and_then(|db| db.auth_secret_name.as_deref())
    }

    pub fn route(&self) -> Option<&RouteConfig> {
        self.application.as_ref().and_then(|app| app.route.as_ref())
    }

    pub fn route_enabled(&self) -> bool {
        self.route()
            .and_then(|route| route.enabled)
            .unwrap_or(true)
    }

    pub fn backstage_raw_config(&self) -> Option<&str> {
        self.raw_runtime_config
            .as_ref()
            .and_then(|raw| raw.backstage_config.as_deref())
    }

    pub fn local_db_raw_config(&self) -> Option<&str> {
        self.raw_runtime_config
            .as_ref()
            .and_then(|raw| raw.local_db_config.as_deref())
    }

    pub fn deployment_patch(&self) -> Option<&serde_json::Value> {
        self.deployment.as_ref().and_then(|d| d.patch.as_ref())
    }
}

/// Schema for free-form objects, which keeps unknown fields.
pub fn raw_object_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

/// Renders the `Backstage` CustomResourceDefinition as YAML.
pub fn crd_yaml() -> Result<String, Error> {
    serde_yaml::to_string(&Backstage::crd()).context(SerializeCrdSnafu)
}
