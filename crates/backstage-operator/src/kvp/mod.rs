//! Label and annotation keys set or read by the operator.
use std::collections::BTreeMap;

use const_format::concatcp;

/// The well-known Kubernetes app key prefix.
const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";

/// The operator specific key prefix.
const RHDH_KEY_PREFIX: &str = "rhdh.redhat.com/";

/// `app.kubernetes.io/instance`, set to the name of the Backstage instance.
pub const K8S_APP_INSTANCE_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "instance");

/// `app.kubernetes.io/managed-by`, set to [`OPERATOR_NAME`].
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

/// Selector label of the Backstage and database workloads.
pub const APP_KEY: &str = concatcp!(RHDH_KEY_PREFIX, "app");

/// Marks an externally referenced ConfigMap or Secret for change tracking.
pub const EXT_CONFIG_SYNC_KEY: &str = concatcp!(RHDH_KEY_PREFIX, "ext-config-sync");

/// Annotation pointing from an external ConfigMap or Secret back to the
/// Backstage instance referencing it.
pub const BACKSTAGE_NAME_KEY: &str = concatcp!(RHDH_KEY_PREFIX, "backstage-name");

/// Pod template annotation holding the hash of all external configuration.
pub const EXT_CONFIG_HASH_KEY: &str = concatcp!(RHDH_KEY_PREFIX, "ext-config-hash");

/// Annotation holding the fingerprint of the object as the operator last
/// wrote it. A differing fingerprint forces a full replace.
pub const APPLIED_HASH_KEY: &str = concatcp!(RHDH_KEY_PREFIX, "applied-hash");

pub const OPERATOR_NAME: &str = "backstage-operator";

/// Value of the [`APP_KEY`] selector label of the Backstage workload.
pub fn backstage_app_label(cr_name: &str) -> String {
    format!("backstage-{cr_name}")
}

/// Value of the [`APP_KEY`] selector label of the local database.
pub fn database_app_label(cr_name: &str) -> String {
    format!("backstage-psql-{cr_name}")
}

/// Label selector matching every external object that asks for syncing.
pub fn ext_config_sync_selector() -> String {
    format!("{EXT_CONFIG_SYNC_KEY}=true")
}

/// Labels put on every object generated for a Backstage instance.
pub fn recommended_labels(cr_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_APP_INSTANCE_KEY.to_owned(), cr_name.to_owned()),
        (K8S_APP_MANAGED_BY_KEY.to_owned(), OPERATOR_NAME.to_owned()),
    ])
}

/// Selector labels matching the pods of the given app label value.
pub fn selector_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_KEY.to_owned(), app.to_owned())])
}
