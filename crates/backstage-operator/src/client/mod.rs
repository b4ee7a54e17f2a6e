//! Access to the Kubernetes API.
//!
//! The reconciler only talks to the cluster through [`ClusterClient`], which
//! [`Client`] implements on top of [`kube::Client`].
use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Resource,
    api::{DeleteParams, Patch, PatchParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use snafu::{ResultExt, Snafu};

use crate::kvp::OPERATOR_NAME;

#[cfg(test)]
pub mod fake;

/// API group only served by OpenShift clusters.
pub const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{kind} {namespace}/{name} was modified concurrently"))]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to {operation} {kind} {namespace}/{name}"))]
    Kube {
        source: kube::Error,
        operation: &'static str,
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to list API groups"))]
    ListApiGroups { source: kube::Error },
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Everything that can be stored in a namespace and (de)serialized.
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<T> NamespacedObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// The cluster operations the reconciler needs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Retrieves the named object, [`None`] if it does not exist.
    async fn get_opt<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<Option<K>>;

    /// Creates a new object. Fails with [`Error::Conflict`] if it already exists.
    async fn create<K: NamespacedObject>(&self, object: &K) -> Result<K>;

    /// Replaces an existing object. The object must carry the
    /// `resourceVersion` it was read with, a stale version fails with
    /// [`Error::Conflict`].
    async fn replace<K: NamespacedObject>(&self, object: &K) -> Result<K>;

    /// Deletes the named object. Returns `false` if it did not exist.
    async fn delete<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<bool>;

    /// Merges labels and annotations into the metadata of an existing object.
    async fn merge_metadata<K: NamespacedObject>(
        &self,
        name: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<K>;

    /// Merges `status` into the status subresource of an existing object.
    async fn patch_status<K, S>(&self, name: &str, namespace: &str, status: &S) -> Result<K>
    where
        K: NamespacedObject,
        S: Serialize + Debug + Send + Sync;
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and provides some common functionality.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
    merge_patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(OPERATOR_NAME.to_owned()),
                ..PostParams::default()
            },
            merge_patch_params: PatchParams {
                field_manager: Some(OPERATOR_NAME.to_owned()),
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }

    pub fn get_api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn get_all_api<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    /// Returns `true` if the API server serves the OpenShift route API.
    pub async fn is_openshift(&self) -> Result<bool> {
        let groups = self
            .client
            .list_api_groups()
            .await
            .context(ListApiGroupsSnafu)?;

        Ok(groups
            .groups
            .iter()
            .any(|group| group.name == OPENSHIFT_ROUTE_GROUP))
    }
}

fn object_ref<K: NamespacedObject>(object: &K) -> (String, String, String) {
    (
        K::kind(&()).to_string(),
        object.meta().namespace.clone().unwrap_or_default(),
        object.meta().name.clone().unwrap_or_default(),
    )
}

fn map_write_error(
    error: kube::Error,
    operation: &'static str,
    (kind, namespace, name): (String, String, String),
) -> Error {
    match error {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind,
            namespace,
            name,
        },
        source => Error::Kube {
            source,
            operation,
            kind,
            namespace,
            name,
        },
    }
}

#[async_trait]
impl ClusterClient for Client {
    async fn get_opt<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<Option<K>> {
        self.get_api::<K>(namespace)
            .get_opt(name)
            .await
            .context(KubeSnafu {
                operation: "get",
                kind: K::kind(&()),
                namespace,
                name,
            })
    }

    async fn create<K: NamespacedObject>(&self, object: &K) -> Result<K> {
        let (kind, namespace, name) = object_ref(object);
        self.get_api::<K>(&namespace)
            .create(&self.post_params, object)
            .await
            .map_err(|error| map_write_error(error, "create", (kind, namespace.clone(), name)))
    }

    async fn replace<K: NamespacedObject>(&self, object: &K) -> Result<K> {
        let (kind, namespace, name) = object_ref(object);
        self.get_api::<K>(&namespace)
            .replace(&name, &self.post_params, object)
            .await
            .map_err(|error| {
                map_write_error(error, "replace", (kind, namespace.clone(), name.clone()))
            })
    }

    async fn delete<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<bool> {
        match self
            .get_api::<K>(namespace)
            .delete(name, &self.delete_params)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(source) => Err(Error::Kube {
                source,
                operation: "delete",
                kind: K::kind(&()).to_string(),
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            }),
        }
    }

    async fn merge_metadata<K: NamespacedObject>(
        &self,
        name: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<K> {
        let patch = json!({
            "metadata": {
                "labels": labels,
                "annotations": annotations,
            }
        });

        self.get_api::<K>(namespace)
            .patch(name, &self.merge_patch_params, &Patch::Merge(patch))
            .await
            .context(KubeSnafu {
                operation: "label",
                kind: K::kind(&()),
                namespace,
                name,
            })
    }

    async fn patch_status<K, S>(&self, name: &str, namespace: &str, status: &S) -> Result<K>
    where
        K: NamespacedObject,
        S: Serialize + Debug + Send + Sync,
    {
        let patch = json!({ "status": status });

        self.get_api::<K>(namespace)
            .patch_status(name, &self.merge_patch_params, &Patch::Merge(patch))
            .await
            .context(KubeSnafu {
                operation: "update status of",
                kind: K::kind(&()),
                namespace,
                name,
            })
    }
}
