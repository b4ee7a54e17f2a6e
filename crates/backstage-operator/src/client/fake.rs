//! In-memory [`ClusterClient`] for tests.
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    client::{ClusterClient, ConflictSnafu, Error, NamespacedObject, Result},
    merge::merge,
};

type ObjectKey = (String, String, String);

/// Stores objects as JSON, keyed by kind, namespace and name. Every write
/// assigns a new `resourceVersion` and replacing an object read at an older
/// version fails with a conflict, like the API server does.
#[derive(Default)]
pub struct FakeClient {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    next_version: AtomicU64,
    writes: AtomicUsize,
    status_writes: AtomicUsize,
    conflict_on_next_replace: AtomicBool,
}

fn key<K: NamespacedObject>(name: &str, namespace: &str) -> ObjectKey {
    (K::kind(&()).to_string(), namespace.to_owned(), name.to_owned())
}

fn object_key<K: NamespacedObject>(object: &K) -> ObjectKey {
    let meta = object.meta();
    key::<K>(
        meta.name.as_deref().unwrap_or_default(),
        meta.namespace.as_deref().unwrap_or_default(),
    )
}

fn conflict((kind, namespace, name): ObjectKey) -> Error {
    ConflictSnafu {
        kind,
        namespace,
        name,
    }
    .build()
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `object` as if it had been created by someone else. Does not
    /// count as a write.
    pub fn insert<K: NamespacedObject>(&self, object: K) {
        let key = object_key(&object);
        let value = self.stamp(&object, &key);
        self.lock().insert(key, value);
    }

    pub fn get<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Option<K> {
        self.lock()
            .get(&key::<K>(name, namespace))
            .map(|value| serde_json::from_value(value.clone()).expect("stored object is valid"))
    }

    pub fn contains<K: NamespacedObject>(&self, name: &str, namespace: &str) -> bool {
        self.lock().contains_key(&key::<K>(name, namespace))
    }

    /// Number of create, replace, delete and metadata writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Makes the next replace fail as if the object had been modified in the meantime.
    pub fn conflict_on_next_replace(&self) {
        self.conflict_on_next_replace.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectKey, Value>> {
        self.objects.lock().expect("fake client lock is not poisoned")
    }

    fn next_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp<K: NamespacedObject>(&self, object: &K, key: &ObjectKey) -> Value {
        let mut value = serde_json::to_value(object).expect("object serializes");
        merge(
            &mut value,
            json!({
                "metadata": {
                    "resourceVersion": self.next_version(),
                    "uid": format!("{}-{}-{}", key.0, key.1, key.2).to_lowercase(),
                }
            }),
        );
        value
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    async fn get_opt<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<Option<K>> {
        Ok(self.get(name, namespace))
    }

    async fn create<K: NamespacedObject>(&self, object: &K) -> Result<K> {
        let key = object_key(object);
        if self.lock().contains_key(&key) {
            return Err(conflict(key));
        }

        let value = self.stamp(object, &key);
        self.lock().insert(key, value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_value(value).expect("stored object is valid"))
    }

    async fn replace<K: NamespacedObject>(&self, object: &K) -> Result<K> {
        let key = object_key(object);
        let mut objects = self.lock();
        let Some(stored) = objects.get(&key) else {
            return Err(conflict(key));
        };

        let stored_version = stored.pointer("/metadata/resourceVersion").cloned();
        let given_version = object.meta().resource_version.clone().map(Value::String);
        if self.conflict_on_next_replace.swap(false, Ordering::SeqCst)
            || stored_version != given_version
        {
            return Err(conflict(key));
        }

        let status = stored.get("status").cloned();
        let mut value = self.stamp(object, &key);
        if let (Some(status), Some(map)) = (status, value.as_object_mut()) {
            map.insert("status".to_owned(), status);
        }
        objects.insert(key, value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_value(value).expect("stored object is valid"))
    }

    async fn delete<K: NamespacedObject>(&self, name: &str, namespace: &str) -> Result<bool> {
        let removed = self.lock().remove(&key::<K>(name, namespace)).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn merge_metadata<K: NamespacedObject>(
        &self,
        name: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<K> {
        self.patch::<K>(
            name,
            namespace,
            json!({"metadata": {"labels": labels, "annotations": annotations}}),
        )
        .map(|value| {
            self.writes.fetch_add(1, Ordering::SeqCst);
            serde_json::from_value(value).expect("stored object is valid")
        })
    }

    async fn patch_status<K, S>(&self, name: &str, namespace: &str, status: &S) -> Result<K>
    where
        K: NamespacedObject,
        S: Serialize + Debug + Send + Sync,
    {
        self.patch::<K>(name, namespace, json!({ "status": status }))
            .map(|value| {
                self.status_writes.fetch_add(1, Ordering::SeqCst);
                serde_json::from_value(value).expect("stored object is valid")
            })
    }
}

impl FakeClient {
    fn patch<K: NamespacedObject>(&self, name: &str, namespace: &str, patch: Value) -> Result<Value> {
        let key = key::<K>(name, namespace);
        let version = self.next_version();
        let mut objects = self.lock();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(conflict(key));
        };

        merge(stored, patch);
        merge(stored, json!({"metadata": {"resourceVersion": version}}));
        Ok(stored.clone())
    }
}
