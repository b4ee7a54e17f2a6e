//! The fixed set of runtime objects a `Backstage` is made of.
use crate::{model::object::RuntimeKind, template};

/// When an object is part of the model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Need {
    /// Always present, a missing template is an error.
    Mandatory,
    /// Present if a default or raw runtime config template exists.
    Optional,
    /// Present if the local database is enabled.
    ForLocalDatabase,
    /// Present if running on OpenShift.
    ForOpenshift,
}

/// One registry entry: the template key an object is loaded from, the kind
/// of object it produces and when it is needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjectConfig {
    pub key: &'static str,
    pub kind: RuntimeKind,
    pub need: Need,
}

/// Registry of runtime objects, in the order they are built and applied.
///
/// The order is significant: objects validated against others come after
/// them, e.g. the dynamic plugins ConfigMap after the Deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registry {
    objects: Vec<ObjectConfig>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(vec![
            ObjectConfig {
                key: template::DEPLOYMENT,
                kind: RuntimeKind::Deployment,
                need: Need::Mandatory,
            },
            ObjectConfig {
                key: template::SERVICE,
                kind: RuntimeKind::Service,
                need: Need::Mandatory,
            },
            ObjectConfig {
                key: template::ROUTE,
                kind: RuntimeKind::Route,
                need: Need::ForOpenshift,
            },
            ObjectConfig {
                key: template::DB_STATEFULSET,
                kind: RuntimeKind::DbStatefulSet,
                need: Need::ForLocalDatabase,
            },
            ObjectConfig {
                key: template::DB_SERVICE,
                kind: RuntimeKind::DbService,
                need: Need::ForLocalDatabase,
            },
            ObjectConfig {
                key: template::DB_SERVICE_HEADLESS,
                kind: RuntimeKind::DbHeadlessService,
                need: Need::ForLocalDatabase,
            },
            ObjectConfig {
                key: template::DB_SECRET,
                kind: RuntimeKind::DbSecret,
                need: Need::ForLocalDatabase,
            },
            ObjectConfig {
                key: template::BACKEND_AUTH_CONFIGMAP,
                kind: RuntimeKind::BackendAuthConfig,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::DYNAMIC_PLUGINS_CONFIGMAP,
                kind: RuntimeKind::DynamicPlugins,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::CONFIGMAP_FILES,
                kind: RuntimeKind::ConfigMapFiles,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::CONFIGMAP_ENVS,
                kind: RuntimeKind::ConfigMapEnvs,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::SECRET_FILES,
                kind: RuntimeKind::SecretFiles,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::SECRET_ENVS,
                kind: RuntimeKind::SecretEnvs,
                need: Need::Optional,
            },
            ObjectConfig {
                key: template::PVCS,
                kind: RuntimeKind::Pvc,
                need: Need::Optional,
            },
        ])
    }
}

impl Registry {
    pub fn new(objects: Vec<ObjectConfig>) -> Self {
        Self { objects }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectConfig> {
        self.objects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_comes_first() {
        let registry = Registry::default();
        let kinds: Vec<RuntimeKind> = registry.iter().map(|config| config.kind).collect();

        assert_eq!(kinds.first(), Some(&RuntimeKind::Deployment));
        let position = |kind| kinds.iter().position(|k| *k == kind);
        assert!(position(RuntimeKind::DbStatefulSet) < position(RuntimeKind::DbSecret));
        assert!(position(RuntimeKind::Deployment) < position(RuntimeKind::DynamicPlugins));
    }
}
