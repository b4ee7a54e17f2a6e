use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use snafu::{OptionExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("object is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },
}

/// A builder to build [`ObjectMeta`] objects.
///
/// The builder starts either empty or from the metadata of an object
/// template. Labels and annotations are merged into whatever the template
/// already carries.
#[derive(Clone, Default)]
pub struct ObjectMetaBuilder {
    meta: ObjectMeta,
}

impl ObjectMetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing metadata, e.g. the one of a template.
    pub fn from_template(meta: ObjectMeta) -> Self {
        Self { meta }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.meta.name = Some(name.into());
        self
    }

    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.meta.namespace = Some(namespace.into());
        self
    }

    /// Adds a controller owner reference pointing to `resource`.
    pub fn ownerreference_from_resource<T: Resource<DynamicType = ()>>(
        &mut self,
        resource: &T,
    ) -> Result<&mut Self> {
        let owner_reference = OwnerReferenceBuilder::new()
            .initialize_from_resource(resource)
            .controller(true)
            .block_owner_deletion(true)
            .build()?;

        let owner_references = self.meta.owner_references.get_or_insert_with(Vec::new);
        owner_references.retain(|existing| existing.uid != owner_reference.uid);
        owner_references.push(owner_reference);
        Ok(self)
    }

    pub fn with_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.meta
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_labels(&mut self, labels: BTreeMap<String, String>) -> &mut Self {
        self.meta
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
        self
    }

    pub fn build(&self) -> ObjectMeta {
        self.meta.clone()
    }
}

/// A builder to build [`OwnerReference`] objects.
#[derive(Clone, Default)]
pub struct OwnerReferenceBuilder {
    api_version: Option<String>,
    block_owner_deletion: Option<bool>,
    controller: Option<bool>,
    kind: Option<String>,
    name: Option<String>,
    uid: Option<String>,
}

impl OwnerReferenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_owner_deletion(&mut self, block_owner_deletion: bool) -> &mut Self {
        self.block_owner_deletion = Some(block_owner_deletion);
        self
    }

    pub fn controller(&mut self, controller: bool) -> &mut Self {
        self.controller = Some(controller);
        self
    }

    /// Can be used to initialize a builder with settings from an existing resource.
    /// The builder will create an `OwnerReference` that points to the passed resource.
    ///
    /// This will _not_ set `controller` or `block_owner_deletion`.
    pub fn initialize_from_resource<T: Resource<DynamicType = ()>>(
        &mut self,
        resource: &T,
    ) -> &mut Self {
        self.api_version = Some(T::api_version(&()).to_string());
        self.kind = Some(T::kind(&()).to_string());
        self.name = Some(resource.name_any());
        self.uid.clone_from(&resource.meta().uid);
        self
    }

    pub fn build(&self) -> Result<OwnerReference> {
        Ok(OwnerReference {
            api_version: self
                .api_version
                .clone()
                .context(MissingObjectKeySnafu { key: "api_version" })?,
            block_owner_deletion: self.block_owner_deletion,
            controller: self.controller,
            kind: self
                .kind
                .clone()
                .context(MissingObjectKeySnafu { key: "kind" })?,
            name: self
                .name
                .clone()
                .context(MissingObjectKeySnafu { key: "name" })?,
            uid: self
                .uid
                .clone()
                .context(MissingObjectKeySnafu { key: "uid" })?,
        })
    }
}
