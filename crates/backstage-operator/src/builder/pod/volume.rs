use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume,
    VolumeMount,
};

/// Permissions of files projected from ConfigMaps and Secrets, `0644`.
pub const DEFAULT_MODE: i32 = 0o644;

/// A builder to build [`Volume`] objects. May only contain one `volume_source`
/// at a time. E.g. a call like `with_secret` after `with_config_map` will
/// overwrite the config map.
#[derive(Clone, Default)]
pub struct VolumeBuilder {
    name: String,
    volume_source: VolumeSource,
}

#[derive(Clone, Default)]
enum VolumeSource {
    #[default]
    None,
    ConfigMap(ConfigMapVolumeSource),
    PersistentVolumeClaim(PersistentVolumeClaimVolumeSource),
    Secret(SecretVolumeSource),
}

impl VolumeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_config_map(&mut self, name: impl Into<String>) -> &mut Self {
        self.volume_source = VolumeSource::ConfigMap(ConfigMapVolumeSource {
            name: name.into(),
            default_mode: Some(DEFAULT_MODE),
            ..ConfigMapVolumeSource::default()
        });
        self
    }

    pub fn with_secret(&mut self, secret_name: impl Into<String>, optional: bool) -> &mut Self {
        self.volume_source = VolumeSource::Secret(SecretVolumeSource {
            secret_name: Some(secret_name.into()),
            default_mode: Some(DEFAULT_MODE),
            optional: Some(optional),
            ..SecretVolumeSource::default()
        });
        self
    }

    pub fn with_persistent_volume_claim(
        &mut self,
        claim_name: impl Into<String>,
        read_only: bool,
    ) -> &mut Self {
        self.volume_source =
            VolumeSource::PersistentVolumeClaim(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.into(),
                read_only: Some(read_only),
            });
        self
    }

    /// Consumes the Builder and returns a constructed Volume
    pub fn build(&self) -> Volume {
        let name = self.name.clone();
        match &self.volume_source {
            VolumeSource::None => Volume {
                name,
                ..Volume::default()
            },
            VolumeSource::ConfigMap(cm) => Volume {
                name,
                config_map: Some(cm.clone()),
                ..Volume::default()
            },
            VolumeSource::PersistentVolumeClaim(pvc) => Volume {
                name,
                persistent_volume_claim: Some(pvc.clone()),
                ..Volume::default()
            },
            VolumeSource::Secret(secret) => Volume {
                name,
                secret: Some(secret.clone()),
                ..Volume::default()
            },
        }
    }
}

/// A mount of `volume` at `mount_path`, optionally of a single file of it.
pub fn volume_mount(
    volume: impl Into<String>,
    mount_path: impl Into<String>,
    sub_path: Option<&str>,
) -> VolumeMount {
    VolumeMount {
        name: volume.into(),
        mount_path: mount_path.into(),
        sub_path: sub_path.map(str::to_owned),
        ..VolumeMount::default()
    }
}
