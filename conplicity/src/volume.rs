use serde::{Deserialize, Serialize};

/// Where the Docker local driver keeps volume data on the host.
pub const DOCKER_VOLUMES_ROOT: &str = "/var/lib/docker/volumes";

/// A backup-eligible volume, as exchanged with remote instances.
///
/// Remote instances may send any subset of the fields; missing ones default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// Mount reference inside the backup container.
    pub mount: String,
    /// Data directory on the host.
    pub mountpoint: String,
    pub backup_dir: String,
    pub host_bind: String,
    pub hostname: String,
    pub namespace: String,
    pub repo_name: String,
    pub sub_path: String,
    pub backing_up: bool,
    pub last_backup_date: String,
    pub last_backup_status: String,
}

impl Volume {
    pub fn new(name: impl Into<String>, mountpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mountpoint: mountpoint.into(),
            ..Default::default()
        }
    }

    /// A volume managed by the local Docker driver.
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        let mountpoint = format!("{DOCKER_VOLUMES_ROOT}/{name}/_data");
        Self::new(name, mountpoint)
    }
}
