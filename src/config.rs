//! Cgroup manager configuration
//!
//! Loaded from the runtime's configuration as JSON; every field has a default.

use std::time::Duration;

use serde::Deserialize;

use crate::cgroups::{CgroupHierarchy, SYSTEMD_MANAGER};

const DEFAULT_CGROUP_MOUNT: &str = "/sys/fs/cgroup";
const DEFAULT_RUNTIME_UNIT: &str = "crio.service";
const DEFAULT_DBUS_TIMEOUT_SECS: u64 = 6 * 60;

/// Settings for [`new_manager`](crate::cgroups::new_manager)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CgroupConfig {
    /// `systemd` or `cgroupfs`
    pub manager: String,

    /// Where the cgroup filesystem is mounted
    pub cgroup_mount: String,

    /// Force a hierarchy instead of detecting it from the mount
    pub hierarchy: Option<CgroupHierarchy>,

    /// Unit the supervisor scopes are ordered after
    pub runtime_unit: String,

    /// Upper bound for one transient scope launch
    pub dbus_timeout_secs: u64,
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            manager: SYSTEMD_MANAGER.to_string(),
            cgroup_mount: DEFAULT_CGROUP_MOUNT.to_string(),
            hierarchy: None,
            runtime_unit: DEFAULT_RUNTIME_UNIT.to_string(),
            dbus_timeout_secs: DEFAULT_DBUS_TIMEOUT_SECS,
        }
    }
}

impl CgroupConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn dbus_timeout(&self) -> Duration {
        Duration::from_secs(self.dbus_timeout_secs)
    }
}
