//! cgroup placement for sandboxes, containers and their supervisors
//!
//! Two interchangeable backends implement [`CgroupManager`]:
//! - `systemd`: parents are slices, supervisors run in transient scopes
//!   created over D-Bus, systemd cleans up
//! - `cgroupfs`: parents are paths written directly under the cgroup mount,
//!   the runtime cleans up
//!
//! # Example Usage
//!
//! ```ignore
//! use cgmgr::cgroups::new_manager;
//! use cgmgr::config::CgroupConfig;
//!
//! let manager = new_manager(&CgroupConfig::default())?;
//!
//! // Validate the pod's parent and check it has room for a sandbox
//! let (parent, path) = manager.sandbox_cgroup_path("kubepods-burstable.slice", "sb1")?;
//!
//! // Once conmon is running, hand it to its cgroup
//! let cleanup = manager.move_supervisor_to_cgroup("ctr1", &parent, "pod", conmon_pid)?;
//!
//! // On teardown (no-op for systemd)
//! manager.remove_cgroup(&cleanup)?;
//! ```

pub mod cgroupfs;
pub mod error;
pub mod expand;
pub mod hierarchy;
pub mod manager;
pub mod memory;
pub mod oom;
pub mod scope;
pub mod systemd;

/// Namespace prefix of every cgroup and unit the runtime creates
pub const CRIO_PREFIX: &str = "crio";

pub const SLICE_SUFFIX: &str = ".slice";
pub const SCOPE_SUFFIX: &str = ".scope";

pub const SYSTEMD_MANAGER: &str = "systemd";
pub const CGROUPFS_MANAGER: &str = "cgroupfs";

/// Parent used by the systemd manager when none is given
pub const DEFAULT_SYSTEMD_PARENT: &str = "system.slice";

/// Parent used by the cgroupfs manager when none is given
pub const DEFAULT_CGROUPFS_PARENT: &str = "/crio";

pub use cgroupfs::CgroupfsManager;
pub use error::{CgroupError, ExpandError, Result};
pub use expand::{slice_name_from_path, SliceExpander, SystemdSliceExpander};
pub use hierarchy::CgroupHierarchy;
pub use manager::{new_manager, CgroupFs, CgroupManager, CgroupManagerKind};
pub use memory::{MemoryCeiling, MemoryVerifier, MIN_MEMORY_LIMIT};
pub use oom::OomTracker;
pub use scope::{DbusScopeLauncher, ScopeLauncher, ScopeUnit};
pub use systemd::SystemdManager;
