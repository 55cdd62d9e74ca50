//! cgroup hierarchy detection
//!
//! ```text
//! /sys/fs/cgroup/                 ← unified (v2): one tree, all controllers
//! /sys/fs/cgroup/{cpu,memory,…}/  ← legacy (v1): one tree per controller
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC};
use serde::Deserialize;

use super::error::{CgroupError, Result};

/// Which cgroup layout the host mounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupHierarchy {
    /// cgroups v1, one mount per controller
    Legacy,
    /// cgroups v2
    Unified,
}

impl CgroupHierarchy {
    /// Detect the layout by checking the filesystem magic of `mount`
    pub fn detect(mount: &Path) -> Result<Self> {
        let stat = statfs(mount).map_err(|e| CgroupError::io(mount, e.into()))?;
        if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
            Ok(CgroupHierarchy::Unified)
        } else {
            Ok(CgroupHierarchy::Legacy)
        }
    }

    /// Directory and filename holding the memory ceiling of a cgroup
    pub fn memory_paths(self, mount: &Path) -> (PathBuf, &'static str) {
        match self {
            CgroupHierarchy::Unified => (mount.to_path_buf(), "memory.max"),
            CgroupHierarchy::Legacy => (mount.join("memory"), "memory.limit_in_bytes"),
        }
    }

    /// Roots a cgroup path has to exist under.
    ///
    /// Unified: the mount itself. Legacy: every controller directory, skipping
    /// the symlinked aliases (`cpu` → `cpu,cpuacct`).
    pub fn controller_roots(self, mount: &Path) -> Result<Vec<PathBuf>> {
        match self {
            CgroupHierarchy::Unified => Ok(vec![mount.to_path_buf()]),
            CgroupHierarchy::Legacy => {
                let mut roots = Vec::new();
                let entries = fs::read_dir(mount).map_err(|e| CgroupError::io(mount, e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| CgroupError::io(mount, e))?;
                    let file_type = entry.file_type().map_err(|e| CgroupError::io(entry.path(), e))?;
                    if file_type.is_dir() {
                        roots.push(entry.path());
                    }
                }
                roots.sort();
                Ok(roots)
            }
        }
    }
}

/// Join a cgroup path (absolute in cgroup terms) below a filesystem root
pub(crate) fn under(root: &Path, cgroup_path: &str) -> PathBuf {
    root.join(cgroup_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_paths() {
        let mount = Path::new("/sys/fs/cgroup");
        assert_eq!(
            CgroupHierarchy::Unified.memory_paths(mount),
            (PathBuf::from("/sys/fs/cgroup"), "memory.max")
        );
        assert_eq!(
            CgroupHierarchy::Legacy.memory_paths(mount),
            (PathBuf::from("/sys/fs/cgroup/memory"), "memory.limit_in_bytes")
        );
    }

    #[test]
    fn test_legacy_controller_roots_skip_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("memory")).unwrap();
        fs::create_dir(tmp.path().join("cpu,cpuacct")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("cpu,cpuacct"), tmp.path().join("cpu")).unwrap();

        let roots = CgroupHierarchy::Legacy.controller_roots(tmp.path()).unwrap();
        assert_eq!(
            roots,
            vec![tmp.path().join("cpu,cpuacct"), tmp.path().join("memory")]
        );
    }

    #[test]
    fn test_detect_plain_directory_is_legacy() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            CgroupHierarchy::detect(tmp.path()).unwrap(),
            CgroupHierarchy::Legacy
        );
    }

    #[test]
    fn test_under_strips_leading_slash() {
        assert_eq!(
            under(Path::new("/sys/fs/cgroup"), "/crio/crio-conmon-abc"),
            PathBuf::from("/sys/fs/cgroup/crio/crio-conmon-abc")
        );
    }
}
