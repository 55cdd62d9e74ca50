//! Direct cgroupfs manager
//!
//! Parents are plain hierarchical paths (`/kubepods/burstable/pod1`) written
//! straight into the cgroup filesystem. The runtime creates the supervisor's
//! cgroup itself and therefore has to remove it again.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::error::{CgroupError, Result};
use super::expand::is_slice;
use super::manager::{CgroupFs, CgroupManager};
use super::memory::MemoryVerifier;
use super::{CGROUPFS_MANAGER, CRIO_PREFIX, DEFAULT_CGROUPFS_PARENT};

/// Supervisor cgroup hint meaning "next to the sandbox"
const SUPERVISOR_CGROUP_POD: &str = "pod";

/// Cgroup manager writing to the cgroup filesystem
pub struct CgroupfsManager {
    cgfs: CgroupFs,
    memory: MemoryVerifier,
}

impl CgroupfsManager {
    pub fn new(cgfs: CgroupFs) -> Self {
        let memory = cgfs.memory_verifier();
        Self { cgfs, memory }
    }
}

/// Lexically clean a rooted path: collapse `//`, `.` and `..`
fn clean_rooted(path: &Path) -> String {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out.to_string_lossy().into_owned()
}

impl CgroupManager for CgroupfsManager {
    fn name(&self) -> &'static str {
        CGROUPFS_MANAGER
    }

    fn is_systemd(&self) -> bool {
        false
    }

    fn container_cgroup_path(&self, sb_parent: &str, container_id: &str) -> String {
        let parent = if sb_parent.is_empty() {
            DEFAULT_CGROUPFS_PARENT
        } else {
            sb_parent
        };
        clean_rooted(&Path::new(parent).join(format!("{}-{}", CRIO_PREFIX, container_id)))
    }

    fn container_cgroup_absolute_path(&self, sb_parent: &str, container_id: &str) -> Result<String> {
        Ok(self.container_cgroup_path(sb_parent, container_id))
    }

    fn move_supervisor_to_cgroup(
        &self,
        entity_id: &str,
        cgroup_parent: &str,
        supervisor_cgroup: &str,
        pid: u32,
    ) -> Result<String> {
        if !supervisor_cgroup.is_empty() && supervisor_cgroup != SUPERVISOR_CGROUP_POD {
            return Err(CgroupError::InvalidSupervisorCgroup {
                entity: entity_id.to_string(),
                hint: supervisor_cgroup.to_string(),
            });
        }

        let cgroup_path = clean_rooted(
            &Path::new(cgroup_parent).join(format!("{}-conmon-{}", CRIO_PREFIX, entity_id)),
        );
        debug!(path = %cgroup_path, pid, "moving conmon to cgroupfs cgroup");

        self.cgfs
            .join(&cgroup_path, pid)
            .map_err(|e| CgroupError::Relocation {
                entity: entity_id.to_string(),
                reason: format!("failed to add conmon to cgroupfs sandbox cgroup: {}", e),
            })?;

        // conmon is still inside, so removal has to wait for teardown
        Ok(cgroup_path)
    }

    fn sandbox_cgroup_path(&self, sb_parent: &str, sandbox_id: &str) -> Result<(String, String)> {
        if sb_parent.is_empty() {
            return Ok((String::new(), String::new()));
        }

        if is_slice(sb_parent) {
            return Err(CgroupError::InvalidParent {
                manager: CGROUPFS_MANAGER,
                parent: sb_parent.to_string(),
                reason: "received systemd slice as parent",
            });
        }

        self.memory.verify(sb_parent)?;

        let cg_path =
            clean_rooted(&Path::new(sb_parent).join(format!("{}-{}", CRIO_PREFIX, sandbox_id)));
        Ok((sb_parent.to_string(), cg_path))
    }

    fn create_sandbox_cgroup(&self, sb_parent: &str, container_id: &str) -> Result<()> {
        let path = self.container_cgroup_absolute_path(sb_parent, container_id)?;
        self.cgfs.create_sandbox_cgroup(&path)
    }

    fn remove_cgroup(&self, cleanup_path: &str) -> Result<()> {
        if cleanup_path.is_empty() {
            return Ok(());
        }
        debug!(path = cleanup_path, "removing cgroupfs cgroup");
        self.cgfs.remove(cleanup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::hierarchy::CgroupHierarchy;
    use std::fs;

    fn unified(mount: &Path) -> CgroupfsManager {
        CgroupfsManager::new(CgroupFs::new(mount, CgroupHierarchy::Unified))
    }

    #[test]
    fn test_container_cgroup_path() {
        let m = unified(Path::new("/nonexistent"));
        assert_eq!(m.container_cgroup_path("/kubepods/pod1", "abc"), "/kubepods/pod1/crio-abc");
        assert_eq!(m.container_cgroup_path("kubepods//pod1/", "abc"), "/kubepods/pod1/crio-abc");
        assert_eq!(m.container_cgroup_path("", "abc"), "/crio/crio-abc");
        assert_eq!(
            m.container_cgroup_absolute_path("", "abc").unwrap(),
            m.container_cgroup_path("", "abc")
        );
    }

    #[test]
    fn test_sandbox_path_rejects_slice() {
        let m = unified(Path::new("/nonexistent"));
        assert!(matches!(
            m.sandbox_cgroup_path("machine.slice", "sb"),
            Err(CgroupError::InvalidParent { manager: "cgroupfs", .. })
        ));
    }

    #[test]
    fn test_sandbox_path_checks_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("kubepods/pod1");
        fs::create_dir_all(&parent).unwrap();
        fs::write(parent.join("memory.max"), "1024").unwrap();

        let m = unified(tmp.path());
        assert!(matches!(
            m.sandbox_cgroup_path("/kubepods/pod1", "sb"),
            Err(CgroupError::InsufficientMemory { ceiling: 1024, .. })
        ));

        fs::write(parent.join("memory.max"), "max").unwrap();
        assert_eq!(
            m.sandbox_cgroup_path("/kubepods/pod1", "sb").unwrap(),
            ("/kubepods/pod1".to_string(), "/kubepods/pod1/crio-sb".to_string())
        );
    }

    #[test]
    fn test_move_supervisor_owns_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let m = unified(tmp.path());

        let cleanup = m.move_supervisor_to_cgroup("abc", "/kubepods/pod1", "pod", 4242).unwrap();
        assert_eq!(cleanup, "/kubepods/pod1/crio-conmon-abc");

        let procs = tmp.path().join("kubepods/pod1/crio-conmon-abc/cgroup.procs");
        assert_eq!(fs::read_to_string(&procs).unwrap(), "4242");

        // a real cgroupfs has no regular files to delete; mimic an emptied cgroup
        fs::remove_file(&procs).unwrap();
        m.remove_cgroup(&cleanup).unwrap();
        assert!(!tmp.path().join("kubepods/pod1/crio-conmon-abc").exists());
    }

    #[test]
    fn test_move_supervisor_rejects_slice_hint() {
        let m = unified(Path::new("/nonexistent"));
        assert!(matches!(
            m.move_supervisor_to_cgroup("abc", "/kubepods", "system.slice", 1),
            Err(CgroupError::InvalidSupervisorCgroup { .. })
        ));
    }

    #[test]
    fn test_move_supervisor_legacy_joins_every_controller() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("memory")).unwrap();
        fs::create_dir(tmp.path().join("pids")).unwrap();
        let m = CgroupfsManager::new(CgroupFs::new(tmp.path(), CgroupHierarchy::Legacy));

        m.move_supervisor_to_cgroup("abc", "/crio", "", 9).unwrap();
        for controller in ["memory", "pids"] {
            let procs = tmp.path().join(controller).join("crio/crio-conmon-abc/cgroup.procs");
            assert_eq!(fs::read_to_string(procs).unwrap(), "9");
        }
    }

    #[test]
    fn test_create_sandbox_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let m = unified(tmp.path());
        m.create_sandbox_cgroup("/kubepods/pod1", "abc").unwrap();
        assert!(tmp.path().join("kubepods/pod1/crio-abc").is_dir());
    }

    #[test]
    fn test_sandbox_path_matches_created_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let m = unified(tmp.path());

        let (parent, path) = m.sandbox_cgroup_path("/kubepods/pod1", "sb1").unwrap();
        m.create_sandbox_cgroup(&parent, "sb1").unwrap();

        assert_eq!(path, "/kubepods/pod1/crio-sb1");
        assert!(tmp.path().join(path.trim_start_matches('/')).is_dir());
    }
}
