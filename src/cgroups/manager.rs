//! The cgroup manager capability
//!
//! A runtime runs with exactly one manager, chosen at startup:
//!
//! ```text
//!                    ┌──────────────────────┐
//!   config.manager ─►│   new_manager(...)   │
//!                    └──────────┬───────────┘
//!               "systemd"       │       "cgroupfs"
//!            ┌──────────────────┴──────────────────┐
//!            ▼                                     ▼
//!   SystemdManager                         CgroupfsManager
//!   parent: machine.slice                  parent: /kubepods/pod1
//!   leaf:   machine.slice:crio:<id>        leaf:   /kubepods/pod1/crio-<id>
//!   conmon: transient scope (systemd       conmon: <parent>/crio-conmon-<id>
//!           cleans up)                             (runtime cleans up)
//! ```
//!
//! Callers only ever hold a `dyn CgroupManager`; `is_systemd()` is the one
//! sanctioned way to branch on the backend.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use super::cgroupfs::CgroupfsManager;
use super::error::{CgroupError, Result};
use super::expand::SystemdSliceExpander;
use super::hierarchy::{under, CgroupHierarchy};
use super::memory::MemoryVerifier;
use super::scope::DbusScopeLauncher;
use super::systemd::SystemdManager;
use super::{CGROUPFS_MANAGER, SYSTEMD_MANAGER};
use crate::config::CgroupConfig;

/// Positions sandboxes, containers and their supervisors in the cgroup tree
pub trait CgroupManager: Send + Sync {
    /// Backend name, `systemd` or `cgroupfs`
    fn name(&self) -> &'static str;

    /// Whether supervisors are relocated into systemd scopes
    fn is_systemd(&self) -> bool;

    /// Bookkeeping path of a container; never fails
    fn container_cgroup_path(&self, sb_parent: &str, container_id: &str) -> String;

    /// Path of a container relative to the cgroup mount
    fn container_cgroup_absolute_path(&self, sb_parent: &str, container_id: &str) -> Result<String>;

    /// Move the running supervisor (conmon) of `entity_id` into its cgroup.
    ///
    /// Returns the cgroup path the caller must remove on teardown, or an
    /// empty string when the backend cleans up by itself.
    fn move_supervisor_to_cgroup(
        &self,
        entity_id: &str,
        cgroup_parent: &str,
        supervisor_cgroup: &str,
        pid: u32,
    ) -> Result<String>;

    /// Validate a sandbox parent and compute `(parent, path)` for the sandbox.
    /// An empty parent yields two empty strings.
    fn sandbox_cgroup_path(&self, sb_parent: &str, sandbox_id: &str) -> Result<(String, String)>;

    /// Create the sandbox cgroup ahead of its first process
    fn create_sandbox_cgroup(&self, sb_parent: &str, container_id: &str) -> Result<()>;

    /// Remove a path previously returned by `move_supervisor_to_cgroup`
    fn remove_cgroup(&self, cleanup_path: &str) -> Result<()>;
}

/// Selectable manager backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupManagerKind {
    Systemd,
    Cgroupfs,
}

impl CgroupManagerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CgroupManagerKind::Systemd => SYSTEMD_MANAGER,
            CgroupManagerKind::Cgroupfs => CGROUPFS_MANAGER,
        }
    }
}

impl FromStr for CgroupManagerKind {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            SYSTEMD_MANAGER => Ok(CgroupManagerKind::Systemd),
            CGROUPFS_MANAGER => Ok(CgroupManagerKind::Cgroupfs),
            other => Err(CgroupError::UnknownManager(other.to_string())),
        }
    }
}

/// Cgroup filesystem facts shared by both backends, fixed at construction
#[derive(Debug, Clone)]
pub struct CgroupFs {
    pub mount: PathBuf,
    pub hierarchy: CgroupHierarchy,
}

impl CgroupFs {
    pub fn new(mount: impl Into<PathBuf>, hierarchy: CgroupHierarchy) -> Self {
        Self {
            mount: mount.into(),
            hierarchy,
        }
    }

    /// Memory verifier matching this hierarchy
    pub fn memory_verifier(&self) -> MemoryVerifier {
        let (path, file) = self.hierarchy.memory_paths(&self.mount);
        MemoryVerifier::new(path, file)
    }

    /// Create the sandbox cgroup directory. Only the unified hierarchy needs
    /// it; legacy controllers get their directories when the runtime joins.
    pub(crate) fn create_sandbox_cgroup(&self, absolute_path: &str) -> Result<()> {
        if self.hierarchy != CgroupHierarchy::Unified {
            debug!(path = absolute_path, "legacy hierarchy, not pre-creating sandbox cgroup");
            return Ok(());
        }
        let dir = under(&self.mount, absolute_path);
        fs::create_dir_all(&dir).map_err(|e| CgroupError::io(dir, e))
    }

    /// Create `cgroup_path` in every controller root and move `pid` into it.
    /// On failure, directories created by this call are removed again.
    pub(crate) fn join(&self, cgroup_path: &str, pid: u32) -> Result<()> {
        let mut created = Vec::new();
        let result = self.join_tracked(cgroup_path, pid, &mut created);
        if result.is_err() {
            // deepest first, so parents are empty by the time we reach them
            for dir in created.iter().rev() {
                if let Err(e) = fs::remove_dir(dir) {
                    warn!(path = %dir.display(), error = %e, "failed to roll back cgroup directory");
                }
            }
        }
        result
    }

    fn join_tracked(&self, cgroup_path: &str, pid: u32, created: &mut Vec<PathBuf>) -> Result<()> {
        let roots = self.hierarchy.controller_roots(&self.mount)?;
        let dirs: Vec<PathBuf> = roots.iter().map(|root| under(root, cgroup_path)).collect();

        for dir in &dirs {
            let mut missing: Vec<PathBuf> = dir
                .ancestors()
                .take_while(|p| !p.exists())
                .map(Path::to_path_buf)
                .collect();
            fs::create_dir_all(dir).map_err(|e| CgroupError::io(dir, e))?;
            missing.reverse();
            created.extend(missing);
        }

        for dir in &dirs {
            let procs = dir.join("cgroup.procs");
            fs::write(&procs, pid.to_string()).map_err(|e| CgroupError::io(procs, e))?;
        }
        Ok(())
    }

    /// Remove `cgroup_path` from every controller root; missing is fine
    pub(crate) fn remove(&self, cgroup_path: &str) -> Result<()> {
        for root in self.hierarchy.controller_roots(&self.mount)? {
            let dir = under(&root, cgroup_path);
            match fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CgroupError::io(dir, e)),
            }
        }
        Ok(())
    }
}

/// Build the manager selected in `config`, wired to the real system
pub fn new_manager(config: &CgroupConfig) -> Result<Box<dyn CgroupManager>> {
    let kind: CgroupManagerKind = config.manager.parse()?;
    let mount = Path::new(&config.cgroup_mount);
    let hierarchy = match config.hierarchy {
        Some(h) => h,
        None => CgroupHierarchy::detect(mount)?,
    };
    let cgfs = CgroupFs::new(mount, hierarchy);
    debug!(manager = kind.as_str(), ?hierarchy, "initializing cgroup manager");

    Ok(match kind {
        CgroupManagerKind::Systemd => Box::new(SystemdManager::new(
            cgfs,
            Arc::new(SystemdSliceExpander),
            Arc::new(DbusScopeLauncher::new(config.dbus_timeout())),
            config.runtime_unit.clone(),
        )),
        CgroupManagerKind::Cgroupfs => Box::new(CgroupfsManager::new(cgfs)),
    })
}
