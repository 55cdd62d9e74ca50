//! systemd-backed cgroup manager
//!
//! Parents are slices (`machine.slice`, `kubepods-burstable.slice`), the
//! supervisor runs in a transient scope, and systemd owns cleanup.

use std::sync::Arc;

use tracing::debug;

use super::error::{CgroupError, Result};
use super::expand::{is_slice, slice_name_from_path, SliceExpander};
use super::manager::{CgroupFs, CgroupManager};
use super::memory::MemoryVerifier;
use super::scope::{self, ScopeLauncher, ScopeUnit, SUPERVISOR_KILL_SIGNAL};
use super::{CRIO_PREFIX, DEFAULT_SYSTEMD_PARENT, SCOPE_SUFFIX, SLICE_SUFFIX, SYSTEMD_MANAGER};

/// Cgroup manager delegating placement to systemd
pub struct SystemdManager {
    cgfs: CgroupFs,
    memory: MemoryVerifier,
    expander: Arc<dyn SliceExpander>,
    launcher: Arc<dyn ScopeLauncher>,
    runtime_unit: String,
}

impl SystemdManager {
    pub fn new(
        cgfs: CgroupFs,
        expander: Arc<dyn SliceExpander>,
        launcher: Arc<dyn ScopeLauncher>,
        runtime_unit: impl Into<String>,
    ) -> Self {
        let memory = cgfs.memory_verifier();
        Self {
            cgfs,
            memory,
            expander,
            launcher,
            runtime_unit: runtime_unit.into(),
        }
    }

    fn expand(&self, slice: &str, context: String) -> Result<String> {
        debug!(slice, "expanding systemd cgroup slice");
        self.expander
            .expand(slice)
            .map_err(|source| CgroupError::Expansion { context, source })
    }
}

fn parent_or_default(sb_parent: &str) -> &str {
    if sb_parent.is_empty() {
        DEFAULT_SYSTEMD_PARENT
    } else {
        sb_parent
    }
}

/// `crio-conmon-<id>.scope`
pub fn supervisor_unit_name(entity_id: &str) -> String {
    format!("{}-conmon-{}{}", CRIO_PREFIX, entity_id, SCOPE_SUFFIX)
}

impl CgroupManager for SystemdManager {
    fn name(&self) -> &'static str {
        SYSTEMD_MANAGER
    }

    fn is_systemd(&self) -> bool {
        true
    }

    fn container_cgroup_path(&self, sb_parent: &str, container_id: &str) -> String {
        format!("{}:{}:{}", parent_or_default(sb_parent), CRIO_PREFIX, container_id)
    }

    fn container_cgroup_absolute_path(&self, sb_parent: &str, container_id: &str) -> Result<String> {
        let parent = parent_or_default(sb_parent);
        let slice_path = self.expand(
            parent,
            format!("error expanding systemd slice to get container {} stats", container_id),
        )?;
        let base = slice_path.trim_end_matches('/');
        Ok(format!("{}/{}-{}{}", base, CRIO_PREFIX, container_id, SCOPE_SUFFIX))
    }

    fn move_supervisor_to_cgroup(
        &self,
        entity_id: &str,
        cgroup_parent: &str,
        supervisor_cgroup: &str,
        pid: u32,
    ) -> Result<String> {
        // an explicitly configured slice beats the sandbox parent
        let slice = if supervisor_cgroup.ends_with(SLICE_SUFFIX) {
            supervisor_cgroup
        } else {
            cgroup_parent
        };

        let unit = ScopeUnit {
            name: supervisor_unit_name(entity_id),
            pid,
            slice: slice.to_string(),
            kill_signal: SUPERVISOR_KILL_SIGNAL,
            after: vec![self.runtime_unit.clone()],
        };
        scope::launch(self.launcher.as_ref(), entity_id, &unit)?;

        // systemd removes the scope once conmon exits
        Ok(String::new())
    }

    fn sandbox_cgroup_path(&self, sb_parent: &str, sandbox_id: &str) -> Result<(String, String)> {
        if sb_parent.is_empty() {
            return Ok((String::new(), String::new()));
        }

        if !is_slice(sb_parent) {
            return Err(CgroupError::InvalidParent {
                manager: SYSTEMD_MANAGER,
                parent: sb_parent.to_string(),
                reason: "did not receive slice as parent",
            });
        }

        let cg_parent = slice_name_from_path(sb_parent);
        let slice_path = self.expand(
            &cg_parent,
            format!("expanding systemd slice path for {:?} (sandbox {})", cg_parent, sandbox_id),
        )?;

        self.memory.verify(&slice_path)?;

        let cg_path = format!("{}:{}:{}", cg_parent, CRIO_PREFIX, sandbox_id);
        Ok((cg_parent, cg_path))
    }

    fn create_sandbox_cgroup(&self, sb_parent: &str, container_id: &str) -> Result<()> {
        let path = self.container_cgroup_absolute_path(sb_parent, container_id)?;
        self.cgfs.create_sandbox_cgroup(&path)
    }

    fn remove_cgroup(&self, cleanup_path: &str) -> Result<()> {
        if cleanup_path.is_empty() {
            return Ok(());
        }
        self.cgfs.remove(cleanup_path)
    }
}
